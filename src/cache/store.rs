//! Cache Store
//!
//! Latest snapshot per domain behind `ArcSwap`. Readers never lock: they
//! load an `Arc` and keep it as long as they like. Publishes are serialized
//! by a single writer mutex and replace the whole reference.
//!
//! Mempool and confirmed live in one swap cell so a transaction moving
//! between them is never visible in both (or, mid-move, in neither).

use super::snapshot::{AnySnapshot, BlockWindow, ConfirmedWindow, DomainData, Snapshot};
use crate::types::{ChainTotals, Domain, MempoolView};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Mempool + confirmed, swapped together
#[derive(Debug, Clone)]
pub struct TxState {
    pub mempool: Arc<Snapshot<MempoolView>>,
    pub confirmed: Arc<Snapshot<ConfirmedWindow>>,
}

/// Versions assigned by `publish_transactions`; None when that side was unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxVersions {
    pub mempool: Option<u64>,
    pub confirmed: Option<u64>,
}

pub struct CacheStore {
    blocks: ArcSwap<Snapshot<BlockWindow>>,
    tx_state: ArcSwap<TxState>,
    chain_totals: ArcSwap<Snapshot<ChainTotals>>,
    block_capacity: usize,
    confirmed_capacity: usize,
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// Empty store; every domain starts at version 0
    pub fn new(block_capacity: usize, confirmed_capacity: usize) -> Self {
        Self {
            blocks: ArcSwap::from_pointee(Snapshot::new(0, BlockWindow::new(block_capacity))),
            tx_state: ArcSwap::from_pointee(TxState {
                mempool: Arc::new(Snapshot::new(0, MempoolView::default())),
                confirmed: Arc::new(Snapshot::new(0, ConfirmedWindow::new(confirmed_capacity))),
            }),
            chain_totals: ArcSwap::from_pointee(Snapshot::new(0, ChainTotals::default())),
            block_capacity,
            confirmed_capacity,
            write_lock: Mutex::new(()),
        }
    }

    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    pub fn confirmed_capacity(&self) -> usize {
        self.confirmed_capacity
    }

    pub fn blocks(&self) -> Arc<Snapshot<BlockWindow>> {
        self.blocks.load_full()
    }

    pub fn mempool(&self) -> Arc<Snapshot<MempoolView>> {
        Arc::clone(&self.tx_state.load().mempool)
    }

    pub fn confirmed(&self) -> Arc<Snapshot<ConfirmedWindow>> {
        Arc::clone(&self.tx_state.load().confirmed)
    }

    /// Mempool and confirmed from the same publish
    pub fn transactions(&self) -> Arc<TxState> {
        self.tx_state.load_full()
    }

    pub fn chain_totals(&self) -> Arc<Snapshot<ChainTotals>> {
        self.chain_totals.load_full()
    }

    pub fn current(&self, domain: Domain) -> AnySnapshot {
        match domain {
            Domain::Blocks => AnySnapshot::Blocks(self.blocks()),
            Domain::Mempool => AnySnapshot::Mempool(self.mempool()),
            Domain::Confirmed => AnySnapshot::Confirmed(self.confirmed()),
            Domain::ChainTotals => AnySnapshot::ChainTotals(self.chain_totals()),
        }
    }

    pub fn version(&self, domain: Domain) -> u64 {
        self.current(domain).version()
    }

    /// Replace one domain's snapshot; returns the new version
    pub fn publish(&self, data: DomainData) -> u64 {
        match data {
            DomainData::Blocks(window) => {
                let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                let version = self.blocks.load().version + 1;
                self.blocks.store(Arc::new(Snapshot::new(version, window)));
                debug!("Published blocks v{}", version);
                version
            }
            DomainData::ChainTotals(totals) => {
                let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                let version = self.chain_totals.load().version + 1;
                self.chain_totals.store(Arc::new(Snapshot::new(version, totals)));
                debug!("Published chainTotals v{}", version);
                version
            }
            DomainData::Mempool(view) => self
                .publish_transactions(Some(view), None)
                .mempool
                .unwrap_or_default(),
            DomainData::Confirmed(window) => self
                .publish_transactions(None, Some(window))
                .confirmed
                .unwrap_or_default(),
        }
    }

    /// Replace mempool and/or confirmed in one atomic swap
    pub fn publish_transactions(
        &self,
        mempool: Option<MempoolView>,
        confirmed: Option<ConfirmedWindow>,
    ) -> TxVersions {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.tx_state.load_full();
        let mut next = TxState::clone(&current);
        let mut versions = TxVersions::default();

        if let Some(view) = mempool {
            let version = current.mempool.version + 1;
            next.mempool = Arc::new(Snapshot::new(version, view));
            versions.mempool = Some(version);
        }
        if let Some(window) = confirmed {
            let version = current.confirmed.version + 1;
            next.confirmed = Arc::new(Snapshot::new(version, window));
            versions.confirmed = Some(version);
        }

        if versions != TxVersions::default() {
            self.tx_state.store(Arc::new(next));
            debug!(
                "Published transactions mempool={:?} confirmed={:?}",
                versions.mempool, versions.confirmed
            );
        }
        versions
    }
}
