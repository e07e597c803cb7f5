//! Data Collector
//!
//! Drives one tick: Poller -> Cache Store -> Lifecycle Tracker -> Hub.
//! Runs once immediately at startup and then on a fixed interval until the
//! shutdown flag flips.
//!
//! Every domain whose fetch succeeded is republished each tick, even when
//! nothing changed, so a viewer only goes stale when the node does.

use crate::cache::{CacheStore, DomainData};
use crate::hub::envelope::{NewBlock, TransactionAdmitted, TransactionConfirmed, TransactionRemoved};
use crate::hub::{Hub, ServerMessage};
use crate::poller::{PollResult, Poller};
use crate::rpc::RawChainTotals;
use crate::tracker::{LifecycleEvent, LifecycleTracker, TrackerOutcome};
use crate::types::{coin_amount, ChainTotals};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    pub total_ticks: u64,
    /// At least one domain refreshed
    pub successful_ticks: u64,
    /// Nothing could be fetched
    pub failed_ticks: u64,
    pub frames_published: u64,
    pub start_time: Option<DateTime<Utc>>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rpc_calls: u64,
    pub new_blocks: usize,
    pub lifecycle_events: usize,
    pub frames: usize,
}

pub struct Collector {
    poller: Poller,
    tracker: LifecycleTracker,
    store: Arc<CacheStore>,
    hub: Arc<Hub>,
    pub stats: CollectorStats,
}

impl Collector {
    pub fn new(poller: Poller, tracker: LifecycleTracker, store: Arc<CacheStore>, hub: Arc<Hub>) -> Self {
        Self {
            poller,
            tracker,
            store,
            hub,
            stats: CollectorStats {
                start_time: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    pub async fn collect_once(&mut self) -> TickReport {
        self.stats.total_ticks += 1;
        let poll = self.poller.fetch_latest().await;

        let mut messages = Vec::new();
        self.publish_blocks(&poll, &mut messages);

        let outcome = self.tracker.apply(&self.store, &poll);
        let lifecycle_events = outcome.events.len();
        self.publish_transactions(outcome, &mut messages);

        if let Some(raw) = &poll.chain_totals {
            self.publish_chain_totals(raw, &mut messages);
        }

        if messages.is_empty() {
            self.stats.failed_ticks += 1;
            warn!("Tick {}: nothing fetched, keeping previous snapshots", self.stats.total_ticks);
        } else {
            self.stats.successful_ticks += 1;
        }

        let frames = self.hub.publish(&messages);
        self.stats.frames_published += frames as u64;

        let report = TickReport {
            rpc_calls: poll.rpc_calls,
            new_blocks: poll.new_blocks.len(),
            lifecycle_events,
            frames,
        };
        debug!("Tick {}: {:?}", self.stats.total_ticks, report);
        report
    }

    fn publish_blocks(&self, poll: &PollResult, messages: &mut Vec<ServerMessage>) {
        if poll.best_height.is_none() {
            return;
        }

        let mut window = self.store.blocks().data.clone();
        for block in &poll.new_blocks {
            window.push(block.summary.clone());
        }
        let version = self.store.publish(DomainData::Blocks(window));

        for block in &poll.new_blocks {
            info!(
                "New block {} ({} txs, miner {})",
                block.summary.height, block.summary.tx_count, block.summary.miner_identity
            );
            messages.push(ServerMessage::NewBlock(NewBlock {
                block: block.summary.clone(),
                version,
            }));
        }
        messages.push(ServerMessage::RecentBlocks(self.store.blocks()));
    }

    fn publish_transactions(&self, outcome: TrackerOutcome, messages: &mut Vec<ServerMessage>) {
        let (Some(mempool_version), Some(confirmed_version)) =
            (outcome.versions.mempool, outcome.versions.confirmed)
        else {
            return;
        };

        for event in outcome.events {
            messages.push(match event {
                LifecycleEvent::Admitted(tx) => ServerMessage::TransactionAdmitted(TransactionAdmitted {
                    tx,
                    version: mempool_version,
                }),
                LifecycleEvent::Confirmed(record) => {
                    ServerMessage::TransactionConfirmed(TransactionConfirmed {
                        txid: record.tx.id,
                        confirmed_at_height: record.confirmed_at_height,
                        confirmed_at_time: record.confirmed_at_time,
                        version: confirmed_version,
                    })
                }
                LifecycleEvent::Removed { txid } => ServerMessage::TransactionRemoved(TransactionRemoved {
                    txid,
                    version: mempool_version,
                }),
            });
        }

        let state = self.store.transactions();
        messages.push(ServerMessage::Mempool(Arc::clone(&state.mempool)));
        messages.push(ServerMessage::ConfirmedTransactions(Arc::clone(&state.confirmed)));
    }

    fn publish_chain_totals(&self, raw: &RawChainTotals, messages: &mut Vec<ServerMessage>) {
        let totals = ChainTotals {
            height: raw.blocks,
            difficulty: raw.difficulty,
            network_hashrate: raw.network_hashps,
            supply: raw.supply.map(coin_amount),
            mempool_bytes: self.store.mempool().data.stats.total_bytes,
        };
        self.store.publish(DomainData::ChainTotals(totals));
        messages.push(ServerMessage::ChainTotals(self.store.chain_totals()));
    }

    fn log_stats(&self) {
        let mempool = self.store.mempool();
        let tracker = &self.tracker.stats;
        info!(
            "Collector stats: {} ticks ({} ok, {} failed), {} rpc calls, tip {:?}, {} sessions, \
             mempool {} txs, confirmed {} ({:.1}% rate, median lead {}s)",
            self.stats.total_ticks,
            self.stats.successful_ticks,
            self.stats.failed_ticks,
            self.poller.stats.rpc_calls,
            self.poller.last_height(),
            self.hub.session_count(),
            mempool.data.stats.count,
            tracker.total_confirmed,
            tracker.confirmation_rate(),
            tracker.median_lead_time_secs()
        );
    }
}

/// Run the collector loop until shutdown
pub async fn run_data_collector(
    mut collector: Collector,
    poll_interval: Duration,
    stats_every_ticks: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("Starting data collector (interval {:?})", poll_interval);

    // First tick fires immediately
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    loop {
        tokio::select! {
            Some(_) = ticks.next() => {
                collector.collect_once().await;
                if stats_every_ticks > 0 && collector.stats.total_ticks % stats_every_ticks == 0 {
                    collector.log_stats();
                }
            }
            _ = shutdown.changed() => {
                info!("Data collector stopping");
                break;
            }
        }
    }

    collector.log_stats();
    Ok(())
}
