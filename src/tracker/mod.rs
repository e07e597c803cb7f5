//! Transaction Lifecycle Tracker
//!
//! Purpose:
//!     Follows every mempool transaction from admission to either
//!     confirmation (found in a block) or removal (gone, not mined). It is the
//!     only writer of the mempool and confirmed domains.
//!
//! Architecture:
//!     index.rs - txids of recently fetched blocks, lowest height wins
//!     stats.rs - running counters and mempool lead times
//!
//! Per id: UNSEEN -> PENDING -> CONFIRMED -> (evicted by capacity)
//!                   PENDING -> UNSEEN is REMOVED, never CONFIRMED.

pub mod index;
pub mod stats;

pub use index::{BlockTxIndex, Inclusion};
pub use stats::TrackerStats;

use crate::cache::{CacheStore, TxVersions};
use crate::config::TrackerConfig;
use crate::poller::PollResult;
use crate::rpc::{RawMempoolEntry, RawTransaction};
use crate::types::{
    coin_amount, fee_rate_per_kb, ConfirmedTxRecord, FeeThresholds, MempoolView, PriorityClass,
    TxId, TxInputRef, TxOutput, TxSummary,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Admitted(TxSummary),
    Confirmed(ConfirmedTxRecord),
    Removed { txid: TxId },
}

/// What one tick changed. `versions` is empty when the mempool fetch failed.
#[derive(Debug, Clone, Default)]
pub struct TrackerOutcome {
    pub events: Vec<LifecycleEvent>,
    pub versions: TxVersions,
}

pub struct LifecycleTracker {
    thresholds: FeeThresholds,
    index: BlockTxIndex,
    pub stats: TrackerStats,
}

impl LifecycleTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            thresholds: config.fee_thresholds(),
            index: BlockTxIndex::new(config.confirmation_lookback_blocks),
            stats: TrackerStats::default(),
        }
    }

    /// Fold one poll into the mempool/confirmed domains and publish them together
    pub fn apply(&mut self, store: &CacheStore, poll: &PollResult) -> TrackerOutcome {
        for block in &poll.new_blocks {
            self.index.add(block);
        }

        // Blocks stay indexed until a mempool fetch succeeds
        let Some(fetched) = &poll.mempool else {
            debug!("No mempool this tick; {} blocks held for lookup", self.index.len());
            return TrackerOutcome::default();
        };

        let current = store.transactions();
        let mut entries = current.mempool.data.entries.clone();
        let mut confirmed = current.confirmed.data.clone();
        let mut events = Vec::new();

        let gone: Vec<TxId> = entries
            .keys()
            .filter(|id| !fetched.entries.contains_key(*id))
            .cloned()
            .collect();

        let inclusions = self.index.inclusions();
        for txid in gone {
            let Some(tx) = entries.remove(&txid) else {
                continue;
            };
            match inclusions.get(txid.as_str()) {
                Some(inclusion) => {
                    let lead_time = (inclusion.time - tx.first_seen_time).num_seconds().max(0);
                    self.stats.record_confirmation(lead_time as u64);
                    let record = ConfirmedTxRecord {
                        tx,
                        confirmed_at_height: inclusion.height,
                        confirmed_at_time: inclusion.time,
                    };
                    debug!("Confirmed {} at height {}", txid, inclusion.height);
                    confirmed.push(record.clone());
                    events.push(LifecycleEvent::Confirmed(record));
                }
                None => {
                    self.stats.total_removed += 1;
                    debug!("Removed {} without confirmation", txid);
                    events.push(LifecycleEvent::Removed { txid });
                }
            }
        }
        drop(inclusions);

        let mut admitted: Vec<(&TxId, &RawMempoolEntry)> = fetched
            .entries
            .iter()
            .filter(|(id, _)| !entries.contains_key(*id))
            .collect();
        admitted.sort_by(|a, b| a.0.cmp(b.0));

        for (txid, entry) in admitted {
            // Back in the mempool after being mined: the block was reorged out
            if confirmed.iter().any(|r| &r.tx.id == txid) {
                confirmed.retain(|r| &r.tx.id != txid);
                self.index.forget(txid);
                self.stats.total_readmitted += 1;
                info!("{} re-entered the mempool after confirmation (reorg)", txid);
            }

            let summary = summarize(
                txid,
                entry,
                fetched.details.get(txid),
                &self.thresholds,
            );
            self.stats.total_admitted += 1;
            entries.insert(txid.clone(), summary.clone());
            events.push(LifecycleEvent::Admitted(summary));
        }

        let view = MempoolView::from_entries(entries);
        let versions = store.publish_transactions(Some(view), Some(confirmed));
        self.index.trim();

        TrackerOutcome { events, versions }
    }
}

/// Build the immutable summary of a freshly admitted transaction
pub fn summarize(
    txid: &str,
    entry: &RawMempoolEntry,
    details: Option<&RawTransaction>,
    thresholds: &FeeThresholds,
) -> TxSummary {
    let size_bytes = entry.size_bytes();
    let fee = coin_amount(entry.fee());
    let fee_rate = fee_rate_per_kb(fee, size_bytes);

    let (inputs, outputs): (Vec<TxInputRef>, Vec<TxOutput>) = match details {
        Some(tx) => (
            tx.vin
                .iter()
                .filter(|vin| vin.coinbase.is_none())
                .map(|vin| TxInputRef {
                    txid: vin.txid.clone(),
                    vout: vin.vout,
                })
                .collect(),
            tx.vout
                .iter()
                .map(|vout| TxOutput {
                    address: vout.script_pub_key.address().map(str::to_string),
                    value: coin_amount(vout.value),
                })
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    let value_transferred: Decimal = outputs.iter().map(|o| o.value).sum();

    let first_seen_time = if entry.time > 0 {
        DateTime::<Utc>::from_timestamp(entry.time, 0).unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    };

    TxSummary {
        id: txid.to_string(),
        size_bytes,
        fee,
        fee_rate,
        priority_class: PriorityClass::classify(fee_rate, thresholds),
        value_transferred,
        first_seen_time,
        inputs,
        outputs,
    }
}
