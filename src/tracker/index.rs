//! Index of transaction ids in recently fetched blocks
//!
//! Holds every block fetched since the last lifecycle run, plus the most
//! recent `lookback` blocks before that, so a transaction mined just after a
//! mempool fetch is still found as confirmed on the following tick.

use crate::poller::FetchedBlock;
use crate::types::TxId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    pub height: u64,
    pub time: DateTime<Utc>,
}

struct IndexedBlock {
    inclusion: Inclusion,
    txids: Vec<TxId>,
}

pub struct BlockTxIndex {
    blocks: VecDeque<IndexedBlock>,
    lookback: usize,
}

impl BlockTxIndex {
    pub fn new(lookback: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            lookback,
        }
    }

    pub fn add(&mut self, block: &FetchedBlock) {
        self.blocks.push_back(IndexedBlock {
            inclusion: Inclusion {
                height: block.summary.height,
                time: block.summary.timestamp,
            },
            txids: block.txids.clone(),
        });
    }

    /// txid -> first inclusion. Lowest height wins when an id shows up twice.
    pub fn inclusions(&self) -> HashMap<&str, Inclusion> {
        let mut map: HashMap<&str, Inclusion> = HashMap::new();
        for block in &self.blocks {
            for txid in &block.txids {
                map.entry(txid.as_str())
                    .and_modify(|seen| {
                        if block.inclusion.height < seen.height {
                            *seen = block.inclusion;
                        }
                    })
                    .or_insert(block.inclusion);
            }
        }
        map
    }

    /// Stop reporting `txid` as included; its blocks were reorged away
    pub fn forget(&mut self, txid: &str) {
        for block in self.blocks.iter_mut() {
            block.txids.retain(|t| t != txid);
        }
    }

    /// Drop everything but the newest `lookback` blocks; call after a lifecycle run
    pub fn trim(&mut self) {
        while self.blocks.len() > self.lookback {
            self.blocks.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
