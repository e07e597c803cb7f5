//! Upstream Poller
//!
//! Purpose:
//!     The single authority that talks to the node. One `fetch_latest` call
//!     is one query burst, issued once per collector tick no matter how many
//!     viewers are attached.
//!
//! Fetch order per tick:
//!     1. mempool (+ detail lookups for ids not seen on the previous fetch)
//!     2. best height, then every missing block in ascending order
//!     3. chain totals
//!     Mempool goes first so that a transaction missing from it was mined in
//!     a block at or below the best height read afterwards.
//!
//! Failure semantics:
//!     Each sub-fetch is independent. A failed one is logged and reported as
//!     absent; the others still land. A failed block fetch mid-range stops the
//!     range and the next tick resumes from the last block that succeeded.

pub mod miners;

pub use miners::MinerDirectory;

use crate::config::AppConfig;
use crate::rpc::{NodeRpc, RawBlock, RawChainTotals, RawMempoolEntry, RawTransaction};
use crate::types::{BlockSummary, TxId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A newly fetched block, summarized, plus its transaction ids
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub summary: BlockSummary,
    pub txids: Vec<TxId>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedMempool {
    pub entries: HashMap<TxId, RawMempoolEntry>,
    /// Decoded transactions for ids first seen this tick (may be partial)
    pub details: HashMap<TxId, RawTransaction>,
}

/// Everything one tick learned. `None` / empty means that sub-fetch failed
/// or had nothing new.
#[derive(Debug, Clone, Default)]
pub struct PollResult {
    pub best_height: Option<u64>,
    /// Ascending and contiguous, starting right after the previous tick's last block
    pub new_blocks: Vec<FetchedBlock>,
    pub mempool: Option<FetchedMempool>,
    pub chain_totals: Option<RawChainTotals>,
    /// Outbound node calls made during this tick
    pub rpc_calls: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub ticks: u64,
    pub rpc_calls: u64,
    pub block_failures: u64,
    pub mempool_failures: u64,
    pub totals_failures: u64,
}

pub struct Poller {
    rpc: Arc<dyn NodeRpc>,
    miners: MinerDirectory,
    default_algorithm: String,
    backfill_limit: usize,
    max_tx_lookups: usize,
    /// Height of the last block handed out
    last_height: Option<u64>,
    /// Mempool ids from the last successful fetch
    known_mempool: HashSet<TxId>,
    calls_this_tick: u64,
    pub stats: PollerStats,
}

impl Poller {
    pub fn new(rpc: Arc<dyn NodeRpc>, config: &AppConfig) -> Self {
        Self {
            rpc,
            miners: MinerDirectory::new(config.pools.clone()),
            default_algorithm: config.poller.default_algorithm.clone(),
            backfill_limit: config.backfill_limit(),
            max_tx_lookups: config.poller.max_tx_lookups_per_tick,
            last_height: None,
            known_mempool: HashSet::new(),
            calls_this_tick: 0,
            stats: PollerStats::default(),
        }
    }

    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    /// Run one query burst against the node
    pub async fn fetch_latest(&mut self) -> PollResult {
        self.stats.ticks += 1;
        self.calls_this_tick = 0;

        let mempool = self.fetch_mempool().await;
        let (best_height, new_blocks) = self.fetch_blocks().await;
        let chain_totals = self.fetch_chain_totals().await;

        self.stats.rpc_calls += self.calls_this_tick;
        PollResult {
            best_height,
            new_blocks,
            mempool,
            chain_totals,
            rpc_calls: self.calls_this_tick,
        }
    }

    async fn fetch_mempool(&mut self) -> Option<FetchedMempool> {
        self.calls_this_tick += 1;
        let entries = match self.rpc.raw_mempool().await {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.mempool_failures += 1;
                warn!("Mempool fetch failed, keeping previous snapshot: {}", e);
                return None;
            }
        };

        let mut new_ids: Vec<&TxId> = entries
            .keys()
            .filter(|id| !self.known_mempool.contains(*id))
            .collect();
        new_ids.sort();

        if new_ids.len() > self.max_tx_lookups {
            debug!(
                "{} new mempool entries, looking up details for the first {}",
                new_ids.len(),
                self.max_tx_lookups
            );
        }

        let mut details = HashMap::new();
        for txid in new_ids.into_iter().take(self.max_tx_lookups) {
            self.calls_this_tick += 1;
            match self.rpc.transaction(txid).await {
                Ok(tx) => {
                    details.insert(txid.clone(), tx);
                }
                Err(e) => debug!("getrawtransaction {} failed: {}", txid, e),
            }
        }

        self.known_mempool = entries.keys().cloned().collect();
        Some(FetchedMempool { entries, details })
    }

    async fn fetch_blocks(&mut self) -> (Option<u64>, Vec<FetchedBlock>) {
        self.calls_this_tick += 1;
        let best = match self.rpc.best_height().await {
            Ok(h) => h,
            Err(e) => {
                self.stats.block_failures += 1;
                warn!("Best height fetch failed, keeping previous blocks: {}", e);
                return (None, Vec::new());
            }
        };

        let start = match self.last_height {
            Some(last) if best < last => {
                warn!("Node best height {} is below last seen {}; ignoring", best, last);
                return (Some(best), Vec::new());
            }
            Some(last) if best == last => return (Some(best), Vec::new()),
            Some(last) => last + 1,
            // Startup: only the visible window is worth fetching
            None => best.saturating_sub(self.backfill_limit as u64 - 1),
        };
        let end = best.min(start + self.backfill_limit as u64 - 1);

        if end < best {
            info!(
                "Backfilling blocks {}..={} ({} behind best {})",
                start,
                end,
                best - end,
                best
            );
        }

        let mut blocks = Vec::new();
        for height in start..=end {
            self.calls_this_tick += 1;
            match self.rpc.block(height).await {
                Ok(raw) => {
                    blocks.push(self.summarize(&raw));
                    self.last_height = Some(height);
                }
                Err(e) => {
                    self.stats.block_failures += 1;
                    warn!("Block {} fetch failed, will resume next tick: {}", height, e);
                    break;
                }
            }
        }

        (Some(best), blocks)
    }

    async fn fetch_chain_totals(&mut self) -> Option<RawChainTotals> {
        self.calls_this_tick += 1;
        match self.rpc.chain_totals().await {
            Ok(totals) => Some(totals),
            Err(e) => {
                self.stats.totals_failures += 1;
                warn!("Chain totals fetch failed: {}", e);
                None
            }
        }
    }

    fn summarize(&self, raw: &RawBlock) -> FetchedBlock {
        let summary = BlockSummary {
            height: raw.height,
            hash: raw.hash.clone(),
            timestamp: DateTime::<Utc>::from_timestamp(raw.time, 0).unwrap_or_default(),
            size_bytes: raw.size,
            tx_count: raw.tx.len() as u64,
            miner_identity: self.miners.identify(raw.coinbase_address()),
            algorithm: raw
                .pow_algo
                .clone()
                .unwrap_or_else(|| self.default_algorithm.clone()),
            difficulty: raw.difficulty,
        };
        FetchedBlock {
            summary,
            txids: raw.txids().map(str::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockNode;

    fn config(window: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.block_capacity = window;
        config.pools.insert("RPoolPayout".to_string(), "ExamplePool".to_string());
        config
    }

    fn heights(result: &PollResult) -> Vec<u64> {
        result.new_blocks.iter().map(|b| b.summary.height).collect()
    }

    #[tokio::test]
    async fn test_startup_fetches_window_only() {
        let node = Arc::new(MockNode::new());
        for h in 1..=20 {
            node.push_block(h, &[]);
        }
        let mut poller = Poller::new(node.clone(), &config(5));

        let result = poller.fetch_latest().await;
        assert_eq!(result.best_height, Some(20));
        assert_eq!(heights(&result), vec![16, 17, 18, 19, 20]);
        assert_eq!(poller.last_height(), Some(20));

        let block = &result.new_blocks[0].summary;
        assert_eq!(block.miner_identity, "ExamplePool");
        assert_eq!(block.algorithm, "sha256d");
    }

    #[tokio::test]
    async fn test_gap_is_backfilled_contiguously() {
        let node = Arc::new(MockNode::new());
        node.push_block(0, &[]);
        node.push_block(1, &[]);
        let mut poller = Poller::new(node.clone(), &config(3));
        assert_eq!(heights(&poller.fetch_latest().await), vec![0, 1]);

        for h in 2..=6 {
            node.push_block(h, &[]);
        }
        // Capped at 3 per tick, resumed on the next tick
        assert_eq!(heights(&poller.fetch_latest().await), vec![2, 3, 4]);
        assert_eq!(heights(&poller.fetch_latest().await), vec![5, 6]);
        assert!(poller.fetch_latest().await.new_blocks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_block_resumes_next_tick() {
        let node = Arc::new(MockNode::new());
        node.push_block(0, &[]);
        node.push_block(1, &[]);
        let mut poller = Poller::new(node.clone(), &config(10));
        poller.fetch_latest().await;

        node.push_block(2, &[]);
        node.push_block(3, &[]);
        node.fail_height(3, true);
        assert_eq!(heights(&poller.fetch_latest().await), vec![2]);

        node.fail_height(3, false);
        assert_eq!(heights(&poller.fetch_latest().await), vec![3]);
    }

    #[tokio::test]
    async fn test_block_failure_does_not_block_mempool() {
        let node = Arc::new(MockNode::new());
        node.push_block(1, &[]);
        node.add_mempool("aa", 250, 0.00001);
        node.fail_height(1, true);
        let mut poller = Poller::new(node.clone(), &config(10));

        let result = poller.fetch_latest().await;
        assert!(result.new_blocks.is_empty());
        let mempool = result.mempool.expect("mempool fetched");
        assert!(mempool.entries.contains_key("aa"));
        assert!(mempool.details.contains_key("aa"));
    }

    #[tokio::test]
    async fn test_node_down_yields_nothing() {
        let node = Arc::new(MockNode::new());
        node.push_block(1, &[]);
        node.set_down(true);
        let mut poller = Poller::new(node.clone(), &config(10));

        let result = poller.fetch_latest().await;
        assert!(result.best_height.is_none());
        assert!(result.mempool.is_none());
        assert!(result.chain_totals.is_none());
        assert_eq!(poller.stats.mempool_failures, 1);
        assert_eq!(poller.last_height(), None);
    }

    #[tokio::test]
    async fn test_details_only_for_new_ids() {
        let node = Arc::new(MockNode::new());
        node.push_block(0, &[]);
        node.push_block(1, &[]);
        node.add_mempool("aa", 250, 0.00001);
        let mut poller = Poller::new(node.clone(), &config(10));

        let first = poller.fetch_latest().await;
        // getrawmempool + 1 lookup + getblockcount + 2 blocks + totals
        assert_eq!(first.rpc_calls, 6);

        node.add_mempool("bb", 300, 0.00002);
        let second = poller.fetch_latest().await;
        let mempool = second.mempool.unwrap();
        assert_eq!(mempool.details.len(), 1);
        assert!(mempool.details.contains_key("bb"));
        // getrawmempool + 1 lookup + getblockcount + totals
        assert_eq!(second.rpc_calls, 4);
    }

    #[tokio::test]
    async fn test_height_regression_is_ignored() {
        let node = Arc::new(MockNode::new());
        node.push_block(0, &[]);
        node.push_block(1, &[]);
        node.push_block(2, &[]);
        let mut poller = Poller::new(node.clone(), &config(10));
        poller.fetch_latest().await;
        assert_eq!(poller.last_height(), Some(2));

        poller.last_height = Some(5);
        let result = poller.fetch_latest().await;
        assert!(result.new_blocks.is_empty());
        assert_eq!(poller.last_height(), Some(5));
    }
}
