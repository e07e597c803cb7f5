//! In-memory node used by tests. Counts every trait call.

use super::{NodeRpc, RawBlock, RawChainTotals, RawMempoolEntry, RawTransaction, RawVin, RawVout};
use crate::error::RpcError;
use crate::types::TxId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct MockChain {
    blocks: BTreeMap<u64, RawBlock>,
    mempool: HashMap<TxId, RawMempoolEntry>,
    totals: RawChainTotals,
    down: bool,
    failing_heights: HashSet<u64>,
    mempool_down: bool,
}

#[derive(Default)]
pub struct MockNode {
    chain: Mutex<MockChain>,
    calls: AtomicU64,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn push_block(&self, height: u64, txids: &[&str]) {
        let mut tx = vec![RawTransaction {
            txid: format!("coinbase-{}", height),
            vin: vec![RawVin {
                txid: None,
                vout: None,
                coinbase: Some("00".to_string()),
            }],
            vout: vec![RawVout {
                value: 50.0,
                script_pub_key: super::RawScriptPubKey {
                    address: Some("RPoolPayout".to_string()),
                    addresses: None,
                },
            }],
        }];
        tx.extend(txids.iter().map(|id| RawTransaction {
            txid: id.to_string(),
            vin: vec![],
            vout: vec![],
        }));

        let block = RawBlock {
            hash: format!("{:064x}", height),
            height,
            time: 1_700_000_000 + height as i64 * 60,
            size: 1_000,
            difficulty: 2.0,
            pow_algo: None,
            tx,
        };
        let mut chain = self.chain.lock().unwrap();
        chain.totals.blocks = chain.totals.blocks.max(height);
        chain.blocks.insert(height, block);
    }

    /// Add a mempool entry with the given size and fee (coins)
    pub fn add_mempool(&self, txid: &str, size: u64, fee: f64) {
        self.chain.lock().unwrap().mempool.insert(
            txid.to_string(),
            RawMempoolEntry {
                vsize: Some(size),
                fee: Some(fee),
                time: 1_700_000_000,
                ..Default::default()
            },
        );
    }

    pub fn remove_mempool(&self, txid: &str) {
        self.chain.lock().unwrap().mempool.remove(txid);
    }

    pub fn set_down(&self, down: bool) {
        self.chain.lock().unwrap().down = down;
    }

    pub fn set_mempool_down(&self, down: bool) {
        self.chain.lock().unwrap().mempool_down = down;
    }

    pub fn fail_height(&self, height: u64, fail: bool) {
        let mut chain = self.chain.lock().unwrap();
        if fail {
            chain.failing_heights.insert(height);
        } else {
            chain.failing_heights.remove(&height);
        }
    }

    fn enter(&self, method: &'static str) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.chain.lock().unwrap().down {
            return Err(RpcError::Timeout { method });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn best_height(&self) -> Result<u64, RpcError> {
        self.enter("getblockcount")?;
        let chain = self.chain.lock().unwrap();
        Ok(chain.blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn block(&self, height: u64) -> Result<RawBlock, RpcError> {
        self.enter("getblock")?;
        let chain = self.chain.lock().unwrap();
        if chain.failing_heights.contains(&height) {
            return Err(RpcError::Timeout { method: "getblock" });
        }
        chain.blocks.get(&height).cloned().ok_or(RpcError::Node {
            method: "getblockhash",
            code: -8,
            message: "Block height out of range".to_string(),
        })
    }

    async fn raw_mempool(&self) -> Result<HashMap<TxId, RawMempoolEntry>, RpcError> {
        self.enter("getrawmempool")?;
        let chain = self.chain.lock().unwrap();
        if chain.mempool_down {
            return Err(RpcError::Timeout { method: "getrawmempool" });
        }
        Ok(chain.mempool.clone())
    }

    async fn chain_totals(&self) -> Result<RawChainTotals, RpcError> {
        self.enter("getmininginfo")?;
        Ok(self.chain.lock().unwrap().totals.clone())
    }

    async fn transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.enter("getrawtransaction")?;
        Ok(RawTransaction {
            txid: txid.to_string(),
            vin: vec![RawVin {
                txid: Some("prev".to_string()),
                vout: Some(0),
                coinbase: None,
            }],
            vout: vec![RawVout {
                value: 1.25,
                script_pub_key: Default::default(),
            }],
        })
    }
}
