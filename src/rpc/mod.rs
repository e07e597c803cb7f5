//! Upstream Node RPC
//!
//! Purpose:
//!     The request/response surface of the blockchain node, and the raw
//!     shapes it returns. Only the poller talks to this module.
//!
//! Architecture:
//!     mod.rs     - NodeRpc trait + raw response types
//!     client.rs  - JSON-RPC over HTTP (reqwest), timeout + bounded retry
//!     mock.rs    - in-memory node for tests, counts every call

pub mod client;
#[cfg(test)]
pub(crate) mod mock;

pub use client::JsonRpcClient;

use crate::error::RpcError;
use crate::types::TxId;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// The node calls the poller needs. Each call is independently retryable.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Current best chain height
    async fn best_height(&self) -> Result<u64, RpcError>;

    /// Full block (with decoded transactions) at `height`
    async fn block(&self, height: u64) -> Result<RawBlock, RpcError>;

    /// Verbose mempool listing keyed by txid
    async fn raw_mempool(&self) -> Result<HashMap<TxId, RawMempoolEntry>, RpcError>;

    async fn chain_totals(&self) -> Result<RawChainTotals, RpcError>;

    /// Decoded transaction, used for input/output lists of new mempool entries
    async fn transaction(&self, txid: &str) -> Result<RawTransaction, RpcError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub hash: String,
    pub height: u64,
    /// Unix seconds
    pub time: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub difficulty: f64,
    /// Multi-algo chains report the proof-of-work algorithm per block
    #[serde(default)]
    pub pow_algo: Option<String>,
    #[serde(default)]
    pub tx: Vec<RawTransaction>,
}

impl RawBlock {
    pub fn txids(&self) -> impl Iterator<Item = &str> {
        self.tx.iter().map(|t| t.txid.as_str())
    }

    /// First payout address of the coinbase transaction
    pub fn coinbase_address(&self) -> Option<&str> {
        let coinbase = self.tx.first().filter(|t| t.is_coinbase())?;
        coinbase.vout.iter().find_map(|o| o.script_pub_key.address())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RawVin>,
    #[serde(default)]
    pub vout: Vec<RawVout>,
}

impl RawTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().map(|v| v.coinbase.is_some()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVin {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVout {
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RawScriptPubKey,
}

/// Newer nodes report `address`, older ones an `addresses` list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScriptPubKey {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RawScriptPubKey {
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or_else(|| self.addresses.as_ref().and_then(|a| a.first()).map(|s| s.as_str()))
    }
}

/// One entry of `getrawmempool true`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMempoolEntry {
    #[serde(default)]
    pub vsize: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Legacy flat fee field
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub fees: Option<RawMempoolFees>,
    /// Unix seconds the node first saw the transaction
    #[serde(default)]
    pub time: i64,
}

impl RawMempoolEntry {
    pub fn size_bytes(&self) -> u64 {
        self.vsize.or(self.size).unwrap_or(0)
    }

    pub fn fee(&self) -> f64 {
        self.fees
            .as_ref()
            .map(|f| f.base)
            .or(self.fee)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMempoolFees {
    pub base: f64,
}

/// Network totals assembled from `getmininginfo` and `gettxoutsetinfo`
#[derive(Debug, Clone, Default)]
pub struct RawChainTotals {
    pub blocks: u64,
    pub difficulty: f64,
    pub network_hashps: f64,
    pub supply: Option<f64>,
}
