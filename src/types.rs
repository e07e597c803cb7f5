//! Core data structures shared by the poller, cache, tracker and hub
//!
//! Everything here is plain data. Snapshots wrap these types and are
//! never mutated once published.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Transaction id as reported by the node (hex string)
pub type TxId = String;

/// Cache domains. Each one has its own independent version counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Blocks,
    Mempool,
    Confirmed,
    ChainTotals,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Blocks,
        Domain::Mempool,
        Domain::Confirmed,
        Domain::ChainTotals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Blocks => "blocks",
            Domain::Mempool => "mempool",
            Domain::Confirmed => "confirmed",
            Domain::ChainTotals => "chainTotals",
        }
    }

    /// Parse the path segment used by the HTTP snapshot endpoint
    pub fn from_path(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(Domain::Blocks),
            "mempool" => Some(Domain::Mempool),
            "confirmed" => Some(Domain::Confirmed),
            "chainTotals" | "chain-totals" | "chain_totals" => Some(Domain::ChainTotals),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fee priority bucket, derived from fee rate (coin per kB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriorityClass {
    High,
    Medium,
    Low,
}

impl PriorityClass {
    pub fn classify(fee_rate: Decimal, thresholds: &FeeThresholds) -> Self {
        if fee_rate >= thresholds.high {
            PriorityClass::High
        } else if fee_rate >= thresholds.medium {
            PriorityClass::Medium
        } else {
            PriorityClass::Low
        }
    }
}

/// Fee rate boundaries (coin per kB) for priority classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeThresholds {
    pub high: Decimal,
    pub medium: Decimal,
}

impl Default for FeeThresholds {
    fn default() -> Self {
        Self {
            high: Decimal::new(2, 4),   // 0.0002
            medium: Decimal::new(5, 5), // 0.00005
        }
    }
}

/// Reference to a spent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInputRef {
    /// None for coinbase inputs
    pub txid: Option<TxId>,
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub address: Option<String>,
    pub value: Decimal,
}

/// A mempool transaction as first observed. Never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub id: TxId,
    pub size_bytes: u64,
    pub fee: Decimal,
    /// Coin per kB
    pub fee_rate: Decimal,
    pub priority_class: PriorityClass,
    pub value_transferred: Decimal,
    pub first_seen_time: DateTime<Utc>,
    pub inputs: Vec<TxInputRef>,
    pub outputs: Vec<TxOutput>,
}

/// Fee per kB; zero-sized transactions report a zero rate
pub fn fee_rate_per_kb(fee: Decimal, size_bytes: u64) -> Decimal {
    if size_bytes == 0 {
        return Decimal::ZERO;
    }
    (fee * Decimal::from(1000u32) / Decimal::from(size_bytes)).normalize()
}

/// Node amounts arrive as JSON floats; go through the shortest decimal
/// representation so 0.00001 stays 0.00001
pub fn coin_amount(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    value.to_string().parse().unwrap_or(Decimal::ZERO)
}

/// A TxSummary relocated into the confirmed cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedTxRecord {
    #[serde(flatten)]
    pub tx: TxSummary,
    pub confirmed_at_height: u64,
    pub confirmed_at_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub tx_count: u64,
    pub miner_identity: String,
    pub algorithm: String,
    pub difficulty: f64,
}

/// Network-wide totals (supply, hashrate, difficulty)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTotals {
    pub height: u64,
    pub difficulty: f64,
    /// Hashes per second
    pub network_hashrate: f64,
    /// None when the node could not compute the UTXO set total this tick
    pub supply: Option<Decimal>,
    pub mempool_bytes: u64,
}

/// Aggregates recomputed from the full mempool on every publish
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolStats {
    pub count: usize,
    pub total_bytes: u64,
    pub avg_fee_rate: Decimal,
    pub high_priority_count: usize,
}

impl MempoolStats {
    pub fn compute<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a TxSummary>,
    {
        let mut stats = MempoolStats::default();
        let mut fee_rate_sum = Decimal::ZERO;

        for tx in entries {
            stats.count += 1;
            stats.total_bytes += tx.size_bytes;
            fee_rate_sum += tx.fee_rate;
            if tx.priority_class == PriorityClass::High {
                stats.high_priority_count += 1;
            }
        }

        if stats.count > 0 {
            stats.avg_fee_rate = (fee_rate_sum / Decimal::from(stats.count)).normalize();
        }
        stats
    }
}

/// The mempool domain payload: entries plus stats computed from them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolView {
    pub entries: BTreeMap<TxId, TxSummary>,
    pub stats: MempoolStats,
}

impl MempoolView {
    pub fn from_entries(entries: BTreeMap<TxId, TxSummary>) -> Self {
        let stats = MempoolStats::compute(entries.values());
        Self { entries, stats }
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.entries.contains_key(txid)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn tx(id: &str, size_bytes: u64, fee: Decimal) -> TxSummary {
        let fee_rate = fee_rate_per_kb(fee, size_bytes);
        TxSummary {
            id: id.to_string(),
            size_bytes,
            fee,
            fee_rate,
            priority_class: PriorityClass::classify(fee_rate, &FeeThresholds::default()),
            value_transferred: Decimal::ONE,
            first_seen_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    pub fn block(height: u64) -> BlockSummary {
        BlockSummary {
            height,
            hash: format!("{:064x}", height),
            timestamp: Utc.timestamp_opt(1_700_000_000 + height as i64 * 60, 0).unwrap(),
            size_bytes: 1_000,
            tx_count: 1,
            miner_identity: "unknown".to_string(),
            algorithm: "sha256d".to_string(),
            difficulty: 1.0,
        }
    }
}
