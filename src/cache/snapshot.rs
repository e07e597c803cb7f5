//! Versioned, immutable snapshots

use super::ring::RingBuffer;
use crate::types::{BlockSummary, ChainTotals, ConfirmedTxRecord, Domain, MempoolView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type BlockWindow = RingBuffer<BlockSummary>;
pub type ConfirmedWindow = RingBuffer<ConfirmedTxRecord>;

/// One domain's truth at one version. Held behind `Arc`, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    pub data: T,
}

impl<T> Snapshot<T> {
    pub fn new(version: u64, data: T) -> Self {
        Self {
            version,
            published_at: Utc::now(),
            data,
        }
    }
}

/// Payload handed to `CacheStore::publish`
#[derive(Debug, Clone)]
pub enum DomainData {
    Blocks(BlockWindow),
    Mempool(MempoolView),
    Confirmed(ConfirmedWindow),
    ChainTotals(ChainTotals),
}

impl DomainData {
    pub fn domain(&self) -> Domain {
        match self {
            DomainData::Blocks(_) => Domain::Blocks,
            DomainData::Mempool(_) => Domain::Mempool,
            DomainData::Confirmed(_) => Domain::Confirmed,
            DomainData::ChainTotals(_) => Domain::ChainTotals,
        }
    }
}

/// A snapshot of any domain, as returned by `CacheStore::current`
#[derive(Debug, Clone)]
pub enum AnySnapshot {
    Blocks(Arc<Snapshot<BlockWindow>>),
    Mempool(Arc<Snapshot<MempoolView>>),
    Confirmed(Arc<Snapshot<ConfirmedWindow>>),
    ChainTotals(Arc<Snapshot<ChainTotals>>),
}

impl AnySnapshot {
    pub fn domain(&self) -> Domain {
        match self {
            AnySnapshot::Blocks(_) => Domain::Blocks,
            AnySnapshot::Mempool(_) => Domain::Mempool,
            AnySnapshot::Confirmed(_) => Domain::Confirmed,
            AnySnapshot::ChainTotals(_) => Domain::ChainTotals,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            AnySnapshot::Blocks(s) => s.version,
            AnySnapshot::Mempool(s) => s.version,
            AnySnapshot::Confirmed(s) => s.version,
            AnySnapshot::ChainTotals(s) => s.version,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            AnySnapshot::Blocks(s) => serde_json::to_value(s.as_ref()),
            AnySnapshot::Mempool(s) => serde_json::to_value(s.as_ref()),
            AnySnapshot::Confirmed(s) => serde_json::to_value(s.as_ref()),
            AnySnapshot::ChainTotals(s) => serde_json::to_value(s.as_ref()),
        }
    }
}
