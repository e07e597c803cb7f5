//! Wire envelope: `{"type": <tag>, "data": <payload>}`
//!
//! Every payload carries the version of the domain it belongs to, so a
//! viewer can reject anything older than what it already applied.

use crate::cache::{BlockWindow, CacheStore, ConfirmedWindow, Snapshot};
use crate::error::WireError;
use crate::types::{BlockSummary, ChainTotals, Domain, MempoolView, TxId, TxSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const KNOWN_TAGS: [&str; 9] = [
    "initialData",
    "recentBlocks",
    "newBlock",
    "mempool",
    "transactionAdmitted",
    "transactionConfirmed",
    "transactionRemoved",
    "confirmedTransactions",
    "chainTotals",
];

/// Catch-up payload sent to a session right after it attaches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub blocks: Arc<Snapshot<BlockWindow>>,
    pub mempool: Arc<Snapshot<MempoolView>>,
    pub confirmed: Arc<Snapshot<ConfirmedWindow>>,
    pub chain_totals: Arc<Snapshot<ChainTotals>>,
}

impl InitialData {
    pub fn from_store(store: &CacheStore) -> Self {
        // Mempool and confirmed from the same swap
        let tx_state = store.transactions();
        Self {
            blocks: store.blocks(),
            mempool: Arc::clone(&tx_state.mempool),
            confirmed: Arc::clone(&tx_state.confirmed),
            chain_totals: store.chain_totals(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    #[serde(flatten)]
    pub block: BlockSummary,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAdmitted {
    #[serde(flatten)]
    pub tx: TxSummary,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfirmed {
    pub txid: TxId,
    pub confirmed_at_height: u64,
    pub confirmed_at_time: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRemoved {
    pub txid: TxId,
    pub version: u64,
}

/// Everything the hub ever sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    InitialData(InitialData),
    RecentBlocks(Arc<Snapshot<BlockWindow>>),
    NewBlock(NewBlock),
    Mempool(Arc<Snapshot<MempoolView>>),
    TransactionAdmitted(TransactionAdmitted),
    TransactionConfirmed(TransactionConfirmed),
    TransactionRemoved(TransactionRemoved),
    ConfirmedTransactions(Arc<Snapshot<ConfirmedWindow>>),
    ChainTotals(Arc<Snapshot<ChainTotals>>),
}

impl ServerMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::InitialData(_) => "initialData",
            ServerMessage::RecentBlocks(_) => "recentBlocks",
            ServerMessage::NewBlock(_) => "newBlock",
            ServerMessage::Mempool(_) => "mempool",
            ServerMessage::TransactionAdmitted(_) => "transactionAdmitted",
            ServerMessage::TransactionConfirmed(_) => "transactionConfirmed",
            ServerMessage::TransactionRemoved(_) => "transactionRemoved",
            ServerMessage::ConfirmedTransactions(_) => "confirmedTransactions",
            ServerMessage::ChainTotals(_) => "chainTotals",
        }
    }

    /// Owning domain; None for the all-domain catch-up
    pub fn domain(&self) -> Option<Domain> {
        match self {
            ServerMessage::InitialData(_) => None,
            ServerMessage::RecentBlocks(_) | ServerMessage::NewBlock(_) => Some(Domain::Blocks),
            ServerMessage::Mempool(_)
            | ServerMessage::TransactionAdmitted(_)
            | ServerMessage::TransactionRemoved(_) => Some(Domain::Mempool),
            ServerMessage::TransactionConfirmed(_) | ServerMessage::ConfirmedTransactions(_) => {
                Some(Domain::Confirmed)
            }
            ServerMessage::ChainTotals(_) => Some(Domain::ChainTotals),
        }
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            ServerMessage::InitialData(_) => None,
            ServerMessage::RecentBlocks(s) => Some(s.version),
            ServerMessage::NewBlock(m) => Some(m.version),
            ServerMessage::Mempool(s) => Some(s.version),
            ServerMessage::TransactionAdmitted(m) => Some(m.version),
            ServerMessage::TransactionConfirmed(m) => Some(m.version),
            ServerMessage::TransactionRemoved(m) => Some(m.version),
            ServerMessage::ConfirmedTransactions(s) => Some(s.version),
            ServerMessage::ChainTotals(s) => Some(s.version),
        }
    }

    /// Full-domain snapshot (as opposed to an incremental event)
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            ServerMessage::InitialData(_)
                | ServerMessage::RecentBlocks(_)
                | ServerMessage::Mempool(_)
                | ServerMessage::ConfirmedTransactions(_)
                | ServerMessage::ChainTotals(_)
        )
    }

    pub fn to_frame(&self) -> Result<Arc<str>, WireError> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// A decoded inbound frame. Unknown tags are kept distinct from errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Known(ServerMessage),
    Unknown { tag: String },
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(WireError::MissingTag)?
            .to_string();

        if !KNOWN_TAGS.contains(&tag.as_str()) {
            return Ok(Inbound::Unknown { tag });
        }
        serde_json::from_value(value)
            .map(Inbound::Known)
            .map_err(|source| WireError::BadPayload { tag, source })
    }
}
