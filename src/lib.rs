//! chainpulse
//!
//! Real-time data layer for a blockchain dashboard: polls a node over
//! JSON-RPC, keeps versioned snapshots of recent blocks, the mempool,
//! recently confirmed transactions and chain totals, tracks each
//! transaction from admission to confirmation, and pushes every change to
//! attached viewers over WebSocket.

pub mod cache;
pub mod config;
pub mod data_collector;
pub mod error;
pub mod hub;
pub mod poller;
pub mod rpc;
pub mod shutdown;
pub mod tracker;
pub mod types;
pub mod viewer;

// Re-export commonly used types
pub use cache::{CacheStore, DomainData, Snapshot};
pub use config::AppConfig;
pub use data_collector::{run_data_collector, Collector};
pub use hub::{Hub, ServerMessage};
pub use poller::Poller;
pub use rpc::{JsonRpcClient, NodeRpc};
pub use tracker::LifecycleTracker;
pub use types::{BlockSummary, ChainTotals, Domain, MempoolStats, TxSummary};
