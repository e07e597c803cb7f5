//! Cache Store Module
//!
//! In-memory, versioned snapshots of the derived views (recent blocks,
//! mempool entries + stats, recently confirmed transactions, chain totals).
//! Rebuilt from the node on every process start; nothing is persisted.
//!
//! Architecture:
//!     ring.rs      - fixed-capacity window with silent eviction
//!     snapshot.rs  - Snapshot<T>, per-domain payload enums
//!     store.rs     - CacheStore (ArcSwap per domain, single writer)

pub mod ring;
pub mod snapshot;
pub mod store;

pub use ring::RingBuffer;
pub use snapshot::{AnySnapshot, BlockWindow, ConfirmedWindow, DomainData, Snapshot};
pub use store::{CacheStore, TxState, TxVersions};
