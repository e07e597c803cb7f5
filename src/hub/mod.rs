//! Fan-out Hub
//!
//! Purpose:
//!     Turns cache changes into wire frames and pushes them to every attached
//!     viewer session. Each message is serialized exactly once; all sessions
//!     share the same `Arc<str>`.
//!
//! Architecture:
//!     envelope.rs - ServerMessage tagged union + inbound decoding
//!     outbox.rs   - bounded per-session queue (drop-oldest, never blocks)
//!     server.rs   - axum router: /ws, /api/:domain, /health
//!
//! Ordering:
//!     Attach (catch-up read + registration) and broadcast hold the same
//!     fan-out lock, so a session never receives a frame older than its
//!     initialData.

pub mod envelope;
pub mod outbox;
pub mod server;

pub use envelope::{Inbound, InitialData, ServerMessage, KNOWN_TAGS};
pub use outbox::{Frame, Outgoing, PushOutcome, SessionOutbox, CLOSE_GOING_AWAY};

use crate::cache::CacheStore;
use crate::types::Domain;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

pub type SessionId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubHealth {
    pub sessions: usize,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub versions: BTreeMap<Domain, u64>,
}

pub struct Hub {
    store: Arc<CacheStore>,
    sessions: DashMap<SessionId, Arc<SessionOutbox>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    fanout: Mutex<()>,
    frames_published: AtomicU64,
    /// Drops from sessions that have since detached
    frames_dropped: AtomicU64,
}

impl Hub {
    pub fn new(store: Arc<CacheStore>, queue_capacity: usize) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity,
            fanout: Mutex::new(()),
            frames_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Register a session and queue its catch-up frame
    pub fn attach(&self) -> (SessionId, Arc<SessionOutbox>) {
        let _guard = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outbox = Arc::new(SessionOutbox::new(self.queue_capacity));

        let catch_up = ServerMessage::InitialData(InitialData::from_store(&self.store));
        match catch_up.to_frame() {
            Ok(text) => {
                outbox.push(Frame {
                    domain: None,
                    snapshot: true,
                    text,
                });
            }
            Err(e) => error!("Failed to serialize initialData for session {}: {}", id, e),
        }

        self.sessions.insert(id, Arc::clone(&outbox));
        info!("Session {} attached ({} total)", id, self.sessions.len());
        (id, outbox)
    }

    /// Safe to call more than once, and while frames are in flight
    pub fn detach(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, outbox)) => {
                outbox.close(1000);
                self.frames_dropped.fetch_add(outbox.dropped(), Ordering::Relaxed);
                info!("Session {} detached ({} remaining)", id, self.sessions.len());
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Serialize each message once and queue it on every session.
    /// Returns the number of frames produced.
    pub fn publish(&self, messages: &[ServerMessage]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        let _guard = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);

        let mut produced = 0;
        for msg in messages {
            let text = match msg.to_frame() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize {}: {}", msg.tag(), e);
                    continue;
                }
            };
            produced += 1;

            for session in self.sessions.iter() {
                let frame = Frame {
                    domain: msg.domain(),
                    snapshot: msg.is_snapshot(),
                    text: Arc::clone(&text),
                };
                match session.value().push(frame) {
                    PushOutcome::DroppedOldest => {
                        debug!("Session {} behind, dropped an older {} frame", session.key(), msg.tag())
                    }
                    PushOutcome::OverCapacity => {
                        debug!("Session {} behind, queued {} over capacity", session.key(), msg.tag())
                    }
                    PushOutcome::Queued | PushOutcome::Closed => {}
                }
            }
        }

        self.frames_published.fetch_add(produced as u64, Ordering::Relaxed);
        produced
    }

    /// Close every session with 1001 so viewers reconnect elsewhere
    pub fn shutdown(&self) {
        let _guard = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        let count = self.sessions.len();
        for session in self.sessions.iter() {
            session.value().close(CLOSE_GOING_AWAY);
        }
        self.sessions.clear();
        info!("Hub shut down, closed {} sessions", count);
    }

    pub fn health(&self) -> HubHealth {
        let live_dropped: u64 = self.sessions.iter().map(|s| s.value().dropped()).sum();
        HubHealth {
            sessions: self.sessions.len(),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed) + live_dropped,
            versions: Domain::ALL
                .iter()
                .map(|d| (*d, self.store.version(*d)))
                .collect(),
        }
    }
}
