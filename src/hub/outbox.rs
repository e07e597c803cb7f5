//! Bounded per-session outbox
//!
//! Publishing never blocks. When the queue is full the oldest undelivered
//! frame of the incoming frame's own domain is dropped: incremental events
//! first, and a queued snapshot only when a newer snapshot replaces it.
//! Frames of other domains and the catch-up frame are never dropped; if
//! nothing of the same domain can go, the queue runs over capacity, by at
//! most two frames per domain.

use crate::types::Domain;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// WebSocket close code sent when the server goes away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One serialized message, shared by every session it is queued on
#[derive(Debug, Clone)]
pub struct Frame {
    /// None for the catch-up frame
    pub domain: Option<Domain>,
    /// Full-domain snapshot rather than an incremental event
    pub snapshot: bool,
    pub text: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(Arc<str>),
    Close(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after dropping an older frame of the same domain
    DroppedOldest,
    /// Queued past capacity; nothing of the same domain could be dropped
    OverCapacity,
    Closed,
}

#[derive(Default)]
struct OutboxState {
    frames: VecDeque<Frame>,
    close_code: Option<u16>,
    dropped: u64,
}

pub struct SessionOutbox {
    state: Mutex<OutboxState>,
    notify: Notify,
    capacity: usize,
}

impl SessionOutbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(OutboxState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.close_code.is_some() {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if state.frames.len() >= self.capacity {
            match Self::victim(&state.frames, &frame) {
                Some(victim) => {
                    state.frames.remove(victim);
                    state.dropped += 1;
                    outcome = PushOutcome::DroppedOldest;
                }
                None => outcome = PushOutcome::OverCapacity,
            }
        }
        state.frames.push_back(frame);
        drop(state);

        self.notify.notify_one();
        outcome
    }

    /// Oldest same-domain event, else (for an incoming snapshot) the oldest
    /// same-domain snapshot it supersedes
    fn victim(frames: &VecDeque<Frame>, incoming: &Frame) -> Option<usize> {
        let domain = incoming.domain?;
        frames
            .iter()
            .position(|f| f.domain == Some(domain) && !f.snapshot)
            .or_else(|| {
                incoming
                    .snapshot
                    .then(|| frames.iter().position(|f| f.domain == Some(domain)))
                    .flatten()
            })
    }

    /// Next thing to write to the socket. A close wins over pending frames.
    pub async fn next(&self) -> Outgoing {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(code) = state.close_code {
                    return Outgoing::Close(code);
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Outgoing::Frame(frame.text);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Idempotent; the first code sticks
    pub fn close(&self, code: u16) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.close_code.is_none() {
            state.close_code = Some(code);
            state.frames.clear();
        }
        drop(state);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close_code
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded because the session fell behind
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq};

    fn frame(domain: Option<Domain>, text: &str) -> Frame {
        Frame {
            domain,
            snapshot: false,
            text: Arc::from(text),
        }
    }

    fn snapshot(domain: Option<Domain>, text: &str) -> Frame {
        Frame {
            snapshot: true,
            ..frame(domain, text)
        }
    }

    async fn drain(outbox: &SessionOutbox) -> Vec<String> {
        let mut out = Vec::new();
        while !outbox.is_empty() {
            if let Outgoing::Frame(text) = outbox.next().await {
                out.push(text.to_string());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_same_domain() {
        let outbox = SessionOutbox::new(3);
        outbox.push(frame(Some(Domain::Mempool), "m1"));
        outbox.push(frame(Some(Domain::Blocks), "b1"));
        outbox.push(frame(Some(Domain::Mempool), "m2"));

        assert_eq!(
            outbox.push(frame(Some(Domain::Mempool), "m3")),
            PushOutcome::DroppedOldest
        );
        assert_eq!(drain(&outbox).await, vec!["b1", "m2", "m3"]);
        assert_eq!(outbox.dropped(), 1);
    }

    #[tokio::test]
    async fn test_other_domains_and_catch_up_are_never_dropped() {
        let outbox = SessionOutbox::new(2);
        outbox.push(snapshot(None, "init"));
        outbox.push(snapshot(Some(Domain::Blocks), "blocks"));

        assert_eq!(
            outbox.push(snapshot(Some(Domain::Mempool), "mempool")),
            PushOutcome::OverCapacity
        );
        assert_eq!(
            outbox.push(snapshot(Some(Domain::ChainTotals), "totals")),
            PushOutcome::OverCapacity
        );
        assert_eq!(outbox.dropped(), 0);
        assert_eq!(drain(&outbox).await, vec!["init", "blocks", "mempool", "totals"]);
    }

    #[tokio::test]
    async fn test_events_go_before_snapshots() {
        let outbox = SessionOutbox::new(3);
        outbox.push(snapshot(Some(Domain::Mempool), "m-snap1"));
        outbox.push(frame(Some(Domain::Mempool), "admit-a"));
        outbox.push(frame(Some(Domain::Mempool), "admit-b"));

        // An event never displaces the only snapshot of its domain
        assert_eq!(
            outbox.push(frame(Some(Domain::Mempool), "admit-c")),
            PushOutcome::DroppedOldest
        );
        assert_eq!(
            outbox.push(snapshot(Some(Domain::Mempool), "m-snap2")),
            PushOutcome::DroppedOldest
        );
        assert_eq!(
            outbox.push(snapshot(Some(Domain::Mempool), "m-snap3")),
            PushOutcome::DroppedOldest
        );
        assert_eq!(drain(&outbox).await, vec!["m-snap1", "m-snap2", "m-snap3"]);
    }

    #[tokio::test]
    async fn test_event_with_only_snapshot_queued_overruns() {
        let outbox = SessionOutbox::new(1);
        outbox.push(snapshot(Some(Domain::Blocks), "recent"));

        assert_eq!(
            outbox.push(frame(Some(Domain::Blocks), "new-block")),
            PushOutcome::OverCapacity
        );
        // A second event replaces the first, the overrun does not grow
        assert_eq!(
            outbox.push(frame(Some(Domain::Blocks), "new-block-2")),
            PushOutcome::DroppedOldest
        );
        assert_eq!(drain(&outbox).await, vec!["recent", "new-block-2"]);
    }

    #[tokio::test]
    async fn test_close_wins_and_rejects_pushes() {
        let outbox = SessionOutbox::new(4);
        outbox.push(frame(Some(Domain::Blocks), "b1"));
        outbox.close(CLOSE_GOING_AWAY);
        outbox.close(1000);

        assert_eq!(outbox.next().await, Outgoing::Close(CLOSE_GOING_AWAY));
        assert_eq!(outbox.push(frame(Some(Domain::Blocks), "b2")), PushOutcome::Closed);
        assert!(outbox.is_closed());
    }

    #[tokio::test]
    async fn test_waiting_reader_is_woken() {
        let outbox = Arc::new(SessionOutbox::new(4));
        let reader = {
            let outbox = Arc::clone(&outbox);
            tokio::spawn(async move { outbox.next().await })
        };
        tokio::task::yield_now().await;
        outbox.push(frame(Some(Domain::Mempool), "m1"));

        assert_eq!(reader.await.unwrap(), Outgoing::Frame(Arc::from("m1")));
    }

    #[test]
    fn test_pending_reader_woken_by_push_and_close() {
        let outbox = SessionOutbox::new(4);

        let mut next = tokio_test::task::spawn(outbox.next());
        assert_pending!(next.poll());
        outbox.push(frame(Some(Domain::Mempool), "m1"));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Outgoing::Frame(Arc::from("m1")));

        let mut next = tokio_test::task::spawn(outbox.next());
        assert_pending!(next.poll());
        outbox.close(CLOSE_GOING_AWAY);
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Outgoing::Close(CLOSE_GOING_AWAY));
    }
}
