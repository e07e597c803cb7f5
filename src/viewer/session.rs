//! Client-side session: applies inbound envelopes, tracks per-domain
//! staleness and drives the render slots.

use super::reconnect::{ConnectionState, Decision, ReconnectPolicy, Reconnector};
use super::render::{RenderSlots, RenderSurface};
use crate::cache::{BlockWindow, ConfirmedWindow, Snapshot};
use crate::hub::{Inbound, ServerMessage};
use crate::types::{ChainTotals, Domain, MempoolView};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Latest applied snapshot per domain. Survives disconnects.
#[derive(Debug, Clone, Default)]
pub struct ViewerState {
    pub blocks: Option<Arc<Snapshot<BlockWindow>>>,
    pub mempool: Option<Arc<Snapshot<MempoolView>>>,
    pub confirmed: Option<Arc<Snapshot<ConfirmedWindow>>>,
    pub chain_totals: Option<Arc<Snapshot<ChainTotals>>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DomainStatus {
    applied_version: Option<u64>,
    last_message: Option<Instant>,
    stale: bool,
}

/// Result of handling one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Snapshots replaced (and re-rendered) for these domains
    Snapshots(Vec<Domain>),
    /// Incremental event accepted as a notification
    Event { tag: &'static str, domain: Domain },
    /// Version at or below what was already applied
    Outdated { domain: Domain, version: u64 },
    Unknown(String),
    Malformed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub frames: u64,
    pub outdated: u64,
    pub unknown: u64,
    pub malformed: u64,
}

pub struct ViewerSession<S: RenderSurface> {
    reconnector: Reconnector,
    state: ViewerState,
    status: BTreeMap<Domain, DomainStatus>,
    slots: RenderSlots<S>,
    stale_after: Duration,
    opened_at: Option<Instant>,
    pub counters: SessionCounters,
}

impl<S: RenderSurface> ViewerSession<S> {
    pub fn new(surface: S, policy: ReconnectPolicy, stale_after: Duration) -> Self {
        Self {
            reconnector: Reconnector::new(policy),
            state: ViewerState::default(),
            status: Domain::ALL.iter().map(|d| (*d, DomainStatus::default())).collect(),
            slots: RenderSlots::new(surface),
            stale_after,
            opened_at: None,
            counters: SessionCounters::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnector.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnector.attempts()
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn slots(&self) -> &RenderSlots<S> {
        &self.slots
    }

    pub fn applied_version(&self, domain: Domain) -> Option<u64> {
        self.status.get(&domain).and_then(|s| s.applied_version)
    }

    pub fn is_stale(&self, domain: Domain) -> bool {
        self.status.get(&domain).map(|s| s.stale).unwrap_or(false)
    }

    pub fn on_connecting(&mut self) {
        self.reconnector.on_connecting();
    }

    /// A fresh connection is a fresh hub session with its own version
    /// sequence, so the version guard starts over. Data is kept.
    pub fn on_open(&mut self, now: Instant) {
        self.reconnector.on_open();
        self.opened_at = Some(now);
        for status in self.status.values_mut() {
            status.applied_version = None;
        }
    }

    /// Decide whether to reconnect. While a retry is pending the views stay
    /// up with their last data; they are released only once the connection
    /// is over for good.
    pub fn on_close(&mut self, code: u16) -> Decision {
        self.opened_at = None;
        let decision = self.reconnector.on_close(code);
        match decision {
            Decision::RetryAfter(_) => {}
            Decision::GiveUp => {
                self.slots.mark_unavailable();
                self.slots.release_all();
            }
            Decision::Stop => self.slots.release_all(),
        }
        decision
    }

    pub fn handle_text(&mut self, text: &str, now: Instant) -> Applied {
        self.counters.frames += 1;
        match Inbound::decode(text) {
            Ok(Inbound::Known(msg)) => self.apply(msg, now),
            Ok(Inbound::Unknown { tag }) => {
                self.counters.unknown += 1;
                debug!("Ignoring unknown message type {}", tag);
                Applied::Unknown(tag)
            }
            Err(e) => {
                self.counters.malformed += 1;
                warn!("Ignoring malformed frame: {}", e);
                Applied::Malformed
            }
        }
    }

    fn apply(&mut self, msg: ServerMessage, now: Instant) -> Applied {
        match msg {
            ServerMessage::InitialData(data) => {
                let mut applied = Vec::new();
                if self.accept_snapshot(Domain::Blocks, data.blocks.version, now) {
                    self.state.blocks = Some(data.blocks);
                    applied.push(Domain::Blocks);
                }
                if self.accept_snapshot(Domain::Mempool, data.mempool.version, now) {
                    self.state.mempool = Some(data.mempool);
                    applied.push(Domain::Mempool);
                }
                if self.accept_snapshot(Domain::Confirmed, data.confirmed.version, now) {
                    self.state.confirmed = Some(data.confirmed);
                    applied.push(Domain::Confirmed);
                }
                if self.accept_snapshot(Domain::ChainTotals, data.chain_totals.version, now) {
                    self.state.chain_totals = Some(data.chain_totals);
                    applied.push(Domain::ChainTotals);
                }
                info!("Caught up on {} domains", applied.len());
                self.render(&applied);
                Applied::Snapshots(applied)
            }
            ServerMessage::RecentBlocks(snapshot) => {
                self.snapshot(Domain::Blocks, snapshot.version, now, |state| {
                    state.blocks = Some(snapshot)
                })
            }
            ServerMessage::Mempool(snapshot) => {
                self.snapshot(Domain::Mempool, snapshot.version, now, |state| {
                    state.mempool = Some(snapshot)
                })
            }
            ServerMessage::ConfirmedTransactions(snapshot) => {
                self.snapshot(Domain::Confirmed, snapshot.version, now, |state| {
                    state.confirmed = Some(snapshot)
                })
            }
            ServerMessage::ChainTotals(snapshot) => {
                self.snapshot(Domain::ChainTotals, snapshot.version, now, |state| {
                    state.chain_totals = Some(snapshot)
                })
            }
            event => self.event(event, now),
        }
    }

    fn snapshot<F>(&mut self, domain: Domain, version: u64, now: Instant, store: F) -> Applied
    where
        F: FnOnce(&mut ViewerState),
    {
        if !self.accept_snapshot(domain, version, now) {
            return Applied::Outdated { domain, version };
        }
        store(&mut self.state);
        self.render(&[domain]);
        Applied::Snapshots(vec![domain])
    }

    /// Events never move the version guard; they only have to be no older
    /// than the snapshot already applied
    fn event(&mut self, msg: ServerMessage, now: Instant) -> Applied {
        let (Some(domain), Some(version)) = (msg.domain(), msg.version()) else {
            return Applied::Malformed;
        };
        if self.applied_version(domain).is_some_and(|applied| version < applied) {
            self.counters.outdated += 1;
            return Applied::Outdated { domain, version };
        }

        match &msg {
            ServerMessage::NewBlock(m) => {
                info!("New block {} by {}", m.block.height, m.block.miner_identity)
            }
            ServerMessage::TransactionConfirmed(m) => {
                debug!("{} confirmed at {}", m.txid, m.confirmed_at_height)
            }
            ServerMessage::TransactionRemoved(m) => debug!("{} dropped from mempool", m.txid),
            ServerMessage::TransactionAdmitted(m) => debug!("{} admitted", m.tx.id),
            _ => {}
        }
        self.touch(domain, now);
        Applied::Event {
            tag: msg.tag(),
            domain,
        }
    }

    fn accept_snapshot(&mut self, domain: Domain, version: u64, now: Instant) -> bool {
        let status = self.status.entry(domain).or_default();
        if status.applied_version.is_some_and(|applied| version <= applied) {
            self.counters.outdated += 1;
            debug!("Rejected {} v{} (have v{:?})", domain, version, status.applied_version);
            return false;
        }
        status.applied_version = Some(version);
        self.touch(domain, now);
        true
    }

    fn touch(&mut self, domain: Domain, now: Instant) {
        let status = self.status.entry(domain).or_default();
        status.last_message = Some(now);
        if status.stale {
            status.stale = false;
            info!("{} is fresh again", domain);
            self.slots.mark_stale(domain, false);
        }
    }

    fn render(&mut self, domains: &[Domain]) {
        for domain in domains {
            if let Err(e) = self.slots.install(*domain, &self.state) {
                warn!("{}", e);
            }
        }
    }

    /// Mark domains with no message within `stale_after` as stale and flag
    /// their views. Works while disconnected too.
    /// Returns the domains that just became stale; their data is kept.
    pub fn check_staleness(&mut self, now: Instant) -> Vec<Domain> {
        let mut newly_stale = Vec::new();
        for (domain, status) in self.status.iter_mut() {
            let Some(since) = status.last_message.or(self.opened_at) else {
                continue;
            };
            if !status.stale && now.saturating_duration_since(since) > self.stale_after {
                status.stale = true;
                warn!("{} is stale (no update for {:?})", domain, now.saturating_duration_since(since));
                newly_stale.push(*domain);
            }
        }
        for domain in &newly_stale {
            self.slots.mark_stale(*domain, true);
        }
        newly_stale
    }

    /// Release every render handle; safe to call repeatedly
    pub fn teardown(&mut self) {
        self.slots.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, DomainData};
    use crate::hub::envelope::{InitialData, TransactionConfirmed};
    use crate::types::fixtures::block;
    use crate::viewer::render::LogSurface;

    fn session() -> ViewerSession<LogSurface> {
        ViewerSession::new(
            LogSurface::default(),
            ReconnectPolicy::default(),
            Duration::from_secs(90),
        )
    }

    fn frame(msg: ServerMessage) -> String {
        msg.to_frame().unwrap().to_string()
    }

    fn store_with_blocks(heights: &[u64]) -> CacheStore {
        let store = CacheStore::new(10, 50);
        for h in heights {
            let mut window = store.blocks().data.clone();
            window.push(block(*h));
            store.publish(DomainData::Blocks(window));
        }
        store
    }

    #[test]
    fn test_initial_data_renders_every_domain() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);

        let applied = s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), now);
        assert_eq!(applied, Applied::Snapshots(Domain::ALL.to_vec()));
        assert_eq!(s.applied_version(Domain::Blocks), Some(1));
        assert_eq!(s.slots().live_handles(), 4);
    }

    #[test]
    fn test_older_snapshot_rejected() {
        let store = store_with_blocks(&[1, 2]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);

        let v2 = frame(ServerMessage::RecentBlocks(store.blocks()));
        assert_eq!(s.handle_text(&v2, now), Applied::Snapshots(vec![Domain::Blocks]));
        // Same version again is not applied
        assert_eq!(
            s.handle_text(&v2, now),
            Applied::Outdated {
                domain: Domain::Blocks,
                version: 2
            }
        );
        assert_eq!(s.counters.outdated, 1);
        assert_eq!(s.slots().live_handles(), 1);
    }

    #[test]
    fn test_event_older_than_snapshot_rejected() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), now);
        let confirmed = frame(ServerMessage::ConfirmedTransactions(Arc::new(Snapshot::new(
            4,
            ConfirmedWindow::new(50),
        ))));
        s.handle_text(&confirmed, now);

        let old = |version| {
            frame(ServerMessage::TransactionConfirmed(TransactionConfirmed {
                txid: "a".to_string(),
                confirmed_at_height: 1,
                confirmed_at_time: block(1).timestamp,
                version,
            }))
        };
        assert!(matches!(s.handle_text(&old(3), now), Applied::Outdated { .. }));
        assert!(matches!(s.handle_text(&old(4), now), Applied::Event { .. }));
    }

    #[test]
    fn test_malformed_and_unknown_leave_state_alone() {
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);

        assert_eq!(s.handle_text("{oops", now), Applied::Malformed);
        assert_eq!(
            s.handle_text(r#"{"type":"newBlock","data":{"height":"x"}}"#, now),
            Applied::Malformed
        );
        assert_eq!(
            s.handle_text(r#"{"type":"peerCount","data":1}"#, now),
            Applied::Unknown("peerCount".to_string())
        );
        assert_eq!(s.counters.malformed, 2);
        assert_eq!(s.counters.unknown, 1);
        assert!(s.state().blocks.is_none());
        assert_eq!(s.connection_state(), ConnectionState::Open);
    }

    #[test]
    fn test_staleness_marks_and_clears() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let start = Instant::now();
        s.on_open(start);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), start);

        assert!(s.check_staleness(start + Duration::from_secs(60)).is_empty());

        let late = start + Duration::from_secs(91);
        let stale = s.check_staleness(late);
        assert_eq!(stale, Domain::ALL.to_vec());
        assert!(s.is_stale(Domain::Blocks));
        // Reported once
        assert!(s.check_staleness(late).is_empty());
        // Data retained
        assert!(s.state().blocks.is_some());

        store.publish(DomainData::Blocks(store.blocks().data.clone()));
        s.handle_text(&frame(ServerMessage::RecentBlocks(store.blocks())), late);
        assert!(!s.is_stale(Domain::Blocks));
        assert!(s.is_stale(Domain::Mempool));
    }

    #[test]
    fn test_transient_close_keeps_views_up() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), now);
        assert_eq!(s.slots().live_handles(), 4);

        assert!(matches!(s.on_close(1006), Decision::RetryAfter(_)));
        assert_eq!(s.slots().live_handles(), 4);
        assert_eq!(s.slots().surface().released, 0);
        assert!(s.state().blocks.is_some());

        // Reconnect to a fresh hub: versions restart and are accepted
        s.on_open(now);
        let fresh = CacheStore::new(10, 50);
        let applied = s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&fresh))), now);
        assert_eq!(applied, Applied::Snapshots(Domain::ALL.to_vec()));
        // Replaced, not duplicated
        assert_eq!(s.slots().live_handles(), 4);
        assert_eq!(s.slots().surface().released, 4);
    }

    #[test]
    fn test_stale_views_flagged_while_disconnected() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let start = Instant::now();
        s.on_open(start);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), start);

        assert!(matches!(s.on_close(1006), Decision::RetryAfter(_)));
        let stale = s.check_staleness(start + Duration::from_secs(91));
        assert_eq!(stale, Domain::ALL.to_vec());

        let surface = s.slots().surface();
        assert_eq!(surface.stale.len(), 4);
        assert!(!surface.unavailable);
        // Still showing the last data
        assert_eq!(s.slots().live_handles(), 4);

        // Fresh data clears the flag for that view only
        let later = start + Duration::from_secs(95);
        s.on_open(later);
        s.handle_text(&frame(ServerMessage::RecentBlocks(store.blocks())), later);
        let surface = s.slots().surface();
        assert!(!surface.stale.contains(&Domain::Blocks));
        assert!(surface.stale.contains(&Domain::Mempool));
    }

    #[test]
    fn test_spent_budget_marks_unavailable_then_releases() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), now);

        for _ in 0..3 {
            assert!(matches!(s.on_close(1006), Decision::RetryAfter(_)));
            assert!(!s.slots().surface().unavailable);
            s.on_connecting();
        }
        assert_eq!(s.on_close(1006), Decision::GiveUp);
        assert_eq!(s.connection_state(), ConnectionState::Unavailable);
        assert!(s.slots().surface().unavailable);
        assert_eq!(s.slots().live_handles(), 0);
        assert_eq!(s.slots().surface().released, 4);
        // Idempotent
        s.teardown();
        assert_eq!(s.slots().surface().released, 4);
    }

    #[test]
    fn test_normal_close_releases_views() {
        let store = store_with_blocks(&[1]);
        let mut s = session();
        let now = Instant::now();
        s.on_open(now);
        s.handle_text(&frame(ServerMessage::InitialData(InitialData::from_store(&store))), now);

        assert_eq!(s.on_close(1000), Decision::Stop);
        assert_eq!(s.slots().live_handles(), 0);
        assert!(!s.slots().surface().unavailable);
        assert!(s.state().blocks.is_some());
    }
}
