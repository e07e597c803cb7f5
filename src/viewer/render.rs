//! Rendering resources
//!
//! A `RenderSurface` hands out handles (charts, tables, whatever the front
//! end draws with). `RenderSlots` owns them: one slot per view, and the only
//! way to put a handle in a slot is `install`, which releases the previous
//! handle before creating the next. Handles are moved into `release`, so a
//! released handle cannot be touched again.

use super::session::ViewerState;
use crate::error::RenderError;
use crate::types::Domain;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub trait RenderSurface {
    type Handle;

    fn create(&mut self, view: Domain, state: &ViewerState) -> Result<Self::Handle, RenderError>;

    fn release(&mut self, handle: Self::Handle);

    /// Flag a view as "may be outdated", or clear the flag. The view keeps
    /// showing its last data either way.
    fn mark_stale(&mut self, view: Domain, stale: bool);

    /// Reconnection budget is spent; stays up until the views are released
    fn mark_unavailable(&mut self);
}

pub struct RenderSlots<S: RenderSurface> {
    surface: S,
    slots: BTreeMap<Domain, S::Handle>,
}

impl<S: RenderSurface> RenderSlots<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            slots: BTreeMap::new(),
        }
    }

    /// Release the view's current handle (if any), then create its replacement.
    /// On create failure the slot is left empty.
    pub fn install(&mut self, view: Domain, state: &ViewerState) -> Result<(), RenderError> {
        if let Some(old) = self.slots.remove(&view) {
            self.surface.release(old);
        }
        let handle = self.surface.create(view, state)?;
        self.slots.insert(view, handle);
        Ok(())
    }

    /// Release every live handle; calling it again is a no-op
    pub fn release_all(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        if !slots.is_empty() {
            debug!("Releasing {} render handles", slots.len());
        }
        for (_, handle) in slots {
            self.surface.release(handle);
        }
    }

    pub fn mark_stale(&mut self, view: Domain, stale: bool) {
        self.surface.mark_stale(view, stale);
    }

    pub fn mark_unavailable(&mut self) {
        self.surface.mark_unavailable();
    }

    pub fn live_handles(&self) -> usize {
        self.slots.len()
    }

    pub fn has_view(&self, view: Domain) -> bool {
        self.slots.contains_key(&view)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: RenderSurface> Drop for RenderSlots<S> {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ── Log surface ─────────────────────────────────────────────────────────────

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, PartialEq, Eq)]
pub struct LogHandle {
    pub view: Domain,
    pub id: u64,
}

/// Headless surface: "draws" each view as a log line
#[derive(Debug, Default)]
pub struct LogSurface {
    pub created: u64,
    pub released: u64,
    /// Views currently flagged as possibly outdated
    pub stale: BTreeSet<Domain>,
    pub unavailable: bool,
}

impl RenderSurface for LogSurface {
    type Handle = LogHandle;

    fn create(&mut self, view: Domain, state: &ViewerState) -> Result<LogHandle, RenderError> {
        let line = match view {
            Domain::Blocks => state.blocks.as_ref().map(|s| {
                match s.data.newest() {
                    Some(b) => format!(
                        "v{} | {} blocks | tip {} by {} ({} txs, {})",
                        s.version,
                        s.data.len(),
                        b.height,
                        b.miner_identity,
                        b.tx_count,
                        b.algorithm
                    ),
                    None => format!("v{} | no blocks yet", s.version),
                }
            }),
            Domain::Mempool => state.mempool.as_ref().map(|s| {
                let stats = &s.data.stats;
                format!(
                    "v{} | {} txs | {} bytes | avg fee rate {} | {} high priority",
                    s.version, stats.count, stats.total_bytes, stats.avg_fee_rate, stats.high_priority_count
                )
            }),
            Domain::Confirmed => state.confirmed.as_ref().map(|s| {
                let latest = s
                    .data
                    .newest()
                    .map(|r| format!("{} @ {}", r.tx.id, r.confirmed_at_height))
                    .unwrap_or_else(|| "-".to_string());
                format!("v{} | {} confirmed | latest {}", s.version, s.data.len(), latest)
            }),
            Domain::ChainTotals => state.chain_totals.as_ref().map(|s| {
                let supply = s
                    .data
                    .supply
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                format!(
                    "v{} | height {} | difficulty {:.2} | hashrate {:.2} H/s | supply {}",
                    s.version, s.data.height, s.data.difficulty, s.data.network_hashrate, supply
                )
            }),
        };

        let Some(line) = line else {
            warn!("Nothing to render for {} yet", view);
            return Err(RenderError {
                view: view.to_string(),
                reason: "no snapshot applied".to_string(),
            });
        };

        info!("[{}] {}", view, line);
        self.created += 1;
        Ok(LogHandle {
            view,
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn release(&mut self, handle: LogHandle) {
        debug!("Released {} handle #{}", handle.view, handle.id);
        self.released += 1;
    }

    fn mark_stale(&mut self, view: Domain, stale: bool) {
        if stale {
            if self.stale.insert(view) {
                warn!("[{}] may be outdated", view);
            }
        } else if self.stale.remove(&view) {
            info!("[{}] up to date", view);
        }
    }

    fn mark_unavailable(&mut self) {
        if !self.unavailable {
            self.unavailable = true;
            warn!("Live data unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BlockWindow, Snapshot};
    use crate::types::fixtures::block;
    use std::sync::Arc;

    /// Surface that tracks how many handles are alive at once
    #[derive(Default)]
    struct CountingSurface {
        live: i64,
        max_live_per_view: BTreeMap<Domain, i64>,
        live_per_view: BTreeMap<Domain, i64>,
        fail_next: bool,
    }

    impl RenderSurface for CountingSurface {
        type Handle = Domain;

        fn create(&mut self, view: Domain, _: &ViewerState) -> Result<Domain, RenderError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(RenderError {
                    view: view.to_string(),
                    reason: "boom".to_string(),
                });
            }
            self.live += 1;
            let n = self.live_per_view.entry(view).or_default();
            *n += 1;
            let max = self.max_live_per_view.entry(view).or_default();
            *max = (*max).max(*n);
            Ok(view)
        }

        fn release(&mut self, handle: Domain) {
            self.live -= 1;
            *self.live_per_view.entry(handle).or_default() -= 1;
        }

        fn mark_stale(&mut self, _: Domain, _: bool) {}

        fn mark_unavailable(&mut self) {}
    }

    #[test]
    fn test_release_before_create() {
        let mut slots = RenderSlots::new(CountingSurface::default());
        let state = ViewerState::default();

        for _ in 0..5 {
            slots.install(Domain::Blocks, &state).unwrap();
            slots.install(Domain::Mempool, &state).unwrap();
        }
        assert_eq!(slots.live_handles(), 2);
        assert_eq!(slots.surface().live, 2);
        assert!(slots.surface().max_live_per_view.values().all(|&m| m == 1));
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let mut slots = RenderSlots::new(CountingSurface::default());
        let state = ViewerState::default();
        slots.install(Domain::Blocks, &state).unwrap();
        slots.install(Domain::ChainTotals, &state).unwrap();

        slots.release_all();
        slots.release_all();
        assert_eq!(slots.live_handles(), 0);
        assert_eq!(slots.surface().live, 0);
    }

    #[test]
    fn test_failed_create_leaves_slot_empty() {
        let mut slots = RenderSlots::new(CountingSurface::default());
        let state = ViewerState::default();
        slots.install(Domain::Blocks, &state).unwrap();

        slots.surface.fail_next = true;
        assert!(slots.install(Domain::Blocks, &state).is_err());
        assert!(!slots.has_view(Domain::Blocks));
        assert_eq!(slots.surface().live, 0);
    }

    #[test]
    fn test_log_surface_needs_data() {
        let mut surface = LogSurface::default();
        let mut state = ViewerState::default();
        assert!(surface.create(Domain::Blocks, &state).is_err());

        let mut window = BlockWindow::new(10);
        window.push(block(9));
        state.blocks = Some(Arc::new(Snapshot::new(1, window)));
        let handle = surface.create(Domain::Blocks, &state).unwrap();
        assert_eq!(handle.view, Domain::Blocks);

        surface.release(handle);
        assert_eq!((surface.created, surface.released), (1, 1));
    }

    #[test]
    fn test_log_surface_stale_flags() {
        let mut slots = RenderSlots::new(LogSurface::default());
        slots.mark_stale(Domain::Mempool, true);
        slots.mark_stale(Domain::Mempool, true);
        slots.mark_stale(Domain::Blocks, false);
        assert_eq!(slots.surface().stale.iter().copied().collect::<Vec<_>>(), vec![Domain::Mempool]);

        slots.mark_stale(Domain::Mempool, false);
        assert!(slots.surface().stale.is_empty());

        slots.mark_unavailable();
        assert!(slots.surface().unavailable);
    }
}
