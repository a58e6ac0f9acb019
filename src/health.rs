//! Process-wide freshness state and the published snapshot.
//!
//! ```text
//! Cold -> Fetching -> {Fresh | Degraded} -> Fetching -> ...
//! ```
//!
//! One short-lived mutex guards the current snapshot and the state; readers
//! copy an `Arc` out and never hold the lock across I/O. Staleness is checked
//! lazily by whoever reads.

use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FreshnessState {
    Cold,
    Fetching,
    Fresh,
    Degraded,
}

/// Receives human-facing warm-up text at cycle checkpoints.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

/// The sole read API for presentation layers.
#[derive(Debug, Clone)]
pub struct Published {
    pub snapshot: Option<Arc<Snapshot>>,
    pub state: FreshnessState,
}

impl Published {
    /// True when consumers should show a "not yet available / stale" notice.
    pub fn is_stale(&self) -> bool {
        !matches!(self.state, FreshnessState::Fresh)
    }
}

/// Operational view for health probes.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: FreshnessState,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u128>,
    pub last_success: Option<DateTime<Utc>>,
    pub snapshot_generated_at: Option<DateTime<Utc>>,
    pub progress: String,
}

struct TrackerState {
    state: FreshnessState,
    snapshot: Option<Arc<Snapshot>>,
    last_error: Option<String>,
    last_duration: Option<Duration>,
    last_success: Option<DateTime<Utc>>,
    /// State to fall back to if a cycle is skipped without completing.
    before_fetch: FreshnessState,
    progress: String,
}

pub struct FreshnessTracker {
    inner: Mutex<TrackerState>,
    cycle_running: AtomicBool,
    staleness: chrono::Duration,
}

/// Held for the duration of one refresh cycle.
///
/// Dropping it without calling [`CycleGuard::complete`] or
/// [`CycleGuard::fail`] restores the state from before the cycle.
pub struct CycleGuard<'a> {
    tracker: &'a FreshnessTracker,
    finished: bool,
}

impl FreshnessTracker {
    pub fn new(staleness: chrono::Duration) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                state: FreshnessState::Cold,
                snapshot: None,
                last_error: None,
                last_duration: None,
                last_success: None,
                before_fetch: FreshnessState::Cold,
                progress: "Initializing...".to_string(),
            }),
            cycle_running: AtomicBool::new(false),
            staleness,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> FreshnessState {
        if snapshot.is_fresh && snapshot.age(now) <= self.staleness {
            FreshnessState::Fresh
        } else {
            FreshnessState::Degraded
        }
    }

    /// Installs a validated snapshot recovered from storage. It represents a
    /// real prior fetch, so it starts Fresh unless already past the window.
    pub fn restore(&self, snapshot: Snapshot) {
        let now = Utc::now();
        let state = self.settle(&snapshot, now);
        let mut inner = self.lock();
        inner.last_success = Some(snapshot.generated_at);
        inner.snapshot = Some(Arc::new(snapshot));
        inner.state = state;
        inner.progress = "Restored from disk".to_string();
    }

    /// Installs example data for display only; the state stays Cold.
    pub fn seed(&self, snapshot: Snapshot) {
        let mut inner = self.lock();
        inner.snapshot = Some(Arc::new(snapshot));
        inner.progress = "Showing example data while warming up".to_string();
    }

    /// Claims the single refresh slot. `None` if a cycle is already running.
    pub fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let mut inner = self.lock();
        inner.before_fetch = inner.state;
        inner.state = FreshnessState::Fetching;
        Some(CycleGuard {
            tracker: self,
            finished: false,
        })
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Current snapshot plus freshness as of `now`.
    pub fn current_at(&self, now: DateTime<Utc>) -> Published {
        let mut inner = self.lock();
        let expired = inner.state == FreshnessState::Fresh
            && inner
                .snapshot
                .as_ref()
                .is_some_and(|s| s.age(now) > self.staleness);
        if expired {
            warn!("Snapshot exceeded staleness window");
            inner.state = FreshnessState::Degraded;
        }
        Published {
            snapshot: inner.snapshot.clone(),
            state: inner.state,
        }
    }

    pub fn current(&self) -> Published {
        self.current_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> FreshnessState {
        self.current_at(now).state
    }

    pub fn state(&self) -> FreshnessState {
        self.state_at(Utc::now())
    }

    pub fn health_report(&self) -> HealthReport {
        let state = self.state();
        let inner = self.lock();
        HealthReport {
            state,
            last_error: inner.last_error.clone(),
            last_duration_ms: inner.last_duration.map(|d| d.as_millis()),
            last_success: inner.last_success,
            snapshot_generated_at: inner.snapshot.as_ref().map(|s| s.generated_at),
            progress: inner.progress.clone(),
        }
    }
}

impl ProgressSink for FreshnessTracker {
    fn report(&self, message: &str) {
        info!(progress = message, "Refresh progress");
        self.lock().progress = message.to_string();
    }
}

impl CycleGuard<'_> {
    /// Publishes the cycle's snapshot, superseding the previous one.
    pub fn complete(mut self, snapshot: Arc<Snapshot>, duration: Duration) -> FreshnessState {
        let tracker = self.tracker;
        let state = tracker.settle(&snapshot, Utc::now());
        let mut inner = tracker.lock();
        inner.last_success = Some(snapshot.generated_at);
        inner.snapshot = Some(snapshot);
        inner.last_error = None;
        inner.last_duration = Some(duration);
        inner.state = state;
        self.finished = true;
        state
    }

    /// Records an unrecoverable cycle failure; the previous snapshot stays
    /// published.
    pub fn fail(mut self, error: String, duration: Duration) {
        let tracker = self.tracker;
        let mut inner = tracker.lock();
        inner.last_error = Some(error);
        inner.last_duration = Some(duration);
        inner.state = FreshnessState::Degraded;
        self.finished = true;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut inner = self.tracker.lock();
            inner.state = inner.before_fetch;
        }
        self.tracker.cycle_running.store(false, Ordering::Release);
    }
}
