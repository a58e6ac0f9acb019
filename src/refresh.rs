//! Background refresh loop around the orchestrator.

use crate::health::{FreshnessState, FreshnessTracker};
use crate::orchestrator::Orchestrator;
use crate::output::{CycleRecord, append_cycle_record};
use crate::snapshot::Snapshot;
use crate::store::{SnapshotStore, seed_snapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const CYCLE_LOG_FILE: &str = "cycles.csv";

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Arc<Snapshot>),
    /// Another cycle already held the refresh slot.
    Skipped,
    Failed(String),
}

pub struct Refresher {
    orchestrator: Orchestrator,
    tracker: Arc<FreshnessTracker>,
    store: Arc<SnapshotStore>,
}

impl Refresher {
    pub fn new(
        orchestrator: Orchestrator,
        tracker: Arc<FreshnessTracker>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            orchestrator,
            tracker,
            store,
        }
    }

    pub fn tracker(&self) -> &Arc<FreshnessTracker> {
        &self.tracker
    }

    /// Installs the persisted snapshot if it is usable, otherwise the
    /// example snapshot for display only.
    pub fn startup(&self) -> FreshnessState {
        let config = self.orchestrator.config();
        let expected = config.category_keys();
        match self.store.recover(&expected, config.snapshot_max_age()) {
            Some(snapshot) => self.tracker.restore(snapshot),
            None => match seed_snapshot(&expected) {
                Ok(seed) => {
                    info!("No usable stored snapshot, showing example data");
                    self.tracker.seed(seed);
                }
                Err(e) => {
                    info!(error = %e, "Example snapshot does not fit configured categories");
                }
            },
        }
        self.tracker.state()
    }

    /// Runs one cycle unless one is already in flight.
    pub async fn refresh_once(&self) -> CycleOutcome {
        let Some(guard) = self.tracker.try_begin_cycle() else {
            debug!("Refresh already in flight, skipping");
            return CycleOutcome::Skipped;
        };
        let started = Instant::now();

        match self.orchestrator.run_cycle(self.tracker.as_ref()).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                if let Err(e) = self.store.save_snapshot(&snapshot) {
                    warn!(error = %e, "Failed to persist snapshot");
                }
                let duration = started.elapsed();
                let state = guard.complete(snapshot.clone(), duration);

                let record = CycleRecord::from_snapshot(&snapshot, duration, state);
                let log_path = self.store.dir().join(CYCLE_LOG_FILE);
                if let Err(e) = append_cycle_record(&log_path, &record) {
                    warn!(error = %e, "Failed to append cycle log");
                }
                info!(
                    composite = record.composite,
                    duration_ms = record.duration_ms,
                    state = ?state,
                    "Refresh cycle complete"
                );
                CycleOutcome::Completed(snapshot)
            }
            Err(e) => {
                error!(error = %e, "Refresh cycle failed");
                guard.fail(e.to_string(), started.elapsed());
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    /// How long to sleep after `outcome`: the full interval only once a
    /// real fetch has left the state Fresh.
    fn next_delay(&self, outcome: &CycleOutcome) -> Duration {
        let config = self.orchestrator.config();
        match outcome {
            CycleOutcome::Completed(_) if self.tracker.state() == FreshnessState::Fresh => {
                config.refresh_interval()
            }
            _ => config.retry_interval(),
        }
    }

    /// Refreshes repeatedly until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => break,
                outcome = self.refresh_once() => outcome,
            };
            let delay = self.next_delay(&outcome);
            info!(delay_secs = delay.as_secs(), "Waiting before next refresh");
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Refresh loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::providers::Collaborators;

    fn refresher(config: IndexConfig, dir: &std::path::Path) -> Refresher {
        let tracker = Arc::new(FreshnessTracker::new(config.staleness_window()));
        let orchestrator = Orchestrator::new(Arc::new(config), vec![], Collaborators::default());
        Refresher::new(orchestrator, tracker, Arc::new(SnapshotStore::new(dir)))
    }

    #[test]
    fn test_startup_on_empty_store_seeds_and_stays_cold() {
        let dir = tempfile::tempdir().unwrap();
        let r = refresher(IndexConfig::default(), dir.path());

        assert_eq!(r.startup(), FreshnessState::Cold);
        let published = r.tracker().current();
        assert!(!published.snapshot.unwrap().is_fresh);
    }

    #[tokio::test]
    async fn test_completed_cycle_is_persisted_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let r = refresher(IndexConfig::default(), dir.path());

        let outcome = r.refresh_once().await;
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert_eq!(r.tracker().state(), FreshnessState::Fresh);
        assert_eq!(r.next_delay(&outcome), Duration::from_secs(300));

        assert!(dir.path().join(CYCLE_LOG_FILE).exists());
        let restored = SnapshotStore::new(dir.path())
            .recover(&IndexConfig::default().category_keys(), chrono::Duration::hours(1));
        assert!(restored.is_some());
    }

    #[tokio::test]
    async fn test_broken_cycle_degrades_and_retries_sooner() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = IndexConfig::default();
        config.categories[0].weight = 0.5;
        let r = refresher(config, dir.path());

        let outcome = r.refresh_once().await;
        assert!(matches!(outcome, CycleOutcome::Failed(_)));
        assert_eq!(r.tracker().state(), FreshnessState::Degraded);
        assert!(r.tracker().health_report().last_error.is_some());
        assert_eq!(r.next_delay(&outcome), Duration::from_secs(60));
    }
}
