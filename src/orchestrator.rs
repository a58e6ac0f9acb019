//! One refresh cycle: every provider and collaborator fetched concurrently,
//! failures isolated, results assembled into a fully keyed [`Snapshot`].

use crate::config::IndexConfig;
use crate::derive::{
    AlertMatcher, KeywordMatcher, SiteRegistry, build_disruptions, build_site_markers,
};
use crate::error::{IndexError, Result};
use crate::health::ProgressSink;
use crate::providers::endpoint::rank_alerts;
use crate::providers::{Collaborators, Provider, ProviderReading};
use crate::scoring::{HealthTier, clamp_score, compute_composite, compute_composite_series};
use crate::series::{DailySeries, date_axis};
use crate::snapshot::{CategoryResult, Snapshot};
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};

/// What one provider task hands back.
struct ProviderOutcome {
    reading: ProviderReading,
    history: std::result::Result<DailySeries, String>,
}

pub struct Orchestrator {
    config: Arc<IndexConfig>,
    providers: Vec<Arc<dyn Provider>>,
    collaborators: Collaborators,
    sites: Arc<SiteRegistry>,
    matcher: Arc<dyn AlertMatcher>,
}

impl Orchestrator {
    /// Providers for categories that are not configured, and repeats of an
    /// already registered category, are dropped with a warning.
    pub fn new(
        config: Arc<IndexConfig>,
        providers: Vec<Arc<dyn Provider>>,
        collaborators: Collaborators,
    ) -> Self {
        let keys = config.category_keys();
        let mut registered: Vec<Arc<dyn Provider>> = Vec::with_capacity(providers.len());
        for provider in providers {
            let category = provider.category();
            if !keys.contains(category) {
                warn!(category, "Ignoring provider for unconfigured category");
            } else if registered.iter().any(|p| p.category() == category) {
                warn!(category, "Ignoring duplicate provider");
            } else {
                registered.push(provider);
            }
        }

        Self {
            config,
            providers: registered,
            collaborators,
            sites: Arc::new(SiteRegistry::major_ports()),
            matcher: Arc::new(KeywordMatcher::default()),
        }
    }

    pub fn with_sites(mut self, sites: SiteRegistry) -> Self {
        self.sites = Arc::new(sites);
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn AlertMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Runs one cycle to completion.
    ///
    /// Provider and collaborator failures are absorbed into the snapshot.
    /// An `Err` here means the cycle itself broke and nothing should be
    /// published.
    #[tracing::instrument(skip_all, fields(providers = self.providers.len()))]
    pub async fn run_cycle(&self, progress: &dyn ProgressSink) -> Result<Snapshot> {
        let config = &self.config;
        let axis = date_axis(Utc::now().date_naive(), config.history_days);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));

        progress.report(&format!("Fetching {} data sources...", self.providers.len()));

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        for provider in &self.providers {
            let category = provider.category().to_string();
            let span = info_span!("provider", category = %category);
            let provider = provider.clone();
            let semaphore = semaphore.clone();
            let days = config.history_days;
            let handle = tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await?;
                    let reading = provider.fetch_current().await?;
                    let history = provider
                        .fetch_history(days)
                        .await
                        .map_err(|e| format!("{e:#}"));
                    debug!("Provider finished");
                    anyhow::Ok(ProviderOutcome { reading, history })
                }
                .instrument(span),
            );
            pending.insert(handle.id(), category);
        }

        // Collaborators start alongside the providers and share the pool.
        let alerts_task = self.collaborators.alerts.clone().map(|source| {
            spawn_bounded(&semaphore, "alerts", async move { source.fetch_alerts().await })
        });
        let market_task = self.collaborators.market.clone().map(|source| {
            spawn_bounded(&semaphore, "market", async move { source.fetch_market().await })
        });
        let summaries_task = self.collaborators.summaries.clone().map(|source| {
            spawn_bounded(&semaphore, "summaries", async move {
                source.fetch_summaries().await
            })
        });
        let signals_task = self.collaborators.site_signals.clone().map(|source| {
            let sites = self.sites.clone();
            spawn_bounded(&semaphore, "site_signals", async move {
                source.fetch_site_signals(&sites.sites).await
            })
        });

        let mut outcomes: BTreeMap<String, std::result::Result<ProviderOutcome, String>> =
            BTreeMap::new();
        let deadline = tokio::time::Instant::now() + config.batch_timeout();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    if let Some(category) = pending.remove(&id) {
                        let outcome = outcome.map_err(|e| {
                            let err = IndexError::ProviderFetch {
                                category: category.clone(),
                                message: format!("{e:#}"),
                            };
                            warn!(error = %err, "Provider failed");
                            err.to_string()
                        });
                        outcomes.insert(category, outcome);
                    }
                }
                Ok(Some(Err(e))) => {
                    if let Some(category) = pending.remove(&e.id()) {
                        warn!(category = %category, error = %e, "Provider task aborted");
                        outcomes.insert(category, Err(format!("provider task failed: {e}")));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let abandoned: Vec<&String> = pending.values().collect();
                    warn!(
                        ?abandoned,
                        secs = config.batch_timeout_secs,
                        "Batch deadline reached, abandoning providers"
                    );
                    tasks.detach_all();
                    break;
                }
            }
        }

        let categories = self.assemble(&axis, outcomes);

        progress.report("Collecting market & news data...");
        let mut failed = Vec::new();
        let alerts = await_aux(
            "alerts",
            alerts_task,
            config.news_timeout_secs,
            &mut failed,
        )
        .await;
        let market_data = await_aux(
            "market",
            market_task,
            config.market_timeout_secs,
            &mut failed,
        )
        .await;
        let summaries = await_aux(
            "summaries",
            summaries_task,
            config.summaries_timeout_secs,
            &mut failed,
        )
        .await;
        let signals = await_aux(
            "site_signals",
            signals_task,
            config.site_signal_timeout_secs,
            &mut failed,
        )
        .await;
        if !failed.is_empty() {
            let err = IndexError::AggregationPartialFailure(failed);
            warn!(error = %err, "Continuing without some enrichments");
        }
        let alerts = rank_alerts(alerts);

        let weights = config.weights();
        let scores: BTreeMap<String, f64> = categories
            .iter()
            .map(|(k, r)| (k.clone(), r.score))
            .collect();
        let histories: BTreeMap<String, DailySeries> = categories
            .iter()
            .map(|(k, r)| (k.clone(), r.history.clone()))
            .collect();
        let composite = compute_composite(&scores, &weights)?;
        let composite_history = compute_composite_series(&histories, &weights)?;

        progress.report("Building site markers...");
        let disruptions = build_disruptions(config, &scores, &alerts);
        let map_markers = build_site_markers(
            config,
            &self.sites,
            &scores,
            &signals,
            &alerts,
            &summaries,
            self.matcher.as_ref(),
        );

        progress.report("Finalizing snapshot...");
        let snapshot = Snapshot {
            categories,
            composite,
            composite_history,
            map_markers,
            disruptions,
            alerts,
            market_data,
            generated_at: Utc::now(),
            is_fresh: true,
        };
        info!(
            composite = snapshot.composite,
            tier = snapshot.tier().label(),
            failed = snapshot.provider_errors().len(),
            "Cycle assembled"
        );
        Ok(snapshot)
    }

    /// Turns whatever finished into one result per configured category.
    fn assemble(
        &self,
        axis: &[NaiveDate],
        mut outcomes: BTreeMap<String, std::result::Result<ProviderOutcome, String>>,
    ) -> BTreeMap<String, CategoryResult> {
        let neutral = self.config.neutral_score;

        self.config
            .categories
            .iter()
            .map(|spec| {
                let key = spec.key.clone();
                let has_provider = self.providers.iter().any(|p| p.category() == key);
                let result = match outcomes.remove(&key) {
                    Some(Ok(outcome)) => category_result(axis, outcome),
                    Some(Err(error)) => {
                        CategoryResult::fallback(DailySeries::flat(axis, neutral), neutral, error)
                    }
                    None if has_provider => {
                        let error = IndexError::ProviderTimeout {
                            task: key.clone(),
                            secs: self.config.batch_timeout_secs,
                        };
                        CategoryResult::fallback(
                            DailySeries::flat(axis, neutral),
                            neutral,
                            error.to_string(),
                        )
                    }
                    None => CategoryResult::fallback(
                        DailySeries::flat(axis, neutral),
                        neutral,
                        format!("no provider registered for '{key}'"),
                    ),
                };
                (key, result)
            })
            .collect()
    }
}

fn category_result(axis: &[NaiveDate], outcome: ProviderOutcome) -> CategoryResult {
    let ProviderOutcome { reading, history } = outcome;
    let score = clamp_score(reading.score);
    let (history, error) = match history {
        Ok(series) => (DailySeries::align(Some(&series), axis, score), None),
        Err(e) => (DailySeries::align(None, axis, score), Some(format!("history unavailable: {e}"))),
    };

    let mut metadata = reading.metadata;
    metadata.insert("score".into(), ((score * 10.0).round() / 10.0).into());
    metadata.insert("tier".into(), HealthTier::from_score(score).label().into());

    CategoryResult {
        score,
        history,
        metadata,
        error,
    }
}

fn spawn_bounded<T, F>(
    semaphore: &Arc<Semaphore>,
    task: &'static str,
    fut: F,
) -> JoinHandle<anyhow::Result<T>>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let semaphore = semaphore.clone();
    tokio::spawn(
        async move {
            let _permit = semaphore.acquire_owned().await?;
            fut.await
        }
        .instrument(info_span!("collaborator", task)),
    )
}

/// Waits up to `secs` for a collaborator. Any failure yields the empty value.
async fn await_aux<T: Default>(
    task: &str,
    handle: Option<JoinHandle<anyhow::Result<T>>>,
    secs: u64,
    failed: &mut Vec<String>,
) -> T {
    let Some(handle) = handle else {
        return T::default();
    };
    match tokio::time::timeout(Duration::from_secs(secs), handle).await {
        Ok(Ok(Ok(value))) => value,
        Ok(Ok(Err(e))) => {
            warn!(task, error = %format!("{e:#}"), "Collaborator failed");
            failed.push(task.to_string());
            T::default()
        }
        Ok(Err(e)) => {
            warn!(task, error = %e, "Collaborator task aborted");
            failed.push(task.to_string());
            T::default()
        }
        Err(_) => {
            let err = IndexError::ProviderTimeout {
                task: task.to_string(),
                secs,
            };
            warn!(error = %err, "Collaborator abandoned");
            failed.push(task.to_string());
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesPoint;
    use async_trait::async_trait;

    struct Fixed(&'static str, f64);

    #[async_trait]
    impl Provider for Fixed {
        fn category(&self) -> &str {
            self.0
        }

        async fn fetch_current(&self) -> anyhow::Result<ProviderReading> {
            Ok(ProviderReading::new(self.1).with_meta("source", "test"))
        }

        async fn fetch_history(&self, _days: usize) -> anyhow::Result<DailySeries> {
            anyhow::bail!("no history")
        }
    }

    struct Quiet;

    impl ProgressSink for Quiet {
        fn report(&self, _message: &str) {}
    }

    #[test]
    fn test_latest_point_forced_to_current() {
        let axis = date_axis(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(), 3);
        let history = DailySeries::from_points(vec![SeriesPoint {
            date: axis[0],
            score: 40.0,
        }]);
        let result = category_result(
            &axis,
            ProviderOutcome {
                reading: ProviderReading::new(75.0),
                history: Ok(history),
            },
        );
        assert_eq!(result.history.values(), vec![40.0, 40.0, 75.0]);
        assert_eq!(result.metadata["tier"], "Stable");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_unconfigured_and_duplicate_providers_dropped() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(Fixed("energy", 70.0)),
            Arc::new(Fixed("energy", 10.0)),
            Arc::new(Fixed("crypto", 10.0)),
        ];
        let orchestrator = Orchestrator::new(
            Arc::new(IndexConfig::default()),
            providers,
            Collaborators::default(),
        );
        assert_eq!(orchestrator.providers.len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_keeps_current_score() {
        let config = IndexConfig {
            history_days: 7,
            ..IndexConfig::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(config),
            vec![Arc::new(Fixed("energy", 88.0))],
            Collaborators::default(),
        );
        let snapshot = orchestrator.run_cycle(&Quiet).await.unwrap();

        let energy = &snapshot.categories["energy"];
        assert_eq!(energy.score, 88.0);
        assert_eq!(energy.history.values(), vec![88.0; 7]);
        assert!(energy.error.as_deref().unwrap().contains("no history"));

        let weather = &snapshot.categories["weather"];
        assert_eq!(weather.score, 50.0);
        assert!(weather.error.as_deref().unwrap().contains("no provider"));
        assert_eq!(snapshot.category_keys().len(), 6);
    }
}
