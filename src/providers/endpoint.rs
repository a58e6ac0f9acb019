//! JSON-over-HTTP implementations of the provider and collaborator traits.
//!
//! A category endpoint serves
//! ```json
//! {
//!   "score": 71.5,
//!   "metadata": { "source": "FRED", "raw_value": 3.1 },
//!   "history": [{ "date": "2024-03-01", "score": 70.2 }]
//! }
//! ```
//! and is cached raw in the [`SnapshotStore`] so restarts and the second
//! call of a cycle do not hit the network again.

use super::{
    AlertSource, MarketSource, Provider, ProviderReading, SiteSignalSource, SiteSummarySource,
};
use crate::derive::sites::{Site, SiteSignal};
use crate::fetch::{HttpClient, fetch_json};
use crate::series::{DailySeries, SeriesPoint};
use crate::snapshot::{Alert, MarketQuote, Metadata, Severity};
use crate::store::SnapshotStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Most alerts kept per cycle.
pub const MAX_ALERTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDocument {
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub history: Vec<SeriesPoint>,
}

pub struct JsonEndpointProvider {
    category: String,
    url: String,
    client: Arc<dyn HttpClient>,
    cache: Option<(Arc<SnapshotStore>, chrono::Duration)>,
}

impl JsonEndpointProvider {
    pub fn new(category: &str, url: &str, client: Arc<dyn HttpClient>) -> Self {
        Self {
            category: category.to_string(),
            url: url.to_string(),
            client,
            cache: None,
        }
    }

    /// Caches raw documents in `store` for `ttl`.
    pub fn with_cache(mut self, store: Arc<SnapshotStore>, ttl: chrono::Duration) -> Self {
        self.cache = Some((store, ttl));
        self
    }

    fn cache_key(&self) -> String {
        format!("provider_{}", self.category)
    }

    async fn document(&self) -> Result<EndpointDocument> {
        if let Some((store, ttl)) = &self.cache
            && let Some(doc) = store.get_cached::<EndpointDocument>(&self.cache_key(), *ttl)
        {
            debug!(category = %self.category, "Using cached provider payload");
            return Ok(doc);
        }

        let doc: EndpointDocument = fetch_json(self.client.as_ref(), &self.url)
            .await
            .with_context(|| format!("fetching {} data", self.category))?;

        if let Some((store, _)) = &self.cache
            && let Err(e) = store.set_cached(&self.cache_key(), &doc)
        {
            warn!(category = %self.category, error = %e, "Failed to cache provider payload");
        }
        Ok(doc)
    }
}

#[async_trait]
impl Provider for JsonEndpointProvider {
    fn category(&self) -> &str {
        &self.category
    }

    async fn fetch_current(&self) -> Result<ProviderReading> {
        let doc = self.document().await?;
        if !doc.score.is_finite() || !(0.0..=100.0).contains(&doc.score) {
            anyhow::bail!("{} score {} is outside 0..=100", self.category, doc.score);
        }
        let mut metadata = doc.metadata;
        metadata
            .entry("timestamp".to_string())
            .or_insert_with(|| Utc::now().to_rfc3339().into());
        Ok(ProviderReading {
            score: doc.score,
            metadata,
        })
    }

    async fn fetch_history(&self, days: usize) -> Result<DailySeries> {
        let doc = self.document().await?;
        Ok(DailySeries::from_points(doc.history).contiguous(days))
    }
}

/// Alert as served by the feed; severity may be left to the sentiment.
#[derive(Debug, Deserialize)]
struct AlertRecord {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    severity: Option<Severity>,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default = "default_alert_category")]
    category: String,
    #[serde(default)]
    sentiment: f64,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn default_alert_category() -> String {
    "geopolitical".to_string()
}

impl From<AlertRecord> for Alert {
    fn from(r: AlertRecord) -> Self {
        Alert {
            timestamp: r.timestamp,
            severity: r.severity.unwrap_or_else(|| Severity::from_sentiment(r.sentiment)),
            title: r.title,
            body: r.body,
            category: r.category,
            sentiment: r.sentiment,
            source: r.source,
            url: r.url,
        }
    }
}

/// Orders alerts high severity first, newest first within a tier, and keeps
/// the top [`MAX_ALERTS`].
pub fn rank_alerts(mut alerts: Vec<Alert>) -> Vec<Alert> {
    alerts.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    alerts.truncate(MAX_ALERTS);
    alerts
}

/// Generic JSON feed for the auxiliary collaborators.
pub struct JsonFeed {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl JsonFeed {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl AlertSource for JsonFeed {
    async fn fetch_alerts(&self) -> Result<Vec<Alert>> {
        let records: Vec<AlertRecord> = fetch_json(self.client.as_ref(), &self.url).await?;
        Ok(records.into_iter().map(Alert::from).collect())
    }
}

#[async_trait]
impl MarketSource for JsonFeed {
    async fn fetch_market(&self) -> Result<BTreeMap<String, MarketQuote>> {
        fetch_json(self.client.as_ref(), &self.url).await
    }
}

#[async_trait]
impl SiteSummarySource for JsonFeed {
    async fn fetch_summaries(&self) -> Result<BTreeMap<String, String>> {
        fetch_json(self.client.as_ref(), &self.url).await
    }
}

#[async_trait]
impl SiteSignalSource for JsonFeed {
    /// One batched request; the response is an array aligned with `sites`.
    async fn fetch_site_signals(&self, sites: &[Site]) -> Result<BTreeMap<String, SiteSignal>> {
        let join = |f: fn(&Site) -> f64| {
            sites
                .iter()
                .map(|s| f(s).to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut url = reqwest::Url::parse(&self.url)
            .with_context(|| format!("invalid url '{}'", self.url))?;
        url.query_pairs_mut()
            .append_pair("latitude", &join(|s| s.lat))
            .append_pair("longitude", &join(|s| s.lon));

        let signals: Vec<SiteSignal> = fetch_json(self.client.as_ref(), url.as_str()).await?;
        if signals.len() != sites.len() {
            anyhow::bail!(
                "expected {} site signals, got {}",
                sites.len(),
                signals.len()
            );
        }
        Ok(sites
            .iter()
            .map(|s| s.name.clone())
            .zip(signals)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct OfflineClient;

    #[async_trait]
    impl HttpClient for OfflineClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            unreachable!("cached payload should have been used")
        }
    }

    fn alert(severity: Severity, hour: u32) -> Alert {
        Alert {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            severity,
            title: format!("{} at {hour}", severity.as_str()),
            body: String::new(),
            category: "ports".into(),
            sentiment: -0.4,
            source: None,
            url: None,
        }
    }

    #[test]
    fn test_rank_alerts_orders_and_caps() {
        let mut alerts = vec![alert(Severity::Low, 9), alert(Severity::High, 1)];
        alerts.extend((0..12).map(|h| alert(Severity::Medium, h)));

        let ranked = rank_alerts(alerts);
        assert_eq!(ranked.len(), MAX_ALERTS);
        assert_eq!(ranked[0].severity, Severity::High);
        assert_eq!(ranked[1].title, "medium at 11");
        assert!(ranked.iter().all(|a| a.severity != Severity::Low));
    }

    #[test]
    fn test_alert_record_derives_missing_severity() {
        let record: AlertRecord = serde_json::from_str(
            r#"{"timestamp": "2024-03-01T00:00:00Z", "title": "Strike", "sentiment": -0.7}"#,
        )
        .unwrap();
        let alert = Alert::from(record);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.category, "geopolitical");
    }

    #[tokio::test]
    async fn test_provider_serves_cached_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));
        let doc = EndpointDocument {
            score: 64.0,
            metadata: Metadata::new(),
            history: vec![
                SeriesPoint {
                    date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    score: 60.0,
                },
                SeriesPoint {
                    date: chrono::NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
                    score: 64.0,
                },
            ],
        };
        store.set_cached("provider_energy", &doc).unwrap();

        let provider = JsonEndpointProvider::new("energy", "http://localhost/x", Arc::new(OfflineClient))
            .with_cache(store, chrono::Duration::hours(1));

        let reading = provider.fetch_current().await.unwrap();
        assert_eq!(reading.score, 64.0);
        assert!(reading.metadata.contains_key("timestamp"));

        let history = provider.fetch_history(90).await.unwrap();
        assert_eq!(history.values(), vec![60.0, 60.0, 64.0]);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));
        let doc = EndpointDocument {
            score: 140.0,
            metadata: Metadata::new(),
            history: vec![],
        };
        store.set_cached("provider_tariffs", &doc).unwrap();

        let provider = JsonEndpointProvider::new("tariffs", "http://localhost/x", Arc::new(OfflineClient))
            .with_cache(store, chrono::Duration::hours(1));
        assert!(provider.fetch_current().await.is_err());
    }
}
