//! Provider contract and the optional auxiliary collaborators.
//!
//! [`Provider`] is the capability every category source fulfils. The
//! orchestrator only ever sees `Arc<dyn Provider>`; concrete sources live in
//! [`endpoint`] or in the caller's own code.

pub mod endpoint;

use crate::derive::sites::{Site, SiteSignal};
use crate::series::DailySeries;
use crate::snapshot::{Alert, MarketQuote, Metadata};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Current score plus descriptive metadata for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReading {
    pub score: f64,
    pub metadata: Metadata,
}

impl ProviderReading {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A source for one weighted category.
///
/// `fetch_current` should return a neutral best-effort estimate when there is
/// simply no new data; errors are for failing to retrieve or parse anything.
/// `fetch_history` returns at most `days` contiguous daily points, forward
/// filled over gaps.
#[async_trait]
pub trait Provider: Send + Sync {
    fn category(&self) -> &str;

    async fn fetch_current(&self) -> Result<ProviderReading>;

    async fn fetch_history(&self, days: usize) -> Result<DailySeries>;
}

/// News/event alerts, used for the feed, disruptions and site penalties.
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn fetch_alerts(&self) -> Result<Vec<Alert>>;
}

/// Market indicators keyed by display name.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_market(&self) -> Result<BTreeMap<String, MarketQuote>>;
}

/// Generated per-site status text keyed by site name.
#[async_trait]
pub trait SiteSummarySource: Send + Sync {
    async fn fetch_summaries(&self) -> Result<BTreeMap<String, String>>;
}

/// Site-specific local signal (e.g. current weather at each port).
#[async_trait]
pub trait SiteSignalSource: Send + Sync {
    async fn fetch_site_signals(&self, sites: &[Site]) -> Result<BTreeMap<String, SiteSignal>>;
}

/// The independently optional enrichments of a cycle.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub alerts: Option<Arc<dyn AlertSource>>,
    pub market: Option<Arc<dyn MarketSource>>,
    pub summaries: Option<Arc<dyn SiteSummarySource>>,
    pub site_signals: Option<Arc<dyn SiteSignalSource>>,
}
