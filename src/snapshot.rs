//! Data types produced by one refresh cycle.

use crate::scoring::HealthTier;
use crate::series::DailySeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Free-form descriptive fields attached to a category reading.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One category's result for a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub score: f64,
    /// Chronological, one point per day; last point equals `score`.
    pub history: DailySeries,
    pub metadata: Metadata,
    pub error: Option<String>,
}

impl CategoryResult {
    /// Neutral stand-in for a provider that failed or never finished.
    pub fn fallback(history: DailySeries, score: f64, error: String) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("description".into(), "Data fetch failed.".into());
        metadata.insert("error".into(), error.clone().into());
        Self {
            score,
            history,
            metadata,
            error: Some(error),
        }
    }

    pub fn tier(&self) -> HealthTier {
        HealthTier::from_score(self.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Severity implied by a sentiment compound score in [-1, 1].
    pub fn from_sentiment(compound: f64) -> Self {
        if compound <= -0.5 {
            Severity::High
        } else if compound <= -0.15 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// A news/event item from the alerts collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub category: String,
    /// Compound sentiment, -1 (most negative) to +1.
    pub sentiment: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Alert {
    /// Lowercased title and body, the text keyword classifiers scan.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.body).to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub price: f64,
    pub prev: f64,
}

impl MarketQuote {
    pub fn change_pct(&self) -> f64 {
        if self.prev == 0.0 {
            0.0
        } else {
            (self.price - self.prev) / self.prev * 100.0
        }
    }
}

/// Risk marker for one site of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub score: f64,
    pub tier: HealthTier,
    pub local_signal: f64,
    pub news_penalty: f64,
    /// Description lines, most important first.
    pub description: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisruptionStatus {
    Active,
    Monitoring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disruption {
    pub event: String,
    pub region: String,
    pub impact_score: f64,
    pub categories: Vec<String>,
    pub started: String,
    pub status: DisruptionStatus,
}

/// One fully assembled refresh cycle. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub categories: BTreeMap<String, CategoryResult>,
    pub composite: f64,
    pub composite_history: DailySeries,
    pub map_markers: Vec<MapMarker>,
    pub disruptions: Vec<Disruption>,
    pub alerts: Vec<Alert>,
    pub market_data: BTreeMap<String, MarketQuote>,
    pub generated_at: DateTime<Utc>,
    /// False for seeded example data that no real fetch has confirmed.
    pub is_fresh: bool,
}

impl Snapshot {
    pub fn scores(&self) -> BTreeMap<String, f64> {
        self.categories
            .iter()
            .map(|(k, r)| (k.clone(), r.score))
            .collect()
    }

    pub fn category_keys(&self) -> BTreeSet<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn provider_errors(&self) -> BTreeMap<&str, &str> {
        self.categories
            .iter()
            .filter_map(|(k, r)| r.error.as_deref().map(|e| (k.as_str(), e)))
            .collect()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.generated_at
    }

    pub fn tier(&self) -> HealthTier {
        HealthTier::from_score(self.composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_sentiment() {
        assert_eq!(Severity::from_sentiment(-0.9), Severity::High);
        assert_eq!(Severity::from_sentiment(-0.5), Severity::High);
        assert_eq!(Severity::from_sentiment(-0.3), Severity::Medium);
        assert_eq!(Severity::from_sentiment(-0.1), Severity::Low);
        assert_eq!(Severity::from_sentiment(0.8), Severity::Low);
    }

    #[test]
    fn test_severity_orders_high_first() {
        let mut v = vec![Severity::Low, Severity::High, Severity::Medium];
        v.sort();
        assert_eq!(v, vec![Severity::High, Severity::Medium, Severity::Low]);
    }

    #[test]
    fn test_change_pct_with_zero_prev() {
        let q = MarketQuote { price: 10.0, prev: 0.0 };
        assert_eq!(q.change_pct(), 0.0);
        let q = MarketQuote { price: 110.0, prev: 100.0 };
        assert!((q.change_pct() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_records_error() {
        let r = CategoryResult::fallback(DailySeries::default(), 50.0, "boom".into());
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.metadata["error"], "boom");
        assert_eq!(r.tier(), HealthTier::Stressed);
    }
}
