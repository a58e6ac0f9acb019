//! Category table and runtime tuning for the index.
//!
//! Defaults mirror the production weighting. A JSON file can override any
//! field; missing fields keep their default:
//! ```json
//! {
//!   "history_days": 60,
//!   "store_dir": "/var/lib/supply_index"
//! }
//! ```

use crate::error::{IndexError, Result};
use crate::scoring::validate_weights;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One weighted dimension of the composite index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub key: String,
    pub label: String,
    pub weight: f64,
}

impl CategorySpec {
    pub fn new(key: &str, label: &str, weight: f64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub categories: Vec<CategorySpec>,
    /// Category replaced by the per-site local signal when scoring markers.
    pub site_category: String,
    pub history_days: usize,

    pub batch_timeout_secs: u64,
    pub news_timeout_secs: u64,
    pub market_timeout_secs: u64,
    pub summaries_timeout_secs: u64,
    pub site_signal_timeout_secs: u64,
    pub max_concurrency: usize,

    pub refresh_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub staleness_minutes: i64,

    pub store_dir: PathBuf,
    /// TTL for raw provider payloads in the store.
    pub payload_ttl_secs: i64,
    /// A persisted snapshot older than this is ignored at startup.
    pub snapshot_max_age_secs: i64,

    /// Categories scoring below this become disruption events.
    pub disruption_threshold: f64,
    pub critical_threshold: f64,
    pub neutral_score: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                CategorySpec::new("weather", "Weather Disruptions", 0.10),
                CategorySpec::new("supply_chain", "Supply Chain", 0.20),
                CategorySpec::new("energy", "Energy Costs", 0.20),
                CategorySpec::new("tariffs", "Trade & Tariffs", 0.15),
                CategorySpec::new("trucking", "Inland Freight", 0.15),
                CategorySpec::new("geopolitical", "Geopolitical Risk", 0.20),
            ],
            site_category: "weather".to_string(),
            history_days: 90,
            batch_timeout_secs: 45,
            news_timeout_secs: 5,
            market_timeout_secs: 5,
            summaries_timeout_secs: 10,
            site_signal_timeout_secs: 20,
            max_concurrency: 10,
            refresh_interval_secs: 300,
            retry_interval_secs: 60,
            staleness_minutes: 30,
            store_dir: PathBuf::from("data/.cache"),
            payload_ttl_secs: 3600,
            snapshot_max_age_secs: 3600,
            disruption_threshold: 70.0,
            critical_threshold: 40.0,
            neutral_score: 50.0,
        }
    }
}

impl IndexConfig {
    /// Loads overrides from a JSON file at `path` and validates the result.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup check. Any failure here must stop the process.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for c in &self.categories {
            if !seen.insert(c.key.as_str()) {
                return Err(IndexError::Configuration(format!(
                    "category '{}' is defined more than once",
                    c.key
                )));
            }
            if !(0.0..=1.0).contains(&c.weight) {
                return Err(IndexError::Configuration(format!(
                    "weight for '{}' must be within 0..=1, got {}",
                    c.key, c.weight
                )));
            }
        }

        validate_weights(&self.weights())?;

        if !seen.contains(self.site_category.as_str()) {
            return Err(IndexError::Configuration(format!(
                "site category '{}' has no weight",
                self.site_category
            )));
        }
        if self.history_days == 0 {
            return Err(IndexError::Configuration(
                "history_days must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(IndexError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.categories
            .iter()
            .map(|c| (c.key.clone(), c.weight))
            .collect()
    }

    pub fn category_keys(&self) -> BTreeSet<String> {
        self.categories.iter().map(|c| c.key.clone()).collect()
    }

    /// Human label for `key`, falling back to the key itself.
    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.categories
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.label.as_str())
            .unwrap_or(key)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_minutes)
    }

    pub fn snapshot_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.snapshot_max_age_secs)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.store_dir.join("dashboard_snapshot.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.category_keys().len(), 6);
    }

    #[test]
    fn test_weights_off_by_ten_percent_rejected() {
        let mut config = IndexConfig::default();
        config.categories[0].weight = 0.0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut config = IndexConfig::default();
        config.categories.push(CategorySpec::new("energy", "Energy again", 0.0));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_unknown_site_category_rejected() {
        let config = IndexConfig {
            site_category: "ports".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: IndexConfig = serde_json::from_str(r#"{"history_days": 30}"#).unwrap();
        assert_eq!(config.history_days, 30);
        assert_eq!(config.batch_timeout_secs, 45);
        assert_eq!(config.label("tariffs"), "Trade & Tariffs");
        assert_eq!(config.label("unknown"), "unknown");
    }
}
