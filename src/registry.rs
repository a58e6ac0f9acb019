//! Endpoint table that wires concrete providers and collaborators.
//!
//! Stored as a JSON object on disk. Keys are never written to the file, only
//! the environment variable that holds them:
//! ```json
//! {
//!   "categories": {
//!     "energy": {
//!       "url": "https://example.org/energy.json",
//!       "auth": { "type": "query", "param": "api_key", "key_env": "ENERGY_API_KEY" }
//!     },
//!     "weather": { "url": "https://example.org/weather.json" }
//!   },
//!   "alerts": { "url": "https://example.org/alerts.json" },
//!   "site_signals": { "url": "https://example.org/site_weather" }
//! }
//! ```

use crate::config::IndexConfig;
use crate::fetch::auth::{ApiKey, UrlParam};
use crate::fetch::{BasicClient, HttpClient};
use crate::providers::endpoint::{JsonEndpointProvider, JsonFeed};
use crate::providers::{Collaborators, Provider};
use crate::store::SnapshotStore;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// How an endpoint expects its API key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointAuth {
    /// No authentication required.
    #[default]
    None,
    /// Key sent as an HTTP header with the given name.
    Header { name: String, key_env: String },
    /// Key appended as a URL query parameter with the given name.
    Query { param: String, key_env: String },
}

impl EndpointAuth {
    pub fn requires_auth(&self) -> bool {
        !matches!(self, EndpointAuth::None)
    }

    fn key_env(&self) -> Option<&str> {
        match self {
            EndpointAuth::None => None,
            EndpointAuth::Header { key_env, .. } | EndpointAuth::Query { key_env, .. } => {
                Some(key_env.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default)]
    pub auth: EndpointAuth,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub categories: BTreeMap<String, Endpoint>,
    pub alerts: Option<Endpoint>,
    pub market: Option<Endpoint>,
    pub summaries: Option<Endpoint>,
    pub site_signals: Option<Endpoint>,
}

impl EndpointsConfig {
    /// Loads the endpoint table from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading endpoints file {}", path.display()))?;
        let config: EndpointsConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing endpoints file {}", path.display()))?;
        Ok(config)
    }

    /// Configured categories with no endpoint entry.
    pub fn missing_categories(&self, config: &IndexConfig) -> Vec<String> {
        config
            .category_keys()
            .into_iter()
            .filter(|k| !self.categories.contains_key(k))
            .collect()
    }
}

/// Wraps the shared `base` client with whatever auth `endpoint` needs,
/// reading its key from the environment.
pub fn client_for(base: &Arc<BasicClient>, endpoint: &Endpoint) -> Result<Arc<dyn HttpClient>> {
    let key = match endpoint.auth.key_env() {
        Some(var) => Some(
            std::env::var(var)
                .with_context(|| format!("API key variable {var} is not set for {}", endpoint.url))?,
        ),
        None => None,
    };

    let client: Arc<dyn HttpClient> = match (&endpoint.auth, key) {
        (EndpointAuth::Header { name, .. }, Some(key)) => {
            Arc::new(ApiKey::new(base.clone(), name, &key)?)
        }
        (EndpointAuth::Query { param, .. }, Some(key)) => {
            Arc::new(UrlParam::new(base.clone(), param, &key))
        }
        _ => base.clone(),
    };
    Ok(client)
}

/// One [`JsonEndpointProvider`] per configured category that has an endpoint.
///
/// Entries for unknown categories are skipped; categories without an entry
/// are left to the orchestrator's fallback.
pub fn build_providers(
    endpoints: &EndpointsConfig,
    base: &Arc<BasicClient>,
    store: Arc<SnapshotStore>,
    config: &IndexConfig,
) -> Result<Vec<Arc<dyn Provider>>> {
    let keys = config.category_keys();
    let ttl = chrono::Duration::seconds(config.payload_ttl_secs);
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for (category, endpoint) in &endpoints.categories {
        if !keys.contains(category) {
            warn!(category = %category, "Endpoint for unconfigured category, skipping");
            continue;
        }
        let client = client_for(base, endpoint)?;
        providers.push(Arc::new(
            JsonEndpointProvider::new(category, &endpoint.url, client)
                .with_cache(store.clone(), ttl),
        ));
    }

    let missing = endpoints.missing_categories(config);
    if !missing.is_empty() {
        warn!(?missing, "Categories without an endpoint will use the neutral fallback");
    }
    info!(count = providers.len(), "Providers registered");
    Ok(providers)
}

fn feed(base: &Arc<BasicClient>, endpoint: Option<&Endpoint>) -> Result<Option<Arc<JsonFeed>>> {
    endpoint
        .map(|e| -> Result<Arc<JsonFeed>> {
            Ok(Arc::new(JsonFeed::new(&e.url, client_for(base, e)?)))
        })
        .transpose()
}

pub fn build_collaborators(
    endpoints: &EndpointsConfig,
    base: &Arc<BasicClient>,
) -> Result<Collaborators> {
    let mut collaborators = Collaborators::default();
    if let Some(f) = feed(base, endpoints.alerts.as_ref())? {
        collaborators.alerts = Some(f);
    }
    if let Some(f) = feed(base, endpoints.market.as_ref())? {
        collaborators.market = Some(f);
    }
    if let Some(f) = feed(base, endpoints.summaries.as_ref())? {
        collaborators.summaries = Some(f);
    }
    if let Some(f) = feed(base, endpoints.site_signals.as_ref())? {
        collaborators.site_signals = Some(f);
    }
    Ok(collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINTS: &str = r#"{
        "categories": {
            "energy": {
                "url": "https://example.org/energy.json",
                "auth": { "type": "query", "param": "api_key", "key_env": "SUPPLY_INDEX_TEST_KEY" }
            },
            "weather": { "url": "https://example.org/weather.json" },
            "lunar": { "url": "https://example.org/moon.json" }
        },
        "alerts": { "url": "https://example.org/alerts.json" }
    }"#;

    #[test]
    fn test_parse_endpoints() {
        let endpoints: EndpointsConfig = serde_json::from_str(ENDPOINTS).unwrap();
        assert_eq!(endpoints.categories.len(), 3);
        assert_eq!(
            endpoints.categories["energy"].auth,
            EndpointAuth::Query {
                param: "api_key".into(),
                key_env: "SUPPLY_INDEX_TEST_KEY".into()
            }
        );
        assert!(!endpoints.categories["weather"].auth.requires_auth());
        assert!(endpoints.market.is_none());
    }

    #[test]
    fn test_missing_categories() {
        let endpoints: EndpointsConfig = serde_json::from_str(ENDPOINTS).unwrap();
        let missing = endpoints.missing_categories(&IndexConfig::default());
        assert_eq!(
            missing,
            vec!["geopolitical", "supply_chain", "tariffs", "trucking"]
        );
    }

    #[test]
    fn test_unset_key_variable_is_an_error() {
        let endpoint = Endpoint {
            url: "https://example.org/x".into(),
            auth: EndpointAuth::Header {
                name: "X-Api-Key".into(),
                key_env: "SUPPLY_INDEX_DEFINITELY_UNSET".into(),
            },
        };
        let base = Arc::new(BasicClient::new().unwrap());
        let err = client_for(&base, &endpoint).err().unwrap();
        assert!(err.to_string().contains("SUPPLY_INDEX_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_collaborators_from_endpoints() {
        let endpoints: EndpointsConfig = serde_json::from_str(ENDPOINTS).unwrap();
        let base = Arc::new(BasicClient::new().unwrap());
        let collaborators = build_collaborators(&endpoints, &base).unwrap();
        assert!(collaborators.alerts.is_some());
        assert!(collaborators.market.is_none());
        assert!(collaborators.site_signals.is_none());
    }

    #[test]
    fn test_unauthenticated_endpoints_share_the_base_client() {
        let endpoints: EndpointsConfig = serde_json::from_str(ENDPOINTS).unwrap();
        let base = Arc::new(BasicClient::new().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));

        unsafe { std::env::set_var("SUPPLY_INDEX_TEST_KEY", "k") };
        let providers = build_providers(&endpoints, &base, store, &IndexConfig::default()).unwrap();
        let _collaborators = build_collaborators(&endpoints, &base).unwrap();

        assert_eq!(providers.len(), 2);
        // energy's decorator, weather's provider and the alerts feed all hold the pool
        assert_eq!(Arc::strong_count(&base), 4);
    }
}
