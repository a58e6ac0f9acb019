//! File-backed snapshot store.
//!
//! Two kinds of entries live under one directory:
//! - raw provider payloads (`<key>.json`), read back subject to a TTL;
//! - the published snapshot, flattened into a [`PersistedState`] and
//!   replaced whole on every successful cycle.
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so a
//! crash mid-write leaves the previous file intact.

use crate::error::{IndexError, Result};
use crate::series::{DailySeries, SeriesPoint};
use crate::snapshot::{
    Alert, CategoryResult, Disruption, MapMarker, MarketQuote, Metadata, Snapshot,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bumped whenever the persisted layout changes incompatibly.
pub const SCHEMA_VERSION: u8 = 1;

const SNAPSHOT_KEY: &str = "dashboard_snapshot";

/// Example snapshot shipped for deployments with empty storage.
const SEED_SNAPSHOT: &str = include_str!("../seed/example_snapshot.json");

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    stored_at: DateTime<Utc>,
    data: T,
}

/// One category inside a [`PersistedState`]; `history` is aligned with
/// [`PersistedState::dates`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCategory {
    pub score: f64,
    pub history: Vec<f64>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub error: Option<String>,
}

/// JSON-safe form of a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u8,
    /// Category keys present when written; compared against configuration
    /// on load.
    pub category_keys: BTreeSet<String>,
    pub generated_at: DateTime<Utc>,
    pub dates: Vec<NaiveDate>,
    pub categories: BTreeMap<String, PersistedCategory>,
    pub composite: f64,
    /// Aligned with the tail of `dates`.
    pub composite_history: Vec<f64>,
    #[serde(default)]
    pub map_markers: Vec<MapMarker>,
    #[serde(default)]
    pub disruptions: Vec<Disruption>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub market_data: BTreeMap<String, MarketQuote>,
    #[serde(default = "default_true")]
    pub is_fresh: bool,
}

fn default_true() -> bool {
    true
}

fn zip_dates(dates: &[NaiveDate], values: &[f64]) -> DailySeries {
    let offset = dates.len().saturating_sub(values.len());
    DailySeries {
        points: dates[offset..]
            .iter()
            .zip(values)
            .map(|(&date, &score)| SeriesPoint { date, score })
            .collect(),
    }
}

impl PersistedState {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let dates = snapshot
            .categories
            .values()
            .map(|r| r.history.dates())
            .max_by_key(Vec::len)
            .unwrap_or_default();

        let categories = snapshot
            .categories
            .iter()
            .map(|(key, r)| {
                (
                    key.clone(),
                    PersistedCategory {
                        score: r.score,
                        history: r.history.values(),
                        metadata: r.metadata.clone(),
                        error: r.error.clone(),
                    },
                )
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            category_keys: snapshot.category_keys(),
            generated_at: snapshot.generated_at,
            dates,
            categories,
            composite: snapshot.composite,
            composite_history: snapshot.composite_history.values(),
            map_markers: snapshot.map_markers.clone(),
            disruptions: snapshot.disruptions.clone(),
            alerts: snapshot.alerts.clone(),
            market_data: snapshot.market_data.clone(),
            is_fresh: snapshot.is_fresh,
        }
    }

    /// Rebuilds the snapshot, rejecting state written for a different
    /// category set or with malformed series.
    pub fn into_snapshot(self, expected: &BTreeSet<String>) -> Result<Snapshot> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(IndexError::Persistence(format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        let stored: BTreeSet<String> = self.categories.keys().cloned().collect();
        if stored != self.category_keys || &stored != expected {
            let missing: Vec<&String> = expected.difference(&stored).collect();
            let extra: Vec<&String> = stored.difference(expected).collect();
            return Err(IndexError::Persistence(format!(
                "category keys do not match configuration (missing {missing:?}, unexpected {extra:?})"
            )));
        }
        if self.composite_history.len() > self.dates.len() {
            return Err(IndexError::Persistence(
                "composite history longer than date axis".to_string(),
            ));
        }

        let mut categories = BTreeMap::new();
        for (key, c) in self.categories {
            if c.history.len() > self.dates.len() {
                return Err(IndexError::Persistence(format!(
                    "history for '{key}' longer than date axis"
                )));
            }
            categories.insert(
                key,
                CategoryResult {
                    score: c.score,
                    history: zip_dates(&self.dates, &c.history),
                    metadata: c.metadata,
                    error: c.error,
                },
            );
        }

        Ok(Snapshot {
            categories,
            composite: self.composite,
            composite_history: zip_dates(&self.dates, &self.composite_history),
            map_markers: self.map_markers,
            disruptions: self.disruptions,
            alerts: self.alerts,
            market_data: self.market_data,
            generated_at: self.generated_at,
            is_fresh: self.is_fresh,
        })
    }
}

/// Key-value store rooted at one directory.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn write_atomic(&self, key: &str, body: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, body)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Returns the cached value for `key` unless it is missing, older than
    /// `ttl`, or unreadable.
    pub fn get_cached<T: DeserializeOwned>(&self, key: &str, ttl: chrono::Duration) -> Option<T> {
        let content = fs::read(self.path_for(key)).ok()?;
        match serde_json::from_slice::<CacheEntry<T>>(&content) {
            Ok(entry) if Utc::now() - entry.stored_at <= ttl => Some(entry.data),
            Ok(_) => {
                debug!(key, "Cache entry expired");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    pub fn set_cached<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let entry = CacheEntry {
            stored_at: Utc::now(),
            data,
        };
        self.write_atomic(key, &serde_json::to_vec(&entry)?)
    }

    /// Deletes every cached payload, keeping the published snapshot.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let keep = self.path_for(SNAPSHOT_KEY);
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path != keep && path.extension().and_then(|e| e.to_str()) == Some("json") {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Persists the snapshot, replacing the previous one whole.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let state = PersistedState::from_snapshot(snapshot);
        self.set_cached(SNAPSHOT_KEY, &state)
    }

    /// Loads the stored snapshot if it is no older than `max_age`.
    ///
    /// `Ok(None)` means nothing usable is stored; corrupt or mismatched state
    /// is an [`IndexError::Persistence`].
    pub fn load_snapshot(
        &self,
        expected: &BTreeSet<String>,
        max_age: chrono::Duration,
    ) -> Result<Option<Snapshot>> {
        let content = match fs::read(self.path_for(SNAPSHOT_KEY)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry<PersistedState> = serde_json::from_slice(&content)
            .map_err(|e| IndexError::Persistence(format!("corrupt snapshot file: {e}")))?;
        if Utc::now() - entry.stored_at > max_age {
            info!(stored_at = %entry.stored_at, "Stored snapshot too old to trust");
            return Ok(None);
        }
        entry.data.into_snapshot(expected).map(Some)
    }

    /// Startup read: any failure is logged and treated as "nothing stored".
    pub fn recover(&self, expected: &BTreeSet<String>, max_age: chrono::Duration) -> Option<Snapshot> {
        match self.load_snapshot(expected, max_age) {
            Ok(Some(snapshot)) => {
                info!(generated_at = %snapshot.generated_at, "Restored persisted snapshot");
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Discarding persisted snapshot, starting cold");
                None
            }
        }
    }
}

/// The built-in example snapshot, always flagged as not fresh.
pub fn seed_snapshot(expected: &BTreeSet<String>) -> Result<Snapshot> {
    let state: PersistedState = serde_json::from_str(SEED_SNAPSHOT)?;
    let mut snapshot = state.into_snapshot(expected)?;
    snapshot.is_fresh = false;
    Ok(snapshot)
}
