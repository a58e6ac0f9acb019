//! Output formatting and the per-cycle CSV log.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::health::FreshnessState;
use crate::snapshot::Snapshot;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

/// One row of `cycles.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub generated_at: String,
    pub composite: f64,
    pub tier: String,
    /// Categories that fell back this cycle, `;`-separated.
    pub failed_categories: String,
    pub duration_ms: u64,
    pub freshness: String,
}

impl CycleRecord {
    pub fn from_snapshot(snapshot: &Snapshot, duration: Duration, state: FreshnessState) -> Self {
        let failed: Vec<&str> = snapshot.provider_errors().into_keys().collect();
        Self {
            generated_at: snapshot.generated_at.to_rfc3339(),
            composite: (snapshot.composite * 10.0).round() / 10.0,
            tier: snapshot.tier().label().to_string(),
            failed_categories: failed.join(";"),
            duration_ms: duration.as_millis() as u64,
            freshness: format!("{state:?}"),
        }
    }
}

/// One line per category plus the composite, for terminal output.
pub fn summary_lines(snapshot: &Snapshot) -> Vec<String> {
    let mut lines = vec![format!(
        "Composite: {:.1} ({}) generated {}",
        snapshot.composite,
        snapshot.tier().label(),
        snapshot.generated_at.to_rfc3339()
    )];
    for (key, result) in &snapshot.categories {
        let mut line = format!("  {key:<14} {:>5.1}  {}", result.score, result.tier().label());
        if let Some(error) = &result.error {
            line.push_str(&format!("  [{error}]"));
        }
        lines.push(line);
    }
    lines.push(format!(
        "  {} markers, {} disruptions, {} alerts",
        snapshot.map_markers.len(),
        snapshot.disruptions.len(),
        snapshot.alerts.len()
    ));
    lines
}

/// Appends a [`CycleRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_cycle_record(path: &Path, record: &CycleRecord) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending cycle record");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record() -> CycleRecord {
        CycleRecord {
            generated_at: "2024-03-01T00:00:00+00:00".into(),
            composite: 63.5,
            tier: "Stable".into(),
            failed_categories: "energy;weather".into(),
            duration_ms: 1200,
            freshness: "Fresh".into(),
        }
    }

    #[test]
    fn test_append_record_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cycles.csv");

        append_cycle_record(&path, &record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("generated_at,composite,tier"));
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycles.csv");

        append_cycle_record(&path, &record()).unwrap();
        append_cycle_record(&path, &record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("generated_at")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_rows_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycles.csv");
        append_cycle_record(&path, &record()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<CycleRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![record()]);
    }
}
