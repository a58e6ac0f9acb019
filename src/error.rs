//! Error kinds raised by the aggregation engine.

use thiserror::Error;

/// Errors surfaced by scoring, orchestration and persistence.
///
/// Provider and collaborator failures never escape a refresh cycle; they are
/// converted into one of these variants at the isolation boundary and
/// recorded on the affected [`CategoryResult`](crate::snapshot::CategoryResult).
#[derive(Error, Debug)]
pub enum IndexError {
    /// Weight table is invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Scoring ran before every configured category had a score.
    #[error("missing category scores for: {}", .0.join(", "))]
    MissingCategory(Vec<String>),

    #[error("provider '{category}' failed: {message}")]
    ProviderFetch { category: String, message: String },

    #[error("'{task}' timed out after {secs}s")]
    ProviderTimeout { task: String, secs: u64 },

    /// Stored state is corrupt or does not match the configured categories.
    #[error("persisted state rejected: {0}")]
    Persistence(String),

    #[error("auxiliary collaborators failed: {}", .0.join(", "))]
    AggregationPartialFailure(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

