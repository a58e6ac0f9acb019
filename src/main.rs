//! CLI entry point for the supply-chain health index.
//!
//! Provides subcommands for running the background refresh loop, running a
//! single cycle, inspecting the persisted snapshot, and validating config.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use supply_index::{
    config::IndexConfig,
    fetch::BasicClient,
    health::FreshnessTracker,
    orchestrator::Orchestrator,
    output::summary_lines,
    refresh::{CycleOutcome, Refresher},
    registry::{EndpointsConfig, build_collaborators, build_providers},
    store::SnapshotStore,
};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "supply_index")]
#[command(about = "Composite supply-chain health index", long_about = None)]
struct Cli {
    /// JSON file overriding the default configuration
    #[arg(long, global = true, env = "SUPPLY_INDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the snapshot, payload cache and cycle log
    #[arg(long, global = true, env = "SUPPLY_INDEX_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start from stored state and refresh until Ctrl+C
    Serve {
        /// JSON table of category and collaborator endpoints
        #[arg(short, long, env = "SUPPLY_INDEX_ENDPOINTS", default_value = "endpoints.json")]
        endpoints: PathBuf,
    },
    /// Run exactly one refresh cycle and print a summary
    Refresh {
        /// JSON table of category and collaborator endpoints
        #[arg(short, long, env = "SUPPLY_INDEX_ENDPOINTS", default_value = "endpoints.json")]
        endpoints: PathBuf,
    },
    /// Print the persisted snapshot and its freshness
    Show {
        /// Print the full snapshot as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate the category weight table
    CheckConfig,
    /// Delete cached provider payloads, keeping the snapshot
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/supply_index.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("supply_index.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.store_dir)?;

    match cli.command {
        Commands::Serve { endpoints } => {
            let refresher = build_refresher(config, &endpoints)?;
            let state = refresher.startup();
            info!(?state, "Starting refresh loop. Press Ctrl+C to stop.");
            refresher
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for Ctrl+C");
                        std::future::pending::<()>().await;
                    }
                    info!("Shutdown requested");
                })
                .await;
        }
        Commands::Refresh { endpoints } => {
            let refresher = build_refresher(config, &endpoints)?;
            match refresher.refresh_once().await {
                CycleOutcome::Completed(snapshot) => {
                    for line in summary_lines(&snapshot) {
                        println!("{line}");
                    }
                }
                CycleOutcome::Skipped => warn!("A refresh was already running"),
                CycleOutcome::Failed(e) => anyhow::bail!("refresh failed: {e}"),
            }
        }
        Commands::Show { json } => {
            let store = SnapshotStore::new(&config.store_dir);
            let snapshot = store
                .load_snapshot(&config.category_keys(), chrono::Duration::weeks(52 * 100))?
                .with_context(|| {
                    format!("no snapshot stored at {}", config.snapshot_path().display())
                })?;

            let tracker = FreshnessTracker::new(config.staleness_window());
            tracker.restore(snapshot.clone());
            println!("Freshness: {:?}", tracker.state());
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                for line in summary_lines(&snapshot) {
                    println!("{line}");
                }
            }
        }
        Commands::CheckConfig => {
            for c in &config.categories {
                println!("{:<14} {:<22} {:.2}", c.key, c.label, c.weight);
            }
            println!("Configuration OK");
        }
        Commands::ClearCache => {
            let store = SnapshotStore::new(&config.store_dir);
            let removed = store.clear()?;
            info!(removed, dir = %config.store_dir.display(), "Cleared cached payloads");
        }
    }

    Ok(())
}

/// Defaults, overridden by the config file, then by `--store-dir`.
/// Validation failure is fatal.
fn load_config(path: Option<&Path>, store_dir: Option<PathBuf>) -> Result<IndexConfig> {
    let mut config = match path {
        Some(path) => IndexConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => IndexConfig::default(),
    };
    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

fn build_refresher(config: IndexConfig, endpoints_path: &Path) -> Result<Refresher> {
    let endpoints = if endpoints_path.exists() {
        EndpointsConfig::load(endpoints_path)?
    } else {
        warn!(
            path = %endpoints_path.display(),
            "Endpoints file not found, every category will use the neutral fallback"
        );
        EndpointsConfig::default()
    };

    let store = Arc::new(SnapshotStore::new(&config.store_dir));
    let base = Arc::new(BasicClient::new()?);
    let providers = build_providers(&endpoints, &base, store.clone(), &config)?;
    let collaborators = build_collaborators(&endpoints, &base)?;
    let tracker = Arc::new(FreshnessTracker::new(config.staleness_window()));
    let orchestrator = Orchestrator::new(Arc::new(config), providers, collaborators);

    Ok(Refresher::new(orchestrator, tracker, store))
}
