pub mod config;
pub mod derive;
pub mod error;
pub mod fetch;
pub mod health;
pub mod orchestrator;
pub mod output;
pub mod providers;
pub mod refresh;
pub mod registry;
pub mod scoring;
pub mod series;
pub mod snapshot;
pub mod store;
