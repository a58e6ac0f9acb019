//! Secondary views derived from a cycle's category scores and alerts.
//!
//! Both builders run after aggregation has filled every category, so they
//! can index the score map without checking for gaps.

pub mod disruptions;
pub mod matcher;
pub mod sites;

pub use disruptions::build_disruptions;
pub use matcher::{AlertMatcher, KeywordMatcher, MatchStrength};
pub use sites::{Site, SiteRegistry, SiteSignal, build_site_markers};
