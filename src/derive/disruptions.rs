//! Disruption list built from two independent signals.
//!
//! Category-threshold events and high-severity alerts are concatenated as-is.
//! The same real-world event can appear once from each source; no
//! deduplication is attempted.

use crate::config::IndexConfig;
use crate::snapshot::{Alert, Disruption, DisruptionStatus, Severity};
use std::collections::BTreeMap;

const TITLE_LIMIT: usize = 60;
/// Category events below this score are Active rather than Monitoring.
const ACTIVE_BELOW: f64 = 50.0;

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn build_disruptions(
    config: &IndexConfig,
    scores: &BTreeMap<String, f64>,
    alerts: &[Alert],
) -> Vec<Disruption> {
    let mut disruptions: Vec<Disruption> = config
        .categories
        .iter()
        .filter_map(|c| {
            let score = *scores.get(&c.key)?;
            if score >= config.disruption_threshold {
                return None;
            }
            let severity = if score < config.critical_threshold {
                "Critical"
            } else {
                "Stressed"
            };
            Some(Disruption {
                event: format!("{} - {severity}", c.label),
                region: "Global".to_string(),
                impact_score: round1((100.0 - score) / 10.0),
                categories: vec![c.key.clone()],
                started: "Ongoing".to_string(),
                status: if score < ACTIVE_BELOW {
                    DisruptionStatus::Active
                } else {
                    DisruptionStatus::Monitoring
                },
            })
        })
        .collect();

    disruptions.extend(
        alerts
            .iter()
            .filter(|a| a.severity == Severity::High)
            .map(|a| {
                let event = if a.title.chars().count() > TITLE_LIMIT {
                    format!("{}...", a.title.chars().take(TITLE_LIMIT).collect::<String>())
                } else {
                    a.title.clone()
                };
                Disruption {
                    event,
                    region: "Global".to_string(),
                    impact_score: round1(a.sentiment.abs() * 10.0),
                    categories: vec![a.category.clone()],
                    started: "Recent".to_string(),
                    status: DisruptionStatus::Active,
                }
            }),
    );

    disruptions
}
