//! Per-site risk markers.
//!
//! A site's score blends its own local signal with the global non-site
//! composite, then deducts a capped penalty for negative news that names the
//! site (direct) or its surroundings (regional):
//!
//! ```text
//! composite = local × 0.6 + global × 0.4
//! score     = composite − min(Σ penalties, 40)
//! ```

use crate::config::IndexConfig;
use crate::derive::matcher::{AlertMatcher, MatchStrength};
use crate::scoring::{HealthTier, clamp_score};
use crate::snapshot::{Alert, MapMarker, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LOCAL_SIGNAL_WEIGHT: f64 = 0.60;
pub const GLOBAL_WEIGHT: f64 = 0.40;
/// Used when a site's local signal is missing.
pub const UNAVAILABLE_SIGNAL_SCORE: f64 = 75.0;
pub const PENALTY_CAP: f64 = 40.0;

const MAX_NEWS_LINES: usize = 3;
const TITLE_LIMIT: usize = 58;

/// A named location with the keywords that tie news to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub direct: Vec<String>,
    pub regional: Vec<String>,
}

impl Site {
    pub fn new(name: &str, lat: f64, lon: f64, direct: &[&str], regional: &[&str]) -> Self {
        let lower = |kws: &[&str]| -> Vec<String> { kws.iter().map(|k| k.to_lowercase()).collect() };
        Self {
            name: name.to_string(),
            lat,
            lon,
            direct: lower(direct),
            regional: lower(regional),
        }
    }
}

/// Local signal reading for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSignal {
    pub score: f64,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct SiteRegistry {
    pub sites: Vec<Site>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Major container ports and canal gateways.
    pub fn major_ports() -> Self {
        Self::new(vec![
            Site::new("Shanghai", 31.23, 121.47, &["shanghai", "yangshan"], &["east china sea", "yangtze"]),
            Site::new("Ningbo-Zhoushan", 29.87, 121.55, &["ningbo", "zhoushan"], &["east china sea", "zhejiang"]),
            Site::new("Singapore", 1.26, 103.84, &["singapore"], &["malacca", "southeast asia"]),
            Site::new("Busan", 35.10, 129.04, &["busan"], &["south korea", "korea strait"]),
            Site::new("Jebel Ali", 25.01, 55.06, &["jebel ali", "dubai"], &["hormuz", "persian gulf"]),
            Site::new("Port Said", 31.26, 32.30, &["suez", "port said"], &["red sea", "houthi", "bab el-mandeb"]),
            Site::new("Rotterdam", 51.95, 4.14, &["rotterdam"], &["north sea", "netherlands"]),
            Site::new("Hamburg", 53.54, 9.98, &["hamburg"], &["elbe", "germany", "baltic"]),
            Site::new("Los Angeles / Long Beach", 33.74, -118.27, &["los angeles", "long beach"], &["west coast", "california", "ilwu"]),
            Site::new("Houston", 29.73, -95.27, &["houston"], &["gulf of mexico", "texas"]),
            Site::new("Panama Canal", 9.08, -79.68, &["panama canal"], &["panama", "central america"]),
        ])
    }
}

fn penalty(strength: MatchStrength, severity: Severity) -> f64 {
    match (strength, severity) {
        (MatchStrength::Direct, Severity::High) => 15.0,
        (MatchStrength::Direct, Severity::Medium) => 8.0,
        (MatchStrength::Direct, Severity::Low) => 3.0,
        (MatchStrength::Regional, Severity::High) => 8.0,
        (MatchStrength::Regional, Severity::Medium) => 4.0,
        (MatchStrength::Regional, Severity::Low) => 2.0,
    }
}

fn sentiment_label(compound: f64) -> &'static str {
    match compound {
        c if c <= -0.75 => "Very negative",
        c if c <= -0.5 => "Strongly negative",
        c if c <= -0.25 => "Negative",
        _ => "Slightly negative",
    }
}

fn short_title(title: &str) -> String {
    if title.chars().count() > TITLE_LIMIT {
        format!("{}...", title.chars().take(TITLE_LIMIT).collect::<String>())
    } else {
        title.to_string()
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Weighted composite of every category except the site-specific one, with
/// the remaining weights renormalized to sum to 1.0.
pub fn global_baseline(config: &IndexConfig, scores: &BTreeMap<String, f64>) -> f64 {
    let others: Vec<(&str, f64)> = config
        .categories
        .iter()
        .filter(|c| c.key != config.site_category)
        .map(|c| (c.key.as_str(), c.weight))
        .collect();
    let weight_sum: f64 = others.iter().map(|(_, w)| w).sum();
    if weight_sum <= 0.0 {
        return config.neutral_score;
    }
    others
        .iter()
        .map(|(cat, w)| scores.get(*cat).copied().unwrap_or(config.neutral_score) * w / weight_sum)
        .sum()
}

fn global_context(config: &IndexConfig, scores: &BTreeMap<String, f64>, has_news: bool) -> String {
    let by_tier = |tier: HealthTier| {
        config
            .categories
            .iter()
            .filter(|c| c.key != config.site_category)
            .filter(|c| scores.get(&c.key).map(|s| HealthTier::from_score(*s)) == Some(tier))
            .map(|c| c.label.as_str())
            .collect::<Vec<&str>>()
    };
    let critical = by_tier(HealthTier::Critical);
    let stressed = by_tier(HealthTier::Stressed);

    if !critical.is_empty() {
        format!("Global alert: {} at critical levels", critical.join(", "))
    } else if !stressed.is_empty() {
        let names: Vec<&str> = stressed.into_iter().take(3).collect();
        format!("Global: {} slightly elevated", names.join(", "))
    } else if has_news {
        "Global: All macro indicators healthy".to_string()
    } else {
        "No disruptions reported".to_string()
    }
}

/// Builds one marker per registered site.
pub fn build_site_markers(
    config: &IndexConfig,
    registry: &SiteRegistry,
    scores: &BTreeMap<String, f64>,
    signals: &BTreeMap<String, SiteSignal>,
    alerts: &[Alert],
    summaries: &BTreeMap<String, String>,
    matcher: &dyn AlertMatcher,
) -> Vec<MapMarker> {
    let global = global_baseline(config, scores);

    registry
        .sites
        .iter()
        .map(|site| {
            let (local, local_summary) = match signals.get(&site.name) {
                Some(s) => (clamp_score(s.score), s.summary.clone()),
                None => (UNAVAILABLE_SIGNAL_SCORE, "Data unavailable".to_string()),
            };
            let composite = local * LOCAL_SIGNAL_WEIGHT + global * GLOBAL_WEIGHT;

            let matched: Vec<(&Alert, MatchStrength)> = alerts
                .iter()
                .filter_map(|a| matcher.classify(a, site).map(|m| (a, m)))
                .collect();
            let news_penalty = matched
                .iter()
                .map(|(a, m)| penalty(*m, a.severity))
                .sum::<f64>()
                .min(PENALTY_CAP);

            let score = round1(clamp_score(composite - news_penalty));
            let tier = HealthTier::from_score(score);

            let mut description = vec![
                format!("Score: {score:.0}/100 - {}", tier.label()),
                format!("Local conditions: {local_summary} (score: {local:.0})"),
            ];
            match summaries.get(&site.name).filter(|s| !s.trim().is_empty()) {
                Some(summary) => description.push(format!("Status: {summary}")),
                None => description.push(global_context(config, scores, !matched.is_empty())),
            }
            for (alert, strength) in matched.iter().take(MAX_NEWS_LINES) {
                let scope = match strength {
                    MatchStrength::Direct => "Direct",
                    MatchStrength::Regional => "Regional",
                };
                description.push(format!(
                    "[{}] {} · {} ({:+.2}) · {scope} impact",
                    alert.severity.as_str().to_uppercase(),
                    short_title(&alert.title),
                    sentiment_label(alert.sentiment),
                    alert.sentiment,
                ));
            }

            MapMarker {
                name: site.name.clone(),
                lat: site.lat,
                lon: site.lon,
                score,
                tier,
                local_signal: local,
                news_penalty,
                description,
            }
        })
        .collect()
}
