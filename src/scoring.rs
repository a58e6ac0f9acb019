//! Composite index scoring.
//!
//! Pure functions: `composite = Σ weight[c] × score[c]`, clamped to 0–100.

use crate::error::{IndexError, Result};
use crate::series::{DailySeries, SeriesPoint};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed drift of the weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// Fails with [`IndexError::Configuration`] unless weights sum to 1.0 ± 0.01.
pub fn validate_weights(weights: &BTreeMap<String, f64>) -> Result<()> {
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(IndexError::Configuration(format!(
            "category weights must sum to 1.0, got {sum:.4}"
        )));
    }
    Ok(())
}

fn check_present(
    weights: &BTreeMap<String, f64>,
    present: impl Fn(&str) -> bool,
) -> Result<()> {
    let missing: Vec<String> = weights
        .keys()
        .filter(|k| !present(k.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(IndexError::MissingCategory(missing));
    }
    Ok(())
}

/// Weighted composite of the current category scores.
///
/// # Errors
///
/// [`IndexError::Configuration`] if the weights do not sum to 1.0, and
/// [`IndexError::MissingCategory`] if any weighted category has no score.
pub fn compute_composite(
    scores: &BTreeMap<String, f64>,
    weights: &BTreeMap<String, f64>,
) -> Result<f64> {
    validate_weights(weights)?;
    check_present(weights, |k| scores.contains_key(k))?;

    let composite: f64 = weights.iter().map(|(cat, w)| w * scores[cat]).sum();
    Ok(clamp_score(composite))
}

/// Applies [`compute_composite`] pointwise over category histories.
///
/// Every series is forward-filled onto the union of all dates; dates before
/// any category's first observation are dropped.
pub fn compute_composite_series(
    histories: &BTreeMap<String, DailySeries>,
    weights: &BTreeMap<String, f64>,
) -> Result<DailySeries> {
    validate_weights(weights)?;
    check_present(weights, |k| histories.contains_key(k))?;

    let axis: Vec<NaiveDate> = weights
        .keys()
        .flat_map(|cat| histories[cat].dates())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let aligned: Vec<(f64, Vec<Option<f64>>)> = weights
        .iter()
        .map(|(cat, w)| (*w, histories[cat].reindex_ffill(&axis)))
        .collect();

    let points = axis
        .iter()
        .enumerate()
        .filter_map(|(i, &date)| {
            let total = aligned
                .iter()
                .map(|(w, values)| values[i].map(|v| w * v))
                .sum::<Option<f64>>()?;
            Some(SeriesPoint {
                date,
                score: clamp_score(total),
            })
        })
        .collect();

    Ok(DailySeries { points })
}

/// Human-readable band for a 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthTier {
    Healthy,
    Stable,
    Stressed,
    Critical,
}

impl HealthTier {
    /// | Range    | Tier     |
    /// |----------|----------|
    /// | >= 80    | Healthy  |
    /// | >= 60    | Stable   |
    /// | >= 40    | Stressed |
    /// | < 40     | Critical |
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => HealthTier::Healthy,
            s if s >= 60.0 => HealthTier::Stable,
            s if s >= 40.0 => HealthTier::Stressed,
            _ => HealthTier::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthTier::Healthy => "Healthy",
            HealthTier::Stable => "Stable",
            HealthTier::Stressed => "Stressed",
            HealthTier::Critical => "Critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn six_weights() -> BTreeMap<String, f64> {
        map(&[
            ("weather", 0.10),
            ("supply_chain", 0.20),
            ("energy", 0.20),
            ("tariffs", 0.15),
            ("trucking", 0.15),
            ("geopolitical", 0.20),
        ])
    }

    #[test]
    fn test_six_category_composite() {
        let scores = map(&[
            ("weather", 90.0),
            ("supply_chain", 80.0),
            ("energy", 70.0),
            ("tariffs", 60.0),
            ("trucking", 50.0),
            ("geopolitical", 40.0),
        ]);
        let composite = compute_composite(&scores, &six_weights()).unwrap();
        assert!((composite - 63.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_category_rejected() {
        let scores = map(&[("weather", 90.0), ("energy", 70.0)]);
        let err = compute_composite(&scores, &six_weights()).unwrap_err();
        match err {
            IndexError::MissingCategory(missing) => {
                assert!(missing.contains(&"tariffs".to_string()));
                assert_eq!(missing.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_weights_summing_to_point_nine_rejected() {
        let weights = map(&[("a", 0.5), ("b", 0.4)]);
        let scores = map(&[("a", 50.0), ("b", 50.0)]);
        assert!(matches!(
            compute_composite(&scores, &weights),
            Err(IndexError::Configuration(_))
        ));
    }

    #[test]
    fn test_weights_within_tolerance_accepted() {
        let weights = map(&[("a", 0.505), ("b", 0.5)]);
        let scores = map(&[("a", 100.0), ("b", 100.0)]);
        let composite = compute_composite(&scores, &weights).unwrap();
        assert_eq!(composite, 100.0);
    }

    #[test]
    fn test_composite_stays_in_range_for_extreme_scores() {
        let weights = six_weights();
        for value in [0.0, 0.5, 33.3, 99.99, 100.0] {
            let scores: BTreeMap<String, f64> =
                weights.keys().map(|k| (k.clone(), value)).collect();
            let c = compute_composite(&scores, &weights).unwrap();
            assert!((0.0..=100.0).contains(&c), "{c} out of range");
        }
    }

    #[test]
    fn test_composite_is_deterministic() {
        let scores = map(&[("a", 12.5), ("b", 87.25)]);
        let weights = map(&[("a", 0.3), ("b", 0.7)]);
        let first = compute_composite(&scores, &weights).unwrap();
        let second = compute_composite(&scores, &weights).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_composite_series_aligns_dates() {
        use crate::series::date_axis;
        let end = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let axis = date_axis(end, 3);

        let mut histories = BTreeMap::new();
        histories.insert("a".to_string(), DailySeries::flat(&axis, 100.0));
        // b only has the last two days
        histories.insert("b".to_string(), DailySeries::flat(&axis[1..], 50.0));

        let weights = map(&[("a", 0.5), ("b", 0.5)]);
        let series = compute_composite_series(&histories, &weights).unwrap();

        assert_eq!(series.dates(), axis[1..].to_vec());
        assert_eq!(series.values(), vec![75.0, 75.0]);
    }

    #[test]
    fn test_health_tier_boundaries() {
        assert_eq!(HealthTier::from_score(100.0), HealthTier::Healthy);
        assert_eq!(HealthTier::from_score(80.0), HealthTier::Healthy);
        assert_eq!(HealthTier::from_score(79.9), HealthTier::Stable);
        assert_eq!(HealthTier::from_score(60.0), HealthTier::Stable);
        assert_eq!(HealthTier::from_score(59.9), HealthTier::Stressed);
        assert_eq!(HealthTier::from_score(40.0), HealthTier::Stressed);
        assert_eq!(HealthTier::from_score(39.9), HealthTier::Critical);
        assert_eq!(HealthTier::from_score(0.0), HealthTier::Critical);
    }
}
