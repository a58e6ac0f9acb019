//! Daily score series and the date-axis alignment used by every cycle.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// One day's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub score: f64,
}

/// Chronologically ordered daily scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub points: Vec<SeriesPoint>,
}

/// Returns `days` consecutive dates ending at (and including) `end`.
pub fn date_axis(end: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days as u64)
        .rev()
        .filter_map(|back| end.checked_sub_days(Days::new(back)))
        .collect()
}

impl DailySeries {
    /// Builds a series from unordered points; later duplicates of a date win.
    pub fn from_points(mut points: Vec<SeriesPoint>) -> Self {
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<SeriesPoint> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.date == p.date => *last = p,
                _ => deduped.push(p),
            }
        }
        Self { points: deduped }
    }

    pub fn flat(axis: &[NaiveDate], value: f64) -> Self {
        Self {
            points: axis
                .iter()
                .map(|&date| SeriesPoint { date, score: value })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.score).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn last(&self) -> Option<SeriesPoint> {
        self.points.last().copied()
    }

    /// Value for each date of `axis`, carrying the most recent earlier
    /// observation forward. Dates before the first observation are `None`.
    pub fn reindex_ffill(&self, axis: &[NaiveDate]) -> Vec<Option<f64>> {
        let mut out = Vec::with_capacity(axis.len());
        let mut idx = 0;
        let mut carried = None;
        for date in axis {
            while idx < self.points.len() && self.points[idx].date <= *date {
                carried = Some(self.points[idx].score);
                idx += 1;
            }
            out.push(carried);
        }
        out
    }

    /// Forward-filled series over a contiguous daily range ending at the
    /// latest observation, at most `days` long.
    pub fn contiguous(&self, days: usize) -> Self {
        let Some(last) = self.last() else {
            return Self::default();
        };
        let axis = date_axis(last.date, days);
        let points = axis
            .iter()
            .zip(self.reindex_ffill(&axis))
            .filter_map(|(&date, v)| v.map(|score| SeriesPoint { date, score }))
            .collect();
        Self { points }
    }

    /// Aligns provider history onto the cycle's canonical axis.
    ///
    /// Gaps are forward-filled, leading gaps take `current`, and the final
    /// date is always `current` so the latest point never comes from a
    /// previous day's close.
    pub fn align(history: Option<&DailySeries>, axis: &[NaiveDate], current: f64) -> Self {
        let filled = match history {
            Some(h) if !h.is_empty() => h.reindex_ffill(axis),
            _ => return Self::flat(axis, current),
        };
        let mut points: Vec<SeriesPoint> = axis
            .iter()
            .zip(filled)
            .map(|(&date, v)| SeriesPoint {
                date,
                score: v.unwrap_or(current),
            })
            .collect();
        if let Some(last) = points.last_mut() {
            last.score = current;
        }
        Self { points }
    }
}
