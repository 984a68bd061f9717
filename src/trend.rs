//! Before/after trend math shared by every analysis operation.
//!
//! Counts are normalized by their period's total before they are compared, so
//! a category whose share of traffic is unchanged reads as stable even when the
//! overall volume doubled.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    /// Inclusive on both sides: exactly `threshold` is already significant.
    pub fn classify(percentage_change: f64, threshold: f64) -> Self {
        if percentage_change >= threshold {
            Direction::Increasing
        } else if percentage_change <= -threshold {
            Direction::Decreasing
        } else {
            Direction::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
            Direction::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Stable rows are still reported when either raw count reaches this floor.
    pub min_volume: u64,
    /// Values whose counts are both at or below this are ignored.
    pub min_signal: u64,
    /// Reported change for a value absent before and present after.
    pub new_appearance_pct: f64,
    pub default_significance_pct: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self { min_volume: 10, min_signal: 2, new_appearance_pct: 100.0, default_significance_pct: 10.0 }
    }
}

/// Raw counts observed in one period plus that period's total document count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodCounts {
    pub total: u64,
    pub counts: BTreeMap<String, u64>,
}

impl PeriodCounts {
    pub fn new(total: u64) -> Self {
        Self { total, counts: BTreeMap::new() }
    }

    pub fn with(mut self, value: &str, count: u64) -> Self {
        self.add(value, count);
        self
    }

    pub fn add(&mut self, value: &str, count: u64) {
        *self.counts.entry(value.to_string()).or_insert(0) += count;
    }

    pub fn get(&self, value: &str) -> u64 {
        self.counts.get(value).copied().unwrap_or(0)
    }

    pub fn normalized(&self, value: &str) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.get(value) as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryObservation {
    pub category_id: String,
    pub before_count: u64,
    pub after_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendResult {
    pub value: String,
    pub before_count: u64,
    pub after_count: u64,
    pub absolute_change: i64,
    pub percentage_change: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default)]
pub struct TrendCalculator {
    config: TrendConfig,
}

impl TrendCalculator {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Union of values seen in either period, in value order.
    pub fn observations(before: &PeriodCounts, after: &PeriodCounts) -> Vec<CategoryObservation> {
        let seen: AHashSet<&str> = before.counts.keys().chain(after.counts.keys()).map(String::as_str).collect();
        let mut values: Vec<&str> = seen.into_iter().collect();
        values.sort_unstable();
        values
            .into_iter()
            .map(|v| CategoryObservation {
                category_id: v.to_string(),
                before_count: before.get(v),
                after_count: after.get(v),
            })
            .collect()
    }

    /// Normalized percentage change per value, ranked by magnitude.
    pub fn calculate(&self, before: &PeriodCounts, after: &PeriodCounts, min_significance_pct: f64) -> Vec<TrendResult> {
        let mut results: Vec<TrendResult> = Self::observations(before, after)
            .into_iter()
            .filter(|o| o.before_count > self.config.min_signal || o.after_count > self.config.min_signal)
            .filter_map(|o| {
                let norm_before = before.normalized(&o.category_id);
                let norm_after = after.normalized(&o.category_id);
                let percentage_change = self.percentage_change(norm_before, norm_after);
                let direction = Direction::classify(percentage_change, min_significance_pct);
                let keep = direction != Direction::Stable
                    || o.before_count >= self.config.min_volume
                    || o.after_count >= self.config.min_volume;
                keep.then(|| TrendResult {
                    absolute_change: o.after_count as i64 - o.before_count as i64,
                    value: o.category_id,
                    before_count: o.before_count,
                    after_count: o.after_count,
                    percentage_change,
                    direction,
                })
            })
            .collect();
        results.sort_by(rank);
        results
    }

    fn percentage_change(&self, norm_before: f64, norm_after: f64) -> f64 {
        if norm_before > 0.0 {
            (norm_after - norm_before) / norm_before * 100.0
        } else if norm_after > 0.0 {
            self.config.new_appearance_pct
        } else {
            0.0
        }
    }
}

fn rank(a: &TrendResult, b: &TrendResult) -> Ordering {
    b.percentage_change
        .abs()
        .total_cmp(&a.percentage_change.abs())
        .then_with(|| a.value.cmp(&b.value))
}
