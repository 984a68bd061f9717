use crate::error::AnalysisError;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*([mhdwMy])\s*$").unwrap());

/// A concrete analysis window split into two equal halves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub raw: String,
    pub start_point: DateTime<Utc>,
    pub mid_point: DateTime<Utc>,
    pub end_point: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration")]
    pub interval: Duration,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        self.end_point - self.start_point
    }

    /// True when `t` falls into the "before" half. The end point is exclusive.
    pub fn in_before(&self, t: DateTime<Utc>) -> bool {
        t >= self.start_point && t < self.mid_point
    }

    pub fn in_after(&self, t: DateTime<Utc>) -> bool {
        t >= self.mid_point && t < self.end_point
    }
}

fn serialize_duration<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_interval(*d))
}

/// One row of the interval lookup: ranges up to `max_range_secs` get `interval_secs` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalStep {
    pub max_range_secs: i64,
    pub interval_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalTable {
    pub steps: Vec<IntervalStep>,
    pub fallback_secs: i64,
}

impl Default for IntervalTable {
    fn default() -> Self {
        const MIN: i64 = 60;
        const HOUR: i64 = 60 * MIN;
        const DAY: i64 = 24 * HOUR;
        Self {
            steps: vec![
                IntervalStep { max_range_secs: 6 * HOUR, interval_secs: 5 * MIN },
                IntervalStep { max_range_secs: DAY, interval_secs: 15 * MIN },
                IntervalStep { max_range_secs: 7 * DAY, interval_secs: 4 * HOUR },
                IntervalStep { max_range_secs: 30 * DAY, interval_secs: DAY },
            ],
            fallback_secs: 7 * DAY,
        }
    }
}

impl IntervalTable {
    pub fn lookup(&self, range: Duration) -> Duration {
        let secs = range.num_seconds();
        let width = self
            .steps
            .iter()
            .find(|s| secs <= s.max_range_secs)
            .map(|s| s.interval_secs)
            .unwrap_or(self.fallback_secs);
        Duration::seconds(width.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeRangeResolver {
    table: IntervalTable,
}

impl TimeRangeResolver {
    pub fn new(table: IntervalTable) -> Self {
        Self { table }
    }

    pub fn resolve(&self, expr: &str) -> Result<TimeRange, AnalysisError> {
        self.resolve_at(expr, Utc::now())
    }

    /// Resolve `expr` as the window ending at `end`.
    pub fn resolve_at(&self, expr: &str, end: DateTime<Utc>) -> Result<TimeRange, AnalysisError> {
        let span = parse_span(expr)?;
        let start = end - span;
        let mid = start + span / 2;
        if !(start < mid && mid < end) {
            return Err(AnalysisError::InvalidRangeFormat(expr.to_string()));
        }
        Ok(TimeRange {
            raw: expr.trim().to_string(),
            start_point: start,
            mid_point: mid,
            end_point: end,
            interval: self.table.lookup(span),
        })
    }

    pub fn suggest_interval(&self, expr: &str) -> Result<Duration, AnalysisError> {
        Ok(self.table.lookup(parse_span(expr)?))
    }
}

/// Parse `<integer><unit>` into a duration. Months are 30 days and years 365.
pub fn parse_span(expr: &str) -> Result<Duration, AnalysisError> {
    let invalid = || AnalysisError::InvalidRangeFormat(expr.to_string());
    let caps = RE_RANGE.captures(expr).ok_or_else(invalid)?;
    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit_secs: i64 = match &caps[2] {
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 7 * 86_400,
        "M" => 30 * 86_400,
        "y" => 365 * 86_400,
        _ => return Err(invalid()),
    };
    let secs = amount.checked_mul(unit_secs).ok_or_else(invalid)?;
    if secs <= 0 || secs > 100 * 365 * 86_400 {
        return Err(invalid());
    }
    Ok(Duration::seconds(secs))
}

/// Compact rendering of a bucket width ("5m", "4h", "1d", "7d").
pub fn format_interval(d: Duration) -> String {
    let secs = d.num_seconds();
    if secs > 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs > 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_intervals() {
        assert_eq!(format_interval(Duration::minutes(5)), "5m");
        assert_eq!(format_interval(Duration::hours(4)), "4h");
        assert_eq!(format_interval(Duration::days(7)), "7d");
        assert_eq!(format_interval(Duration::seconds(90)), "90s");
    }

    #[test]
    fn months_and_years_are_fixed_lengths() {
        assert_eq!(parse_span("1M").unwrap(), Duration::days(30));
        assert_eq!(parse_span("2y").unwrap(), Duration::days(730));
    }
}
