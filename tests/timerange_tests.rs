use chrono::{Duration, TimeZone, Utc};
use trendscope::error::AnalysisError;
use trendscope::timerange::{parse_span, IntervalStep, IntervalTable, TimeRangeResolver};

#[test]
fn seven_days_splits_at_midpoint() {
    let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
    let range = TimeRangeResolver::default().resolve_at("7d", end).unwrap();
    assert_eq!(range.start_point, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(range.mid_point, Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap());
    assert_eq!(range.end_point, end);
    assert_eq!(range.interval, Duration::hours(4));
    assert!(range.in_before(range.start_point));
    assert!(!range.in_before(range.mid_point));
    assert!(range.in_after(range.mid_point));
    assert!(!range.in_after(range.end_point));
}

#[test]
fn interval_table_boundaries() {
    let r = TimeRangeResolver::default();
    assert_eq!(r.suggest_interval("1h").unwrap(), Duration::minutes(5));
    assert_eq!(r.suggest_interval("6h").unwrap(), Duration::minutes(5));
    assert_eq!(r.suggest_interval("7h").unwrap(), Duration::minutes(15));
    assert_eq!(r.suggest_interval("24h").unwrap(), Duration::minutes(15));
    assert_eq!(r.suggest_interval("2d").unwrap(), Duration::hours(4));
    assert_eq!(r.suggest_interval("1w").unwrap(), Duration::hours(4));
    assert_eq!(r.suggest_interval("1M").unwrap(), Duration::days(1));
    assert_eq!(r.suggest_interval("90d").unwrap(), Duration::days(7));
    assert_eq!(r.suggest_interval("1y").unwrap(), Duration::days(7));
}

#[test]
fn custom_table_is_used() {
    let table = IntervalTable {
        steps: vec![IntervalStep { max_range_secs: 3_600, interval_secs: 60 }],
        fallback_secs: 600,
    };
    let r = TimeRangeResolver::new(table);
    assert_eq!(r.suggest_interval("30m").unwrap(), Duration::minutes(1));
    assert_eq!(r.suggest_interval("2h").unwrap(), Duration::minutes(10));
}

#[test]
fn malformed_ranges_are_rejected() {
    for bad in ["", "7", "d", "7x", "-1d", "1.5h", "0h", "7 days", "h7", "1000y"] {
        let err = parse_span(bad).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidRangeFormat(ref s) if s == bad), "{bad:?}");
    }
}

#[test]
fn surrounding_whitespace_is_tolerated() {
    assert_eq!(parse_span(" 15m ").unwrap(), Duration::minutes(15));
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(TimeRangeResolver::default().resolve_at(" 1h", end).unwrap().raw, "1h");
}
