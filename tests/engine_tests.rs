use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use trendscope::backend::{CancelHandle, Deadline};
use trendscope::categorize::CategoryDefinition;
use trendscope::config::EngineConfig;
use trendscope::engine::{CommonParams, ErrorParams, PatternParams, TrendEngine, TrendParams};
use trendscope::error::{AnalysisError, BackendErrorKind};
use trendscope::planner::Strategy;
use trendscope::trend::Direction;
use trendscope::MemoryBackend;

fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
}

fn before_ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64)
}

fn after_ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap() + Duration::minutes(i as i64)
}

fn line(ts: DateTime<Utc>, fields: serde_json::Value) -> String {
    let mut v = fields;
    v["@timestamp"] = json!(ts.to_rfc3339());
    v.to_string()
}

/// Before: A×100, B×10 and 90 unlabeled. After: A×50, B×90 and 60 unlabeled.
fn service_lines() -> Vec<String> {
    let mut lines = Vec::new();
    let mut push = |ts: DateTime<Utc>, svc: Option<&str>| {
        let v = match svc {
            Some(s) => json!({ "service": s, "host": format!("node-{}", lines.len() % 3), "message": "ok" }),
            None => json!({ "message": "ok" }),
        };
        lines.push(line(ts, v));
    };
    let mut i = 0;
    for (svc, n) in [(Some("A"), 100), (Some("B"), 10), (None, 90)] {
        for _ in 0..n {
            push(before_ts(i), svc);
            i += 1;
        }
    }
    i = 0;
    for (svc, n) in [(Some("A"), 50), (Some("B"), 90), (None, 60)] {
        for _ in 0..n {
            push(after_ts(i), svc);
            i += 1;
        }
    }
    lines
}

fn common(range: &str) -> CommonParams {
    CommonParams { range: range.into(), end: Some(end()), ..CommonParams::default() }
}

fn trend_params(fields: &[&str]) -> TrendParams {
    TrendParams {
        common: common("7d"),
        fields: fields.iter().map(|s| s.to_string()).collect(),
        ..TrendParams::default()
    }
}

#[test]
fn field_trends_normalize_and_rank() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let out = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap();
    let s = &out.summary;

    assert_eq!(s.field, "service");
    assert_eq!(s.strategy, Strategy::Nested);
    assert_eq!(s.cardinality, 2);
    assert_eq!((s.before_total, s.after_total, s.total_documents), (200, 200, 400));
    assert_eq!(s.trends.len(), 2);
    assert_eq!(s.trends[0].value, "B");
    assert!((s.trends[0].percentage_change - 800.0).abs() < 1e-9);
    assert_eq!(s.trends[0].direction, Direction::Increasing);
    assert_eq!(s.trends[1].value, "A");
    assert!((s.trends[1].percentage_change - -50.0).abs() < 1e-9);
    assert_eq!(s.trends[1].direction, Direction::Decreasing);

    // 7d at 4h buckets.
    assert_eq!(s.timeline.len(), 42);
    assert_eq!(s.timeline.iter().map(|b| b.count).sum::<u64>(), 400);
    assert_eq!(s.details.len(), 2);
    assert_eq!(s.details[0].value, "A");
    assert_eq!(s.details[0].count, 150);
    assert!(s.details[0].example.is_some());

    assert!(out.report.contains("| B | 10 | 90 | +80 | +800.0% | ↑ |"));
    assert!(out.report.contains("(showing 14 of 42 buckets)"));
    assert!(out.raw["query"]["aggs"].is_object());
    assert_eq!(out.raw["response"]["total"], 400);
}

#[test]
fn forced_simple_skips_value_details() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let params = TrendParams { force_simple: true, ..trend_params(&["service"]) };
    let out = engine.detect_trends(&params, &Deadline::none()).unwrap();
    assert_eq!(out.summary.strategy, Strategy::Simple);
    assert!(out.summary.details.is_empty());
    assert_eq!(out.summary.trends[0].value, "B");
    assert!(!out.report.contains("### Top values"));
}

#[test]
fn sub_field_breakdown_in_nested_details() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let params = TrendParams { sub_field: Some("host".into()), ..trend_params(&["service"]) };
    let out = engine.detect_trends(&params, &Deadline::none()).unwrap();
    let a = &out.summary.details[0];
    assert_eq!(a.sub_values.len(), 3);
    assert_eq!(a.sub_values.iter().map(|(_, c)| c).sum::<u64>(), 150);
}

#[test]
fn severity_field_falls_back_to_alternative() {
    let lines: Vec<String> = (0..30)
        .map(|i| {
            let sev = if i % 3 == 0 { "error" } else { "info" };
            let ts = if i < 15 { before_ts(i) } else { after_ts(i) };
            line(ts, json!({ "severity": sev, "message": "tick" }))
        })
        .collect();
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), EngineConfig::default());
    let out = engine.detect_trends(&trend_params(&["level"]), &Deadline::none()).unwrap();
    assert_eq!(out.summary.field, "severity");
    assert_eq!(out.summary.replaced_field.as_deref(), Some("level"));
    assert!(out.report.contains("Field `level` had no data; using `severity` instead."));
}

#[test]
fn no_documents_is_a_valid_outcome() {
    let engine = TrendEngine::new(MemoryBackend::new(), EngineConfig::default());
    let out = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap();
    assert!(out.summary.insufficient_data);
    assert!(out.summary.trends.is_empty());
    assert!(out.report.contains("No matching documents in this range."));
}

#[test]
fn filter_restricts_documents() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let mut params = trend_params(&["service"]);
    params.common.filter = Some("service:A".into());
    let out = engine.detect_trends(&params, &Deadline::none()).unwrap();
    assert_eq!(out.summary.total_documents, 150);
    // A is the only value, so its share never changes.
    assert_eq!(out.summary.trends.len(), 1);
    assert_eq!(out.summary.trends[0].direction, Direction::Stable);
}

#[test]
fn bad_filter_maps_to_filter_syntax() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let mut params = trend_params(&["service"]);
    params.common.filter = Some("(service:A".into());
    let err = engine.detect_trends(&params, &Deadline::none()).unwrap_err();
    assert_eq!(err.backend_kind(), Some(BackendErrorKind::FilterSyntax));
    let msg = err.to_string();
    assert!(msg.contains("filter expression could not be parsed"), "{msg}");
    assert!(msg.contains("field=service"), "{msg}");
}

#[test]
fn bucket_limit_maps_to_too_many_values() {
    let backend = MemoryBackend::from_lines(service_lines()).with_max_buckets(1);
    let engine = TrendEngine::new(backend, EngineConfig::default());
    let err = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap_err();
    assert_eq!(err.backend_kind(), Some(BackendErrorKind::TooManyValues));
    assert!(err.to_string().contains("strategy=nested"));
}

#[test]
fn unknown_index_maps_to_unknown_target() {
    let backend = MemoryBackend::from_lines(service_lines()).with_index_name("logs");
    let mut config = EngineConfig::default();
    config.fields.index = Some("metrics".into());
    let engine = TrendEngine::new(backend, config);
    let err = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap_err();
    assert_eq!(err.backend_kind(), Some(BackendErrorKind::UnknownTarget));
}

#[test]
fn invalid_range_fails_before_querying() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let mut params = trend_params(&["service"]);
    params.common.range = "seven days".into();
    let err = engine.detect_trends(&params, &Deadline::none()).unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidRangeFormat(_)));
}

#[test]
fn missing_field_list_is_a_config_error() {
    let engine = TrendEngine::new(MemoryBackend::new(), EngineConfig::default());
    let err = engine.detect_trends(&trend_params(&[]), &Deadline::none()).unwrap_err();
    assert!(matches!(err, AnalysisError::Config(_)));
}

#[test]
fn cancellation_aborts_the_pipeline() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let cancel = CancelHandle::default();
    let deadline = Deadline::none().with_cancel(cancel.clone());
    cancel.cancel();
    let err = engine.detect_trends(&trend_params(&["service"]), &deadline).unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
}

#[test]
fn expired_deadline_aborts_the_pipeline() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(service_lines()), EngineConfig::default());
    let deadline = Deadline::after(std::time::Duration::ZERO);
    let err = engine.detect_trends(&trend_params(&["service"]), &deadline).unwrap_err();
    assert!(matches!(err, AnalysisError::DeadlineExceeded));
}

/// Before: 10 timeouts, 10 refused connections. After: 30 timeouts, 10 refused.
fn error_lines() -> Vec<String> {
    let mut lines = Vec::new();
    let mut i = 0;
    for (msg, n) in [("upstream call timed out after 30s", 10), ("connection refused by 10.0.0.5", 10)] {
        for _ in 0..n {
            lines.push(line(before_ts(i), json!({ "level": "ERROR", "message": msg })));
            i += 1;
        }
    }
    i = 0;
    for (msg, n) in [("upstream call timed out after 45s", 30), ("connection refused by 10.0.0.9", 10)] {
        for _ in 0..n {
            lines.push(line(after_ts(i), json!({ "level": "ERROR", "message": msg })));
            i += 1;
        }
    }
    for j in 0..50 {
        lines.push(line(after_ts(100 + j), json!({ "level": "INFO", "message": "request timed out, retrying" })));
    }
    lines
}

#[test]
fn error_categories_trend_by_share() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(error_lines()), EngineConfig::default());
    let params = ErrorParams { common: common("7d"), ..ErrorParams::default() };
    let out = engine.analyze_errors(&params, &Deadline::none()).unwrap();
    let s = &out.summary;

    assert_eq!(s.severity_field.as_deref(), Some("level"));
    assert_eq!(s.total_errors, 60);
    assert_eq!(s.sampled, 60);
    assert_eq!(s.uncategorized, 0);
    assert_eq!(s.categories[0].id, "timeout");
    assert_eq!(s.categories[0].count, 40);
    assert_eq!(s.categories[1].id, "connection");

    // Equal magnitude, so ids break the tie.
    assert_eq!(s.trends.len(), 2);
    assert_eq!(s.trends[0].value, "connection");
    assert!((s.trends[0].percentage_change - -50.0).abs() < 1e-9);
    assert_eq!(s.trends[1].value, "timeout");
    assert!((s.trends[1].percentage_change - 50.0).abs() < 1e-9);

    assert!(out.report.contains("| Timeouts | 40 | 66.7% |"));
    assert!(out.report.contains("| Connection Problems | 10 | 10 | +0 | -50.0% | ↓ |"));
}

#[test]
fn custom_categories_join_builtins() {
    let engine = TrendEngine::new(MemoryBackend::from_lines(error_lines()), EngineConfig::default());
    let params = ErrorParams {
        common: common("7d"),
        categories: vec![CategoryDefinition::new("upstream", "Upstream", &["upstream"], "calls to upstream services")],
        ..ErrorParams::default()
    };
    let out = engine.analyze_errors(&params, &Deadline::none()).unwrap();
    let upstream = out.summary.categories.iter().find(|c| c.id == "upstream").unwrap();
    assert_eq!(upstream.count, 40);
    assert_eq!(upstream.name, "Upstream");
    assert_eq!(upstream.timeline.len(), out.summary.timeline.len());
}

#[test]
fn errors_without_severity_field_use_all_messages() {
    let lines: Vec<String> = (0..20)
        .map(|i| {
            let ts = if i < 10 { before_ts(i) } else { after_ts(i) };
            line(ts, json!({ "message": "disk full on /var/lib/data" }))
        })
        .collect();
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), EngineConfig::default());
    let params = ErrorParams { common: common("7d"), ..ErrorParams::default() };
    let out = engine.analyze_errors(&params, &Deadline::none()).unwrap();
    assert_eq!(out.summary.severity_field, None);
    assert_eq!(out.summary.sampled, 20);
    assert_eq!(out.summary.categories[0].id, "resource");
    assert!(out.report.contains("No severity field found"));
}

#[test]
fn patterns_group_masked_messages() {
    let mut lines = Vec::new();
    for i in 0..20 {
        lines.push(line(before_ts(i), json!({ "message": format!("User {i} logged in") })));
        lines.push(line(before_ts(100 + i), json!({ "message": format!("Cache miss for key {}", i * 7) })));
        lines.push(line(after_ts(i), json!({ "message": format!("User {} logged in", i + 500) })));
    }
    for i in 0..60 {
        lines.push(line(after_ts(100 + i), json!({ "message": format!("Cache miss for key {}", i * 3) })));
    }
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), EngineConfig::default());
    let params = PatternParams { common: common("7d"), ..PatternParams::default() };
    let out = engine.analyze_patterns(&params, &Deadline::none()).unwrap();
    let s = &out.summary;

    assert_eq!(s.total_documents, 120);
    assert_eq!(s.distinct_templates, 2);
    assert_eq!(s.templates[0].template, "Cache miss for key <NUM>");
    assert_eq!((s.templates[0].before, s.templates[0].after), (20, 60));
    assert_eq!(s.templates[1].template, "User <NUM> logged in");

    assert_eq!(s.trends[0].value, "Cache miss for key <NUM>");
    assert!((s.trends[0].percentage_change - 50.0).abs() < 1e-9);
    assert_eq!(s.trends[1].direction, Direction::Decreasing);
    assert!(out.report.contains("`User <NUM> logged in`"));
}

#[test]
fn params_deserialize_with_defaults() {
    let params: TrendParams = serde_json::from_str(r#"{"fields":["service"],"min_significance":25}"#).unwrap();
    assert_eq!(params.common.range, "24h");
    assert_eq!(params.common.min_significance, Some(25.0));
    assert_eq!(params.fields, vec!["service"]);
    assert!(!params.force_simple);

    let params: ErrorParams = serde_json::from_str(r#"{"range":"1h","style":"ascii"}"#).unwrap();
    assert_eq!(params.common.range, "1h");
    assert!(params.categories.is_empty());
}

#[test]
fn explicit_message_field_limits_patterns_to_documents_carrying_it() {
    let lines = vec![
        line(before_ts(0), json!({ "event": "job 1 started" })),
        line(before_ts(1), json!({ "message": "ignored 1" })),
        line(after_ts(0), json!({ "event": "job 2 started" })),
    ];
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), EngineConfig::default());
    let params = PatternParams { common: common("7d"), message_field: Some("event".into()) };
    let out = engine.analyze_patterns(&params, &Deadline::none()).unwrap();
    assert_eq!(out.summary.total_documents, 2);
    assert_eq!(out.summary.templates.len(), 1);
    assert_eq!(out.summary.templates[0].template, "job <NUM> started");
    assert_eq!(out.raw["query"]["query"]["bool"]["filter"][1]["exists"]["field"], "event");
}

#[test]
fn truncated_value_set_keeps_both_period_counts() {
    let mut lines = Vec::new();
    for (svc, n, before) in [("A", 10, true), ("B", 9, true), ("A", 5, false), ("B", 10, false)] {
        for i in 0..n {
            let ts = if before { before_ts(i) } else { after_ts(i) };
            lines.push(line(ts, json!({ "service": svc, "message": "ok" })));
        }
    }
    let mut config = EngineConfig::default();
    config.planner.terms_size = 1;
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), config);
    let out = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap();
    let s = &out.summary;

    assert_eq!((s.before_total, s.after_total), (19, 15));
    // Only B (19 over the window) survives the cut, with real counts on both sides.
    assert_eq!(s.trends.len(), 1);
    let b = &s.trends[0];
    assert_eq!(b.value, "B");
    assert_eq!((b.before_count, b.after_count), (9, 10));
    let expected = ((10.0 / 15.0) - (9.0 / 19.0)) / (9.0 / 19.0) * 100.0;
    assert!((b.percentage_change - expected).abs() < 1e-9, "{}", b.percentage_change);
    assert_eq!(b.direction, Direction::Increasing);
}

#[test]
fn configured_time_field_places_records() {
    // `build` sorts before `time` and also parses as an epoch timestamp.
    let lines: Vec<String> = (0..20)
        .map(|i| {
            let ts = if i < 10 { before_ts(i) } else { after_ts(i) };
            json!({ "build": 1_700_000_000u64, "time": ts.to_rfc3339(), "service": "api" }).to_string()
        })
        .collect();
    let mut config = EngineConfig::default();
    config.fields.timestamp_field = "time".into();
    let engine = TrendEngine::new(MemoryBackend::from_lines(lines), config);
    let out = engine.detect_trends(&trend_params(&["service"]), &Deadline::none()).unwrap();
    assert_eq!(out.summary.total_documents, 20);
    assert_eq!((out.summary.before_total, out.summary.after_total), (10, 10));
}
