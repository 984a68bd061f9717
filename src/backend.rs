//! Search backend collaborator: the query shape the engine emits and the
//! aggregation response it reads back.
//!
//! The engine never executes queries itself. It builds a [`QuerySpec`], hands it
//! to a [`SearchBackend`] together with a [`Deadline`], and reads the
//! [`AggregationResponse`] through tolerant accessors: a missing aggregation is an
//! empty bucket list, not an error.

use crate::error::{AnalysisError, BackendError};
use crate::timerange::format_interval;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cancellation flag shared between a caller and the pipeline it started.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Passed into every probe and query so a caller can abort mid-pipeline.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: CancelHandle,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: std::time::Duration) -> Self {
        Self { at: Some(Instant::now() + timeout), cancel: CancelHandle::default() }
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        match self.at {
            Some(at) if Instant::now() >= at => Err(AnalysisError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Exists(String),
    AnyOf { field: String, values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRange {
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedAggregation {
    pub name: String,
    pub spec: AggregationSpec,
}

impl NamedAggregation {
    pub fn new(name: impl Into<String>, spec: AggregationSpec) -> Self {
        Self { name: name.into(), spec }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationSpec {
    Cardinality { field: String },
    ValueCount { field: String },
    Terms { field: String, size: usize, subs: Vec<NamedAggregation> },
    DateHistogram {
        field: String,
        #[serde(serialize_with = "ser_interval")]
        interval: Duration,
        bounds: Window,
        subs: Vec<NamedAggregation>,
    },
    DateRange { field: String, ranges: Vec<NamedRange>, subs: Vec<NamedAggregation> },
    TopHits { size: usize },
}

fn ser_interval<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_interval(*d))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySpec {
    pub index: Option<String>,
    pub time_field: String,
    pub window: Window,
    pub filter: Option<String>,
    pub conditions: Vec<Condition>,
    /// Number of raw documents to return, oldest first.
    pub size: usize,
    pub aggregations: Vec<NamedAggregation>,
}

impl QuerySpec {
    pub fn new(time_field: impl Into<String>, window: Window) -> Self {
        Self {
            index: None,
            time_field: time_field.into(),
            window,
            filter: None,
            conditions: Vec::new(),
            size: 0,
            aggregations: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Option<&str>) -> Self {
        self.filter = filter.map(str::trim).filter(|f| !f.is_empty()).map(str::to_string);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_aggregation(mut self, name: impl Into<String>, spec: AggregationSpec) -> Self {
        self.aggregations.push(NamedAggregation::new(name, spec));
        self
    }

    /// Render an Elasticsearch/OpenSearch style request body.
    pub fn to_search_body(&self) -> Value {
        let mut must = vec![json!({
            "range": { self.time_field.as_str(): {
                "gte": self.window.start.to_rfc3339(),
                "lt": self.window.end.to_rfc3339(),
            }}
        })];
        if let Some(filter) = &self.filter {
            must.push(json!({ "query_string": { "query": filter } }));
        }
        for c in &self.conditions {
            must.push(match c {
                Condition::Exists(field) => json!({ "exists": { "field": field } }),
                Condition::AnyOf { field, values } => json!({ "terms": { field.as_str(): values } }),
            });
        }
        let mut body = json!({
            "size": self.size,
            "track_total_hits": true,
            "query": { "bool": { "filter": must } },
        });
        if self.size > 0 {
            body["sort"] = json!([{ self.time_field.as_str(): "asc" }]);
        }
        if !self.aggregations.is_empty() {
            body["aggs"] = aggs_body(&self.aggregations);
        }
        body
    }
}

fn aggs_body(aggs: &[NamedAggregation]) -> Value {
    let mut out = Map::new();
    for agg in aggs {
        let (mut node, subs) = match &agg.spec {
            AggregationSpec::Cardinality { field } => (json!({ "cardinality": { "field": field } }), None),
            AggregationSpec::ValueCount { field } => (json!({ "value_count": { "field": field } }), None),
            AggregationSpec::Terms { field, size, subs } => {
                (json!({ "terms": { "field": field, "size": size } }), Some(subs))
            }
            AggregationSpec::DateHistogram { field, interval, bounds, subs } => (
                json!({ "date_histogram": {
                    "field": field,
                    "fixed_interval": format_interval(*interval),
                    "min_doc_count": 0,
                    "extended_bounds": { "min": bounds.start.to_rfc3339(), "max": bounds.end.to_rfc3339() },
                }}),
                Some(subs),
            ),
            AggregationSpec::DateRange { field, ranges, subs } => {
                let ranges: Vec<Value> = ranges
                    .iter()
                    .map(|r| json!({ "key": r.key, "from": r.start.to_rfc3339(), "to": r.end.to_rfc3339() }))
                    .collect();
                (json!({ "date_range": { "field": field, "ranges": ranges } }), Some(subs))
            }
            AggregationSpec::TopHits { size } => (json!({ "top_hits": { "size": size } }), None),
        };
        if let Some(subs) = subs.filter(|s| !s.is_empty()) {
            node["aggs"] = aggs_body(subs);
        }
        out.insert(agg.name.clone(), node);
    }
    Value::Object(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub timestamp: Option<DateTime<Utc>>,
    pub source: Value,
}

impl Hit {
    /// Look up a dotted field path, falling back to a literal dotted key.
    pub fn field(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.source.get(path) {
            return Some(v);
        }
        path.split('.').try_fold(&self.source, |v, part| v.get(part))
    }

    pub fn text(&self, candidates: &[String]) -> Option<&str> {
        candidates.iter().find_map(|c| self.field(c).and_then(Value::as_str))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseBucket {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_as_date: Option<DateTime<Utc>>,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<String, AggregationResult>,
}

impl ResponseBucket {
    pub fn sub(&self, name: &str) -> &[ResponseBucket] {
        self.aggregations.get(name).map(|a| a.buckets.as_slice()).unwrap_or(&[])
    }

    pub fn sub_hits(&self, name: &str) -> &[Hit] {
        self.aggregations.get(name).map(|a| a.hits.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<ResponseBucket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationResponse {
    pub total: u64,
    pub hits: Vec<Hit>,
    pub aggregations: BTreeMap<String, AggregationResult>,
}

impl AggregationResponse {
    pub fn buckets(&self, name: &str) -> &[ResponseBucket] {
        self.aggregations.get(name).map(|a| a.buckets.as_slice()).unwrap_or(&[])
    }

    pub fn value(&self, name: &str) -> u64 {
        self.aggregations.get(name).and_then(|a| a.value).unwrap_or(0)
    }

    pub fn bucket(&self, name: &str, key: &str) -> Option<&ResponseBucket> {
        self.buckets(name).iter().find(|b| b.key == key)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The search engine the analysis pipeline delegates query execution to.
pub trait SearchBackend: Send + Sync {
    fn execute(&self, query: &QuerySpec, deadline: &Deadline) -> Result<AggregationResponse, BackendError>;
}

impl<T: SearchBackend + ?Sized> SearchBackend for &T {
    fn execute(&self, query: &QuerySpec, deadline: &Deadline) -> Result<AggregationResponse, BackendError> {
        (**self).execute(query, deadline)
    }
}

impl<T: SearchBackend + ?Sized> SearchBackend for Arc<T> {
    fn execute(&self, query: &QuerySpec, deadline: &Deadline) -> Result<AggregationResponse, BackendError> {
        (**self).execute(query, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> Window {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Window { start, end: start + Duration::hours(6) }
    }

    #[test]
    fn search_body_nests_sub_aggregations() {
        let w = window();
        let q = QuerySpec::new("@timestamp", w)
            .with_filter(Some("service:api"))
            .with_condition(Condition::Exists("level".into()))
            .with_aggregation(
                "by_value",
                AggregationSpec::Terms {
                    field: "level".into(),
                    size: 10,
                    subs: vec![NamedAggregation::new(
                        "timeline",
                        AggregationSpec::DateHistogram {
                            field: "@timestamp".into(),
                            interval: Duration::minutes(5),
                            bounds: w,
                            subs: vec![],
                        },
                    )],
                },
            );
        let body = q.to_search_body();
        assert_eq!(body["aggs"]["by_value"]["terms"]["field"], "level");
        assert_eq!(body["aggs"]["by_value"]["aggs"]["timeline"]["date_histogram"]["fixed_interval"], "5m");
        assert_eq!(body["query"]["bool"]["filter"][1]["query_string"]["query"], "service:api");
        assert_eq!(body["query"]["bool"]["filter"][2]["exists"]["field"], "level");
    }

    #[test]
    fn missing_aggregations_read_as_empty() {
        let resp = AggregationResponse::default();
        assert!(resp.buckets("nope").is_empty());
        assert_eq!(resp.value("nope"), 0);
        assert!(resp.bucket("periods", "before").is_none());
    }

    #[test]
    fn cancelled_deadline_reports_cancellation() {
        let d = Deadline::none();
        assert!(d.check().is_ok());
        d.cancel_handle().cancel();
        assert!(matches!(d.check(), Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn hit_field_resolves_nested_paths() {
        let hit = Hit { timestamp: None, source: json!({"log": {"level": "error"}, "error.message": "boom"}) };
        assert_eq!(hit.field("log.level").and_then(Value::as_str), Some("error"));
        assert_eq!(hit.text(&["message".into(), "error.message".into()]), Some("boom"));
    }
}
