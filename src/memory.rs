//! In-memory [`SearchBackend`] over ingested log lines.
//!
//! Executes the same [`QuerySpec`] a remote search cluster would receive, which
//! makes the whole analysis pipeline usable on local files and in tests.
//! Record time comes from the query's time field when the record carries a
//! parseable value there, otherwise from the timestamp detected at ingest.

use crate::backend::{
    AggregationResponse, AggregationResult, AggregationSpec, Condition, Deadline, Hit, NamedAggregation, QuerySpec,
    ResponseBucket, SearchBackend,
};
use crate::categorize::floor_time;
use crate::error::{BackendError, BackendErrorKind};
use crate::filter::FilterExpr;
use crate::parser::{self, parse_ts_candidate, LogRecord};
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

const MAX_HISTOGRAM_BUCKETS: i64 = 10_000;

/// A record matched by a query, placed at its time for that query.
#[derive(Clone, Copy)]
struct Doc<'a> {
    record: &'a LogRecord,
    at: DateTime<Utc>,
}

impl<'a> Doc<'a> {
    fn get(&self, field: &str) -> Option<&'a str> {
        self.record.get(field)
    }
}

fn record_time(record: &LogRecord, time_field: &str) -> Option<DateTime<Utc>> {
    record.get(time_field).and_then(parse_ts_candidate).or(record.timestamp)
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Vec<LogRecord>,
    index_name: Option<String>,
    max_buckets: Option<usize>,
    time_keys: Vec<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut backend = Self::new();
        for l in lines {
            backend.push_line(l.as_ref());
        }
        backend
    }

    /// Only queries naming this index (or no index) are accepted.
    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Fail terms aggregations that would produce more buckets than `limit`.
    pub fn with_max_buckets(mut self, limit: usize) -> Self {
        self.max_buckets = Some(limit);
        self
    }

    pub fn with_time_keys(mut self, keys: Vec<String>) -> Self {
        self.time_keys = keys;
        self
    }

    /// Parse and store one line. Lines without a recognizable timestamp are
    /// kept but never fall into a query window. Returns the record id.
    pub fn push_line(&mut self, line: &str) -> usize {
        let keys: Vec<&str> = self.time_keys.iter().map(String::as_str).collect();
        self.records.push(parser::parse_line_with_hints(line, &keys));
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn untimed(&self) -> usize {
        self.records.iter().filter(|r| r.timestamp.is_none()).count()
    }

    fn evaluate(
        &self,
        aggs: &[NamedAggregation],
        docs: &[Doc<'_>],
    ) -> Result<BTreeMap<String, AggregationResult>, BackendError> {
        let mut out = BTreeMap::new();
        for agg in aggs {
            let result = match &agg.spec {
                AggregationSpec::Cardinality { field } => {
                    let distinct: AHashSet<&str> = docs.iter().filter_map(|d| d.get(field)).collect();
                    AggregationResult { value: Some(distinct.len() as u64), ..Default::default() }
                }
                AggregationSpec::ValueCount { field } => {
                    let n = docs.iter().filter(|d| d.get(field).is_some()).count();
                    AggregationResult { value: Some(n as u64), ..Default::default() }
                }
                AggregationSpec::Terms { field, size, subs } => self.terms(field, *size, subs, docs)?,
                AggregationSpec::DateHistogram { interval, bounds, subs, .. } => {
                    let step = interval.num_seconds();
                    if step <= 0 {
                        return Err(BackendError::new(BackendErrorKind::Malformed, "date_histogram interval must be positive"));
                    }
                    let expected = (bounds.end - bounds.start).num_seconds() / step;
                    if expected > MAX_HISTOGRAM_BUCKETS {
                        return Err(BackendError::new(
                            BackendErrorKind::TooManyValues,
                            format!("too_many_buckets: date_histogram would create {expected} buckets"),
                        ));
                    }
                    let mut buckets = Vec::new();
                    let mut cursor = floor_time(bounds.start, *interval);
                    while cursor < bounds.end {
                        let next = cursor + *interval;
                        let inside: Vec<Doc<'_>> =
                            docs.iter().copied().filter(|d| d.at >= cursor && d.at < next).collect();
                        buckets.push(ResponseBucket {
                            key: cursor.to_rfc3339(),
                            key_as_date: Some(cursor),
                            doc_count: inside.len() as u64,
                            aggregations: self.evaluate(subs, &inside)?,
                        });
                        cursor = next;
                    }
                    AggregationResult { buckets, ..Default::default() }
                }
                AggregationSpec::DateRange { ranges, subs, .. } => {
                    let mut buckets = Vec::with_capacity(ranges.len());
                    for r in ranges {
                        let inside: Vec<Doc<'_>> =
                            docs.iter().copied().filter(|d| d.at >= r.start && d.at < r.end).collect();
                        buckets.push(ResponseBucket {
                            key: r.key.clone(),
                            key_as_date: Some(r.start),
                            doc_count: inside.len() as u64,
                            aggregations: self.evaluate(subs, &inside)?,
                        });
                    }
                    AggregationResult { buckets, ..Default::default() }
                }
                AggregationSpec::TopHits { size } => {
                    AggregationResult { hits: docs.iter().take(*size).map(|d| to_hit(d)).collect(), ..Default::default() }
                }
            };
            out.insert(agg.name.clone(), result);
        }
        Ok(out)
    }

    fn terms(
        &self,
        field: &str,
        size: usize,
        subs: &[NamedAggregation],
        docs: &[Doc<'_>],
    ) -> Result<AggregationResult, BackendError> {
        let mut groups: AHashMap<&str, Vec<Doc<'_>>> = AHashMap::new();
        for d in docs.iter().copied() {
            if let Some(v) = d.get(field) {
                groups.entry(v).or_default().push(d);
            }
        }
        let produced = groups.len().min(size);
        if let Some(limit) = self.max_buckets {
            if produced > limit {
                return Err(BackendError::new(
                    BackendErrorKind::TooManyValues,
                    format!("too_many_buckets: terms on '{field}' would create {produced} buckets (limit {limit})"),
                ));
            }
        }
        let mut groups: Vec<(&str, Vec<Doc<'_>>)> = groups.into_iter().collect();
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
        groups.truncate(size);
        let buckets = groups
            .into_iter()
            .map(|(key, members)| {
                Ok(ResponseBucket {
                    key: key.to_string(),
                    key_as_date: None,
                    doc_count: members.len() as u64,
                    aggregations: self.evaluate(subs, &members)?,
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        Ok(AggregationResult { buckets, ..Default::default() })
    }
}

fn to_hit(doc: &Doc<'_>) -> Hit {
    Hit { timestamp: Some(doc.at), source: doc.record.source.clone() }
}

fn condition_matches(condition: &Condition, record: &LogRecord) -> bool {
    match condition {
        Condition::Exists(field) => record.get(field).is_some(),
        Condition::AnyOf { field, values } => record
            .get(field)
            .map(|v| values.iter().any(|want| want.eq_ignore_ascii_case(v)))
            .unwrap_or(false),
    }
}

impl SearchBackend for MemoryBackend {
    fn execute(&self, query: &QuerySpec, deadline: &Deadline) -> Result<AggregationResponse, BackendError> {
        if deadline.check().is_err() {
            return Err(BackendError::new(BackendErrorKind::Unavailable, "request aborted before execution"));
        }
        if let (Some(wanted), Some(mine)) = (&query.index, &self.index_name) {
            if wanted != mine {
                return Err(BackendError::new(
                    BackendErrorKind::UnknownTarget,
                    format!("index_not_found_exception: no such index [{wanted}]"),
                ));
            }
        }
        let filter = query
            .filter
            .as_deref()
            .map(FilterExpr::parse)
            .transpose()
            .map_err(|e| BackendError::new(BackendErrorKind::FilterSyntax, e.to_string()))?;

        let mut matched: Vec<Doc<'_>> = self
            .records
            .par_iter()
            .filter_map(|r| {
                let at = record_time(r, &query.time_field)?;
                query.window.contains(at).then_some(Doc { record: r, at })
            })
            .filter(|d| query.conditions.iter().all(|c| condition_matches(c, d.record)))
            .filter(|d| filter.as_ref().map(|f| f.matches(d.record)).unwrap_or(true))
            .collect();
        matched.sort_by_key(|d| d.at);
        debug!(matched = matched.len(), aggregations = query.aggregations.len(), "memory backend query");

        Ok(AggregationResponse {
            total: matched.len() as u64,
            hits: matched.iter().take(query.size).map(|r| to_hit(r)).collect(),
            aggregations: self.evaluate(&query.aggregations, &matched)?,
        })
    }
}
