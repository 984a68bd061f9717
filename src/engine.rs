//! The analysis operations exposed to callers: field trends, error
//! categorization and message-pattern analysis.
//!
//! Every operation follows the same pipeline (resolve range, plan, one main
//! query, shared trend math, render) and returns the raw backend payload, a
//! structured summary and a rendered report side by side.

use crate::backend::{
    AggregationResponse, AggregationSpec, Condition, Deadline, Hit, NamedAggregation, NamedRange, QuerySpec,
    ResponseBucket, SearchBackend, Window,
};
use crate::categorize::{builtin_categories, CategoryDefinition, PatternCategorizer, TextRecord};
use crate::config::EngineConfig;
use crate::error::{AnalysisError, ConfigError, QueryContext};
use crate::masking::mask_text;
use crate::planner::{AggregationPlan, AggregationPlanner, PlanRequest, Strategy};
use crate::render::{self, Bucket, GlyphStyle, RenderOptions};
use crate::timerange::{format_interval, TimeRange, TimeRangeResolver};
use crate::trend::{PeriodCounts, TrendCalculator, TrendConfig, TrendResult};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, info, warn};

const BEFORE: &str = "before";
const AFTER: &str = "after";

/// Raw backend payload, structured summary and rendered report.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput<S> {
    pub raw: Value,
    pub summary: S,
    pub report: String,
}

/// Parameters shared by every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonParams {
    pub range: String,
    /// Window end; defaults to now.
    pub end: Option<DateTime<Utc>>,
    pub filter: Option<String>,
    pub min_significance: Option<f64>,
    /// Overrides the volume floor that keeps stable rows in the output.
    pub min_count: Option<u64>,
    pub style: Option<GlyphStyle>,
    pub top: Option<usize>,
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            range: "24h".into(),
            end: None,
            filter: None,
            min_significance: None,
            min_count: None,
            style: None,
            top: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    #[serde(flatten)]
    pub common: CommonParams,
    /// Candidate field names, primary first.
    pub fields: Vec<String>,
    pub sub_field: Option<String>,
    pub force_simple: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorParams {
    #[serde(flatten)]
    pub common: CommonParams,
    /// Severity field candidates; empty means the configured list.
    pub level_fields: Vec<String>,
    pub categories: Vec<CategoryDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternParams {
    #[serde(flatten)]
    pub common: CommonParams,
    pub message_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueDetail {
    pub value: String,
    pub count: u64,
    pub timeline: Vec<Bucket>,
    pub sub_values: Vec<(String, u64)>,
    pub example: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub range: TimeRange,
    pub field: String,
    pub replaced_field: Option<String>,
    pub strategy: Strategy,
    pub cardinality: u64,
    pub total_documents: u64,
    pub before_total: u64,
    pub after_total: u64,
    pub insufficient_data: bool,
    pub trends: Vec<TrendResult>,
    pub timeline: Vec<Bucket>,
    pub details: Vec<ValueDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStat {
    pub id: String,
    pub name: String,
    pub count: u64,
    pub share_pct: f64,
    pub timeline: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub range: TimeRange,
    pub severity_field: Option<String>,
    pub replaced_field: Option<String>,
    pub total_errors: u64,
    pub sampled: u64,
    pub uncategorized: u64,
    pub insufficient_data: bool,
    pub categories: Vec<CategoryStat>,
    pub trends: Vec<TrendResult>,
    pub timeline: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateStat {
    pub template: String,
    pub count: u64,
    pub before: u64,
    pub after: u64,
    pub example: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub range: TimeRange,
    pub total_documents: u64,
    pub sampled: u64,
    pub distinct_templates: usize,
    pub insufficient_data: bool,
    pub templates: Vec<TemplateStat>,
    pub trends: Vec<TrendResult>,
    pub timeline: Vec<Bucket>,
}

/// Request-scoped values derived from [`CommonParams`].
struct Request {
    range: TimeRange,
    base: QuerySpec,
    context: QueryContext,
    render: RenderOptions,
    threshold: f64,
    calculator: TrendCalculator,
}

pub struct TrendEngine<B> {
    backend: B,
    config: EngineConfig,
    resolver: TimeRangeResolver,
    planner: AggregationPlanner,
    categorizer: PatternCategorizer,
}

impl<B: SearchBackend> TrendEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            resolver: TimeRangeResolver::new(config.intervals.clone()),
            planner: AggregationPlanner::new(config.planner.clone()),
            categorizer: PatternCategorizer::new(builtin_categories(), &config.categories),
            backend,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn prepare(&self, common: &CommonParams, operation: &str) -> Result<Request, AnalysisError> {
        let range = match common.end {
            Some(end) => self.resolver.resolve_at(&common.range, end)?,
            None => self.resolver.resolve(&common.range)?,
        };
        let mut base = QuerySpec::new(
            self.config.fields.timestamp_field.clone(),
            Window { start: range.start_point, end: range.end_point },
        )
        .with_filter(common.filter.as_deref());
        base.index = self.config.fields.index.clone();

        let mut render = self.config.render.clone();
        if let Some(style) = common.style {
            render.style = style;
        }
        if let Some(top) = common.top {
            render.max_rows = top.max(1);
        }
        let trend_config = TrendConfig {
            min_volume: common.min_count.unwrap_or(self.config.trend.min_volume),
            ..self.config.trend
        };
        Ok(Request {
            context: QueryContext { operation: operation.to_string(), range: range.raw.clone(), ..Default::default() },
            threshold: common.min_significance.unwrap_or(self.config.trend.default_significance_pct).abs(),
            calculator: TrendCalculator::new(trend_config),
            range,
            base,
            render,
        })
    }

    fn run(&self, query: &QuerySpec, context: &QueryContext, deadline: &Deadline) -> Result<AggregationResponse, AnalysisError> {
        deadline.check()?;
        let started = Instant::now();
        let resp = self.backend.execute(query, deadline).map_err(|source| {
            warn!(kind = ?source.kind, %context, "backend query failed");
            AnalysisError::Backend { source, context: context.clone() }
        })?;
        debug!(
            total = resp.total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            operation = %context.operation,
            "backend query"
        );
        Ok(resp)
    }

    fn timeline_aggregation(&self, range: &TimeRange) -> AggregationSpec {
        AggregationSpec::DateHistogram {
            field: self.config.fields.timestamp_field.clone(),
            interval: range.interval,
            bounds: Window { start: range.start_point, end: range.end_point },
            subs: Vec::new(),
        }
    }

    fn periods_aggregation(&self, range: &TimeRange, subs: Vec<NamedAggregation>) -> AggregationSpec {
        AggregationSpec::DateRange {
            field: self.config.fields.timestamp_field.clone(),
            ranges: vec![
                NamedRange { key: BEFORE.into(), start: range.start_point, end: range.mid_point },
                NamedRange { key: AFTER.into(), start: range.mid_point, end: range.end_point },
            ],
            subs,
        }
    }

    /// The single query shape for field trends, derived from the plan.
    pub fn trend_query(&self, base: &QuerySpec, range: &TimeRange, plan: &AggregationPlan) -> QuerySpec {
        let terms_size = self.config.planner.terms_size;
        let values = |subs: Vec<NamedAggregation>| AggregationSpec::Terms {
            field: plan.category_field().to_string(),
            size: terms_size,
            subs,
        };
        // Values are selected over the whole window, then split by period,
        // so a selected value always carries both of its period counts.
        let mut query = base
            .clone()
            .with_aggregation("timeline", self.timeline_aggregation(range))
            .with_aggregation("periods", self.periods_aggregation(range, Vec::new()))
            .with_aggregation(
                "values",
                values(vec![NamedAggregation::new("periods", self.periods_aggregation(range, Vec::new()))]),
            );
        if let AggregationPlan::Nested { sub_field, examples, .. } = plan {
            let mut subs = vec![NamedAggregation::new("timeline", self.timeline_aggregation(range))];
            if let Some(sub) = sub_field {
                subs.push(NamedAggregation::new("sub_values", AggregationSpec::Terms { field: sub.clone(), size: 5, subs: Vec::new() }));
            }
            if *examples > 0 {
                subs.push(NamedAggregation::new("examples", AggregationSpec::TopHits { size: *examples }));
            }
            query = query.with_aggregation("details", values(subs));
        }
        query
    }

    pub fn detect_trends(&self, params: &TrendParams, deadline: &Deadline) -> Result<AnalysisOutput<TrendSummary>, AnalysisError> {
        let mut req = self.prepare(&params.common, "detect_trends")?;
        let candidates = self.field_candidates(&params.fields)?;
        let planned = self.planner.plan(
            &self.backend,
            &PlanRequest {
                candidates: &candidates,
                force_simple: params.force_simple,
                sub_field: params.sub_field.as_deref(),
                base: &req.base,
                context: &req.context,
            },
            deadline,
        )?;
        req.context.field = Some(planned.probe.field.clone());
        req.context.strategy = Some(planned.plan.strategy().as_str().to_string());

        let query = self.trend_query(&req.base, &req.range, &planned.plan);
        let resp = self.run(&query, &req.context, deadline)?;

        let (before, after) = value_period_counts(&resp);
        let trends = req.calculator.calculate(&before, &after, req.threshold);
        let timeline = to_buckets(resp.buckets("timeline"), req.range.interval);
        let details = resp
            .buckets("details")
            .iter()
            .map(|b| ValueDetail {
                value: b.key.clone(),
                count: b.doc_count,
                timeline: to_buckets(b.sub("timeline"), req.range.interval),
                sub_values: b.sub("sub_values").iter().map(|s| (s.key.clone(), s.doc_count)).collect(),
                example: b.sub_hits("examples").first().map(|h| h.source.clone()),
            })
            .collect();
        info!(
            field = %planned.probe.field,
            strategy = planned.plan.strategy().as_str(),
            trends = trends.len(),
            "trend detection finished"
        );

        let summary = TrendSummary {
            field: planned.probe.field.clone(),
            replaced_field: planned.replaced_field.clone(),
            strategy: planned.plan.strategy(),
            cardinality: planned.probe.cardinality,
            total_documents: resp.total,
            before_total: before.total,
            after_total: after.total,
            insufficient_data: resp.total == 0,
            trends,
            timeline,
            details,
            range: req.range,
        };
        let report = trend_report(&summary, &req.render);
        let raw = json!({
            "query": query.to_search_body(),
            "probe": planned.probe,
            "response": resp.to_value(),
        });
        Ok(AnalysisOutput { raw, summary, report })
    }

    /// Caller candidates first; a severity-like primary gets the configured
    /// severity alternatives appended.
    fn field_candidates(&self, fields: &[String]) -> Result<Vec<String>, AnalysisError> {
        let mut out: Vec<String> = fields.iter().map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect();
        let Some(primary) = out.first().cloned() else {
            return Err(ConfigError::Invalid("at least one field name is required".into()).into());
        };
        let severity = &self.config.planner.severity_fields;
        if severity.contains(&primary) {
            out.extend(severity.iter().filter(|s| **s != primary).cloned());
        }
        Ok(out.into_iter().unique().collect())
    }

    fn sampled_query(&self, req: &Request) -> QuerySpec {
        let per_period = (self.config.fields.sample_size / 2).max(1);
        req.base
            .clone()
            .with_aggregation("timeline", self.timeline_aggregation(&req.range))
            .with_aggregation(
                "periods",
                self.periods_aggregation(
                    &req.range,
                    vec![NamedAggregation::new("sample", AggregationSpec::TopHits { size: per_period })],
                ),
            )
    }

    pub fn analyze_errors(&self, params: &ErrorParams, deadline: &Deadline) -> Result<AnalysisOutput<ErrorSummary>, AnalysisError> {
        let mut req = self.prepare(&params.common, "analyze_errors")?;
        let categorizer: Cow<'_, PatternCategorizer> = if params.categories.is_empty() {
            Cow::Borrowed(&self.categorizer)
        } else {
            let custom: Vec<CategoryDefinition> =
                self.config.categories.iter().chain(params.categories.iter()).cloned().collect();
            Cow::Owned(PatternCategorizer::new(builtin_categories(), &custom))
        };

        let candidates = if params.level_fields.is_empty() {
            self.config.planner.severity_fields.clone()
        } else {
            params.level_fields.clone()
        };
        let resolution = self.planner.resolve_field(&self.backend, &candidates, &req.base, &req.context, deadline)?;
        let severity_field = (resolution.probe.hits > 0).then(|| resolution.probe.field.clone());
        let mut query = self.sampled_query(&req);
        match &severity_field {
            Some(field) => {
                req.context.field = Some(field.clone());
                query = query.with_condition(Condition::AnyOf {
                    field: field.clone(),
                    values: self.config.fields.error_levels.clone(),
                });
            }
            None => warn!(?candidates, "no severity field has data; categorizing all messages"),
        }
        let resp = self.run(&query, &req.context, deadline)?;

        let message_fields = &self.config.fields.message_fields;
        let (before_records, after_records) = period_samples(&resp, message_fields);
        let categorized = |records: &[TextRecord]| {
            let mut counts = PeriodCounts::new(records.len() as u64);
            for r in records {
                for id in categorizer.categorize(&r.text) {
                    counts.add(id, 1);
                }
            }
            counts
        };
        let before = categorized(&before_records);
        let after = categorized(&after_records);
        let trends = req.calculator.calculate(&before, &after, req.threshold);

        let all: Vec<TextRecord> = before_records.into_iter().chain(after_records).collect();
        let counts = categorizer.count_by_bucket(&all, req.range.interval);
        let timeline = to_buckets(resp.buckets("timeline"), req.range.interval);
        let sampled = all.len() as u64;
        let categories = counts
            .totals
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, count)| CategoryStat {
                id: id.clone(),
                name: categorizer.name_of(id).unwrap_or(id).to_string(),
                count: *count,
                share_pct: if sampled == 0 { 0.0 } else { *count as f64 * 100.0 / sampled as f64 },
                timeline: fill_timeline(&timeline, counts.buckets.get(id)),
            })
            .collect();
        info!(severity_field = ?severity_field, sampled, trends = trends.len(), "error analysis finished");

        // Trend rows display category names rather than ids.
        let named_trends: Vec<TrendResult> = trends
            .iter()
            .map(|t| TrendResult { value: categorizer.name_of(&t.value).unwrap_or(&t.value).to_string(), ..t.clone() })
            .collect();
        let summary = ErrorSummary {
            severity_field,
            replaced_field: resolution.replaced_field,
            total_errors: resp.total,
            sampled,
            uncategorized: counts.uncategorized,
            insufficient_data: resp.total == 0,
            categories,
            trends,
            timeline,
            range: req.range,
        };
        let report = error_report(&summary, &named_trends, &req.render);
        let raw = json!({ "query": query.to_search_body(), "response": resp.to_value() });
        Ok(AnalysisOutput { raw, summary, report })
    }

    pub fn analyze_patterns(&self, params: &PatternParams, deadline: &Deadline) -> Result<AnalysisOutput<PatternSummary>, AnalysisError> {
        let req = self.prepare(&params.common, "analyze_patterns")?;
        let message_fields: Vec<String> = match &params.message_field {
            Some(f) => vec![f.clone()],
            None => self.config.fields.message_fields.clone(),
        };
        let mut query = self.sampled_query(&req);
        if let Some(field) = &params.message_field {
            query = query.with_condition(Condition::Exists(field.clone()));
        }
        let resp = self.run(&query, &req.context, deadline)?;

        let (before_records, after_records) = period_samples(&resp, &message_fields);
        let mut examples: BTreeMap<String, String> = BTreeMap::new();
        let mut templated = |records: &[TextRecord]| {
            let mut counts = PeriodCounts::new(records.len() as u64);
            for r in records {
                let template = mask_text(&r.text);
                examples.entry(template.clone()).or_insert_with(|| r.text.clone());
                counts.add(&template, 1);
            }
            counts
        };
        let before = templated(&before_records);
        let after = templated(&after_records);
        let trends = req.calculator.calculate(&before, &after, req.threshold);

        let templates: Vec<TemplateStat> = examples
            .iter()
            .map(|(template, example)| TemplateStat {
                template: template.clone(),
                count: before.get(template) + after.get(template),
                before: before.get(template),
                after: after.get(template),
                example: example.clone(),
                categories: self.categorizer.categorize(example).into_iter().map(str::to_string).collect(),
            })
            .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.template.cmp(&b.template)))
            .collect();
        info!(sampled = before.total + after.total, templates = templates.len(), "pattern analysis finished");

        let summary = PatternSummary {
            total_documents: resp.total,
            sampled: before.total + after.total,
            distinct_templates: templates.len(),
            insufficient_data: resp.total == 0,
            templates,
            trends,
            timeline: to_buckets(resp.buckets("timeline"), req.range.interval),
            range: req.range,
        };
        let report = pattern_report(&summary, &req.render);
        let raw = json!({ "query": query.to_search_body(), "response": resp.to_value() });
        Ok(AnalysisOutput { raw, summary, report })
    }
}

fn period_counts(resp: &AggregationResponse, f: impl Fn(&ResponseBucket) -> PeriodCounts) -> (PeriodCounts, PeriodCounts) {
    let get = |key: &str| resp.bucket("periods", key).map(&f).unwrap_or_default();
    (get(BEFORE), get(AFTER))
}

/// Period totals from `periods`, per-value counts from `values` → `periods`.
fn value_period_counts(resp: &AggregationResponse) -> (PeriodCounts, PeriodCounts) {
    let (mut before, mut after) = period_counts(resp, |b| PeriodCounts::new(b.doc_count));
    for value in resp.buckets("values") {
        for period in value.sub("periods") {
            match period.key.as_str() {
                BEFORE => before.add(&value.key, period.doc_count),
                AFTER => after.add(&value.key, period.doc_count),
                _ => {}
            }
        }
    }
    (before, after)
}

fn period_samples(resp: &AggregationResponse, message_fields: &[String]) -> (Vec<TextRecord>, Vec<TextRecord>) {
    let records = |key: &str| -> Vec<TextRecord> {
        resp.bucket("periods", key)
            .map(|b| b.sub_hits("sample").iter().filter_map(|h| to_text_record(h, message_fields)).collect())
            .unwrap_or_default()
    };
    (records(BEFORE), records(AFTER))
}

fn to_text_record(hit: &Hit, message_fields: &[String]) -> Option<TextRecord> {
    Some(TextRecord { timestamp: hit.timestamp?, text: hit.text(message_fields)?.to_string() })
}

pub fn bucket_label(key: DateTime<Utc>, interval: Duration) -> String {
    if interval >= Duration::days(1) {
        key.format("%Y-%m-%d").to_string()
    } else {
        key.format("%m-%d %H:%M").to_string()
    }
}

fn to_buckets(buckets: &[ResponseBucket], interval: Duration) -> Vec<Bucket> {
    buckets
        .iter()
        .filter_map(|b| {
            let key = b.key_as_date.or_else(|| DateTime::parse_from_rfc3339(&b.key).ok().map(|d| d.with_timezone(&Utc)))?;
            Some(Bucket { key, label: bucket_label(key, interval), count: b.doc_count })
        })
        .collect()
}

/// Same keys as `timeline`, counts taken from `counts` (missing keys are zero).
fn fill_timeline(timeline: &[Bucket], counts: Option<&BTreeMap<DateTime<Utc>, u64>>) -> Vec<Bucket> {
    timeline
        .iter()
        .map(|b| Bucket { count: counts.and_then(|c| c.get(&b.key)).copied().unwrap_or(0), ..b.clone() })
        .collect()
}

fn range_header(out: &mut String, title: &str, range: &TimeRange) {
    let fmt = |t: DateTime<Utc>| t.format("%Y-%m-%d %H:%M").to_string();
    let _ = writeln!(out, "## {title}\n");
    let _ = writeln!(
        out,
        "Range: last {} ({} → {}), {} buckets. Before: {} → {}, after: {} → {}.\n",
        range.raw,
        fmt(range.start_point),
        fmt(range.end_point),
        format_interval(range.interval),
        fmt(range.start_point),
        fmt(range.mid_point),
        fmt(range.mid_point),
        fmt(range.end_point),
    );
}

fn chart(out: &mut String, title: &str, timeline: &[Bucket], opts: &RenderOptions) {
    let _ = writeln!(out, "### {title}\n\n```text\n{}```\n", render::render_time_series(timeline, opts));
}

fn trend_report(s: &TrendSummary, opts: &RenderOptions) -> String {
    let mut out = String::new();
    range_header(&mut out, &format!("Trend analysis: `{}`", s.field), &s.range);
    if let Some(original) = &s.replaced_field {
        let _ = writeln!(out, "Field `{original}` had no data; using `{}` instead.\n", s.field);
    }
    let _ = writeln!(
        out,
        "Strategy: {} (cardinality {}, {} documents; before {}, after {}).\n",
        s.strategy.as_str(),
        s.cardinality,
        s.total_documents,
        s.before_total,
        s.after_total
    );
    if s.insufficient_data {
        out.push_str("No matching documents in this range.\n");
        return out;
    }
    chart(&mut out, "Volume over time", &s.timeline, opts);
    let _ = writeln!(out, "### Changes\n\n{}", render::render_trend_table(&s.trends, opts));
    if !s.details.is_empty() {
        out.push_str("### Top values\n\n| Value | Count | Timeline | Top sub-values |\n|---|---:|---|---|\n");
        for d in s.details.iter().take(opts.max_rows.max(1)) {
            let subs = d.sub_values.iter().map(|(k, c)| format!("{k} ({c})")).join(", ");
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                d.value.replace('|', "\\|"),
                d.count,
                render::sparkline(&d.timeline, opts.max_points),
                subs
            );
        }
    }
    out
}

fn error_report(s: &ErrorSummary, named_trends: &[TrendResult], opts: &RenderOptions) -> String {
    let mut out = String::new();
    range_header(&mut out, "Error analysis", &s.range);
    match &s.severity_field {
        Some(f) => {
            let _ = writeln!(out, "Errors selected by `{f}`; {} matched, {} sampled.\n", s.total_errors, s.sampled);
        }
        None => {
            let _ = writeln!(out, "No severity field found; {} messages sampled.\n", s.sampled);
        }
    }
    if s.insufficient_data {
        out.push_str("No matching documents in this range.\n");
        return out;
    }
    chart(&mut out, "Errors over time", &s.timeline, opts);
    let rows: Vec<(String, u64)> = s.categories.iter().map(|c| (c.name.clone(), c.count)).collect();
    let _ = writeln!(out, "### Categories\n\n{}", render::render_category_table(&rows, s.sampled, opts));
    if s.uncategorized > 0 {
        let _ = writeln!(out, "{} sampled messages matched no category.\n", s.uncategorized);
    }
    for c in s.categories.iter().take(opts.max_rows.max(1)) {
        let _ = writeln!(out, "- {}: {}", c.name, render::sparkline(&c.timeline, opts.max_points));
    }
    let _ = writeln!(out, "\n### Changes\n\n{}", render::render_trend_table(named_trends, opts));
    out
}

fn pattern_report(s: &PatternSummary, opts: &RenderOptions) -> String {
    let mut out = String::new();
    range_header(&mut out, "Message patterns", &s.range);
    let _ = writeln!(
        out,
        "{} documents, {} sampled, {} distinct templates.\n",
        s.total_documents, s.sampled, s.distinct_templates
    );
    if s.insufficient_data {
        out.push_str("No matching documents in this range.\n");
        return out;
    }
    chart(&mut out, "Volume over time", &s.timeline, opts);
    out.push_str("### Top templates\n\n| Template | Count | Before | After | Categories |\n|---|---:|---:|---:|---|\n");
    for t in s.templates.iter().take(opts.max_rows.max(1)) {
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} |",
            t.template.replace('|', "\\|").replace('`', "'"),
            t.count,
            t.before,
            t.after,
            t.categories.join(", ")
        );
    }
    let _ = writeln!(out, "\n### Changes\n\n{}", render::render_trend_table(&s.trends, opts));
    out
}
