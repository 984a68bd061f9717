//! Aggregation strategy selection and field-fallback probing.
//!
//! The planner issues cheap probes (distinct-value count, value count, total
//! documents) and decides up front which query shape to send. Adaptation is a
//! planning-time decision: nothing here retries a query after it failed.

use crate::backend::{AggregationSpec, Deadline, QuerySpec, SearchBackend};
use crate::error::{AnalysisError, QueryContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Simple,
    Nested,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Simple => "simple",
            Strategy::Nested => "nested",
        }
    }
}

/// The query shape for one request. Built once, consumed by the single
/// execution path in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum AggregationPlan {
    /// Flat per-period terms, no sub-aggregations.
    Simple { category_field: String },
    /// Per-period terms with a per-value timeline, optional secondary terms and example documents.
    Nested { category_field: String, sub_field: Option<String>, examples: usize },
}

impl AggregationPlan {
    pub fn strategy(&self) -> Strategy {
        match self {
            AggregationPlan::Simple { .. } => Strategy::Simple,
            AggregationPlan::Nested { .. } => Strategy::Nested,
        }
    }

    pub fn category_field(&self) -> &str {
        match self {
            AggregationPlan::Simple { category_field } | AggregationPlan::Nested { category_field, .. } => category_field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_cardinality: u64,
    pub max_documents: u64,
    pub max_unique_ratio: f64,
    pub terms_size: usize,
    pub example_docs: usize,
    /// Conventional alternatives tried when a severity-like field has no data.
    pub severity_fields: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_cardinality: 1000,
            max_documents: 10_000,
            max_unique_ratio: 0.1,
            terms_size: 50,
            example_docs: 1,
            severity_fields: vec!["level".into(), "log.level".into(), "severity".into()],
        }
    }
}

/// Result of probing one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldProbe {
    pub field: String,
    /// Documents carrying the field.
    pub hits: u64,
    pub cardinality: u64,
    /// All documents matching range and filter.
    pub total: u64,
}

/// What the planner decided and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedQuery {
    pub plan: AggregationPlan,
    pub probe: FieldProbe,
    /// The primary field, when a fallback replaced it.
    pub replaced_field: Option<String>,
    pub probes_issued: usize,
}

/// Per-request inputs to [`AggregationPlanner::plan`].
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub candidates: &'a [String],
    pub force_simple: bool,
    pub sub_field: Option<&'a str>,
    /// Probe template: window, filter and conditions, without aggregations.
    pub base: &'a QuerySpec,
    pub context: &'a QueryContext,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationPlanner {
    config: PlannerConfig,
}

impl AggregationPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// `simple` when forced, when the field has many distinct values, when the
    /// volume is large, or when the field looks closer to unique-per-document.
    pub fn decide_strategy(&self, cardinality: u64, total: u64, force_simple: bool) -> Strategy {
        let ratio = if total == 0 { 0.0 } else { cardinality as f64 / total as f64 };
        if force_simple
            || cardinality > self.config.max_cardinality
            || total > self.config.max_documents
            || ratio > self.config.max_unique_ratio
        {
            Strategy::Simple
        } else {
            Strategy::Nested
        }
    }

    pub fn build_plan(&self, field: &str, strategy: Strategy, sub_field: Option<&str>) -> AggregationPlan {
        match strategy {
            Strategy::Simple => AggregationPlan::Simple { category_field: field.to_string() },
            Strategy::Nested => AggregationPlan::Nested {
                category_field: field.to_string(),
                sub_field: sub_field.map(str::to_string),
                examples: self.config.example_docs,
            },
        }
    }

    pub fn plan<B: SearchBackend + ?Sized>(
        &self,
        backend: &B,
        request: &PlanRequest<'_>,
        deadline: &Deadline,
    ) -> Result<PlannedQuery, AnalysisError> {
        let resolution = self.resolve_field(backend, request.candidates, request.base, request.context, deadline)?;
        let probe = resolution.probe;
        let strategy = self.decide_strategy(probe.cardinality, probe.total, request.force_simple);
        info!(
            field = %probe.field,
            cardinality = probe.cardinality,
            total = probe.total,
            strategy = strategy.as_str(),
            "aggregation strategy selected"
        );
        Ok(PlannedQuery {
            plan: self.build_plan(&probe.field, strategy, request.sub_field),
            probe,
            replaced_field: resolution.replaced_field,
            probes_issued: resolution.probes_issued,
        })
    }

    /// Probe `candidates[0]`; when it has no documents, probe the remaining
    /// candidates in order and stop at the first with hits. Each alternative is
    /// probed at most once. When nothing has data the primary probe is returned.
    pub fn resolve_field<B: SearchBackend + ?Sized>(
        &self,
        backend: &B,
        candidates: &[String],
        base: &QuerySpec,
        context: &QueryContext,
        deadline: &Deadline,
    ) -> Result<FieldResolution, AnalysisError> {
        let mut ordered: Vec<&str> = Vec::with_capacity(candidates.len());
        for c in candidates.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !ordered.contains(&c) {
                ordered.push(c);
            }
        }
        let Some((primary, alternatives)) = ordered.split_first() else {
            return Err(AnalysisError::Config(crate::error::ConfigError::Invalid(
                "at least one field candidate is required".into(),
            )));
        };

        let primary_probe = self.probe(backend, primary, base, context, deadline)?;
        let mut probes_issued = 1;
        if primary_probe.hits > 0 {
            return Ok(FieldResolution { probe: primary_probe, replaced_field: None, probes_issued });
        }

        debug!(field = %primary, "primary field has no data, probing alternatives");
        for alt in alternatives {
            let probe = self.probe(backend, alt, base, context, deadline)?;
            probes_issued += 1;
            if probe.hits > 0 {
                info!(from = %primary, to = %alt, hits = probe.hits, "falling back to alternative field");
                return Ok(FieldResolution { probe, replaced_field: Some(primary.to_string()), probes_issued });
            }
        }
        Ok(FieldResolution { probe: primary_probe, replaced_field: None, probes_issued })
    }

    fn probe<B: SearchBackend + ?Sized>(
        &self,
        backend: &B,
        field: &str,
        base: &QuerySpec,
        context: &QueryContext,
        deadline: &Deadline,
    ) -> Result<FieldProbe, AnalysisError> {
        deadline.check()?;
        let query = base
            .clone()
            .with_size(0)
            .with_aggregation("field_cardinality", AggregationSpec::Cardinality { field: field.to_string() })
            .with_aggregation("field_present", AggregationSpec::ValueCount { field: field.to_string() });
        let resp = backend.execute(&query, deadline).map_err(|source| AnalysisError::Backend {
            source,
            context: QueryContext { field: Some(field.to_string()), ..context.clone() },
        })?;
        let probe = FieldProbe {
            field: field.to_string(),
            hits: resp.value("field_present"),
            cardinality: resp.value("field_cardinality"),
            total: resp.total,
        };
        debug!(field = %probe.field, hits = probe.hits, cardinality = probe.cardinality, total = probe.total, "field probe");
        Ok(probe)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResolution {
    pub probe: FieldProbe,
    pub replaced_field: Option<String>,
    pub probes_issued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_for_small_categorical_fields() {
        let p = AggregationPlanner::default();
        assert_eq!(p.decide_strategy(5, 1000, false), Strategy::Nested);
        assert_eq!(p.decide_strategy(5, 1000, true), Strategy::Simple);
    }

    #[test]
    fn simple_for_large_or_unique_fields() {
        let p = AggregationPlanner::default();
        assert_eq!(p.decide_strategy(10, 20_000, false), Strategy::Simple);
        assert_eq!(p.decide_strategy(200, 1000, false), Strategy::Simple);
        assert_eq!(p.decide_strategy(100, 1000, false), Strategy::Nested);
    }

    #[test]
    fn nested_plan_carries_sub_field() {
        let p = AggregationPlanner::default();
        let plan = p.build_plan("level", Strategy::Nested, Some("service"));
        assert_eq!(plan.category_field(), "level");
        assert_eq!(
            plan,
            AggregationPlan::Nested { category_field: "level".into(), sub_field: Some("service".into()), examples: 1 }
        );
    }
}
