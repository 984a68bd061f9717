use crate::categorize::CategoryDefinition;
use crate::error::ConfigError;
use crate::planner::PlannerConfig;
use crate::render::RenderOptions;
use crate::timerange::IntervalTable;
use crate::trend::TrendConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where the engine finds things in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub index: Option<String>,
    pub timestamp_field: String,
    pub message_fields: Vec<String>,
    /// Severity values counted as errors by error analysis.
    pub error_levels: Vec<String>,
    /// Upper bound on documents fetched for message-based analysis.
    pub sample_size: usize,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            index: None,
            timestamp_field: "@timestamp".into(),
            message_fields: vec!["message".into(), "msg".into(), "log".into(), "error.message".into()],
            error_levels: ["error", "err", "critical", "fatal", "panic", "ERROR", "CRITICAL", "FATAL"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sample_size: 5_000,
        }
    }
}

/// Immutable configuration handed to the engine at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
    pub trend: TrendConfig,
    pub intervals: IntervalTable,
    pub render: RenderOptions,
    pub fields: FieldConfig,
    /// Appended to the built-in categories; an equal id replaces the built-in.
    pub categories: Vec<CategoryDefinition>,
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.max_points == 0 || self.render.target_width == 0 {
            return Err(ConfigError::Invalid("render.max_points and render.target_width must be positive".into()));
        }
        if self.planner.terms_size == 0 {
            return Err(ConfigError::Invalid("planner.terms_size must be positive".into()));
        }
        if !(self.trend.default_significance_pct >= 0.0) {
            return Err(ConfigError::Invalid("trend.default_significance_pct must be non-negative".into()));
        }
        if self.fields.message_fields.is_empty() {
            return Err(ConfigError::Invalid("fields.message_fields must name at least one field".into()));
        }
        if let Some(c) = self.categories.iter().find(|c| c.id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("category '{}' has an empty id", c.name)));
        }
        Ok(())
    }
}
