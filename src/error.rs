use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Broad classes of backend failure. Each one maps to its own user-facing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    FilterSyntax,
    UnknownTarget,
    Authentication,
    TooManyValues,
    Malformed,
    Unavailable,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Build an error from raw backend error text, guessing the kind from well-known markers.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let kind = if has(&["parse_exception", "query_shard_exception", "failed to parse query", "syntax error", "lexical error"]) {
            BackendErrorKind::FilterSyntax
        } else if has(&["too_many_buckets", "too many buckets", "max_clause_count", "too many distinct", "field expansion", "fielddata is disabled"]) {
            BackendErrorKind::TooManyValues
        } else if has(&["security_exception", "unauthorized", "forbidden", "authentication", "401", "403"]) {
            BackendErrorKind::Authentication
        } else if has(&["index_not_found", "no such index", "unknown field", "no mapping found", "unknown index"]) {
            BackendErrorKind::UnknownTarget
        } else if has(&["malformed", "unexpected response", "missing field"]) {
            BackendErrorKind::Malformed
        } else {
            BackendErrorKind::Unavailable
        };
        Self { kind, message }
    }

    pub fn user_message(&self) -> String {
        match self.kind {
            BackendErrorKind::FilterSyntax => format!(
                "The filter expression could not be parsed ({}). Check quoting, parentheses and field:value pairs.",
                self.message
            ),
            BackendErrorKind::UnknownTarget => format!(
                "The index or field does not exist ({}). Verify the field name or pass alternative field candidates.",
                self.message
            ),
            BackendErrorKind::Authentication => format!(
                "The search backend rejected the credentials ({}). Check the configured user and permissions.",
                self.message
            ),
            BackendErrorKind::TooManyValues => format!(
                "The field has too many distinct values to aggregate ({}). Narrow the filter or time range, or force the simple strategy.",
                self.message
            ),
            BackendErrorKind::Malformed => format!(
                "The search backend returned an unexpected response ({}).",
                self.message
            ),
            BackendErrorKind::Unavailable => format!("The search backend request failed ({}).", self.message),
        }
    }
}

/// What was being attempted when a backend call failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryContext {
    pub operation: String,
    pub field: Option<String>,
    pub range: String,
    pub strategy: Option<String>,
}

impl fmt::Display for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation={} range={}", self.operation, self.range)?;
        if let Some(field) = &self.field {
            write!(f, " field={field}")?;
        }
        if let Some(strategy) = &self.strategy {
            write!(f, " strategy={strategy}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid time range '{0}': expected <integer><unit> with unit one of m, h, d, w, M, y")]
    InvalidRangeFormat(String),
    #[error("{} [{context}]", .source.user_message())]
    Backend {
        #[source]
        source: BackendError,
        context: QueryContext,
    },
    #[error("analysis cancelled")]
    Cancelled,
    #[error("analysis deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AnalysisError {
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            AnalysisError::Backend { source, .. } => Some(source.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_backend_messages() {
        let cases = [
            ("parse_exception: Encountered \" <RPAREN> \")\"", BackendErrorKind::FilterSyntax),
            ("index_not_found_exception: no such index [logs-x]", BackendErrorKind::UnknownTarget),
            ("security_exception: unable to authenticate user", BackendErrorKind::Authentication),
            ("too_many_buckets_exception: Trying to create too many buckets", BackendErrorKind::TooManyValues),
            ("connection reset by peer", BackendErrorKind::Unavailable),
        ];
        for (msg, kind) in cases {
            assert_eq!(BackendError::classify(msg).kind, kind, "{msg}");
        }
    }

    #[test]
    fn user_messages_differ_per_kind() {
        let a = BackendError::new(BackendErrorKind::FilterSyntax, "x").user_message();
        let b = BackendError::new(BackendErrorKind::TooManyValues, "x").user_message();
        assert_ne!(a, b);
        assert!(b.contains("simple strategy"));
    }
}
