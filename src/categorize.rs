//! Error-pattern categories and the matcher that assigns log messages to them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub id: String,
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl CategoryDefinition {
    pub fn new(id: &str, name: &str, patterns: &[&str], description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            description: description.to_string(),
        }
    }
}

static BUILTIN_CATEGORIES: Lazy<Vec<CategoryDefinition>> = Lazy::new(|| {
    vec![
        CategoryDefinition::new(
            "exception",
            "Exceptions & Errors",
            &["exception", "error", "traceback", "stack trace", "panic", "fatal", "unhandled", "failed"],
            "Raised exceptions, panics and generic failures",
        ),
        CategoryDefinition::new(
            "timeout",
            "Timeouts",
            &["timeout", "timed out", "deadline exceeded", "took too long", "no response within"],
            "Operations that did not complete in time",
        ),
        CategoryDefinition::new(
            "connection",
            "Connection Problems",
            &["connection refused", "connection reset", "connection closed", "unreachable", "broken pipe", "econnrefused", "no route to host", "dns", "socket"],
            "Network and connectivity failures",
        ),
        CategoryDefinition::new(
            "authentication",
            "Authentication & Authorization",
            &["unauthorized", "forbidden", "authentication failed", "invalid token", "access denied", "permission denied", "login failed", r"\b401\b", r"\b403\b"],
            "Credential, token and permission failures",
        ),
        CategoryDefinition::new(
            "database",
            "Database",
            &["database", "sql", "deadlock", "constraint", "duplicate key", "query failed", "postgres", "mysql", "sqlite", "mongo"],
            "Database errors and contention",
        ),
        CategoryDefinition::new(
            "resource",
            "Resource Exhaustion",
            &["out of memory", "oom", "memory limit", "disk full", "no space left", "too many open files", "resource exhausted", "quota exceeded", "rate limit"],
            "Memory, disk, handle and quota exhaustion",
        ),
    ]
});

pub fn builtin_categories() -> &'static [CategoryDefinition] {
    &BUILTIN_CATEGORIES
}

/// A message with its time, as fed to [`PatternCategorizer::count_by_bucket`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextRecord {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone)]
struct CompiledCategory {
    definition: CategoryDefinition,
    matcher: Regex,
}

/// Per-category counts: overall and per time bucket (bucket start -> count).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryCounts {
    pub totals: BTreeMap<String, u64>,
    pub buckets: BTreeMap<String, BTreeMap<DateTime<Utc>, u64>>,
    pub uncategorized: u64,
}

#[derive(Debug, Clone)]
pub struct PatternCategorizer {
    categories: Vec<CompiledCategory>,
}

impl Default for PatternCategorizer {
    fn default() -> Self {
        Self::new(builtin_categories(), &[])
    }
}

impl PatternCategorizer {
    /// Built-ins first, then `custom`. A custom definition with a built-in's id
    /// replaces it in place; built-ins are never dropped otherwise.
    pub fn new(builtins: &[CategoryDefinition], custom: &[CategoryDefinition]) -> Self {
        let mut defs: Vec<CategoryDefinition> = builtins.to_vec();
        for c in custom {
            match defs.iter_mut().find(|d| d.id == c.id) {
                Some(existing) => {
                    debug!(category = %c.id, "custom category overrides existing definition");
                    *existing = c.clone();
                }
                None => defs.push(c.clone()),
            }
        }
        let categories = defs
            .into_iter()
            .filter_map(|definition| {
                compile_patterns(&definition.patterns).map(|matcher| CompiledCategory { definition, matcher })
            })
            .collect();
        Self { categories }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CategoryDefinition> {
        self.categories.iter().map(|c| &c.definition)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.definitions().find(|d| d.id == id).map(|d| d.name.as_str())
    }

    /// Ids of every category with at least one matching pattern.
    pub fn categorize(&self, text: &str) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| c.matcher.is_match(text))
            .map(|c| c.definition.id.as_str())
            .collect()
    }

    pub fn count_by_bucket(&self, records: &[TextRecord], interval: Duration) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for rec in records {
            let ids = self.categorize(&rec.text);
            if ids.is_empty() {
                counts.uncategorized += 1;
                continue;
            }
            let bucket = floor_time(rec.timestamp, interval);
            for id in ids {
                *counts.totals.entry(id.to_string()).or_insert(0) += 1;
                *counts.buckets.entry(id.to_string()).or_default().entry(bucket).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// One case-insensitive alternation per category. Patterns that are not valid
/// regexes are matched literally.
fn compile_patterns(patterns: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| match Regex::new(p) {
            Ok(_) => format!("(?:{p})"),
            Err(_) => regex::escape(p),
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    RegexBuilder::new(&alternatives.join("|")).case_insensitive(true).build().ok()
}

pub fn floor_time(t: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let secs = bucket.num_seconds();
    if secs <= 0 {
        return t;
    }
    let ts = t.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(secs), 0).single().unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_regex_is_matched_literally() {
        let custom = [CategoryDefinition::new("brackets", "Brackets", &["[unclosed"], "")];
        let c = PatternCategorizer::new(&[], &custom);
        assert_eq!(c.categorize("saw [unclosed bracket"), vec!["brackets"]);
        assert!(c.categorize("nothing here").is_empty());
    }

    #[test]
    fn empty_pattern_lists_are_skipped() {
        let custom = [CategoryDefinition::new("empty", "Empty", &[], "")];
        let c = PatternCategorizer::new(&[], &custom);
        assert_eq!(c.definitions().count(), 0);
    }
}
