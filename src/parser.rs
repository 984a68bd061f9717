use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plaintext,
}

/// One ingested log line, flattened to dotted field paths.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub format: LogFormat,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, String>,
    pub source: Value,
}

impl LogRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

static RE_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(TRACE|DEBUG|INFO|NOTICE|WARN|WARNING|ERROR|ERR|CRITICAL|FATAL|PANIC)\b").unwrap()
});

static RE_ISO_ANY: Lazy<Regex> = Lazy::new(|| {
    // 2025-08-07T06:41:18Z, 2025-08-07 06:41:18.123+01:00, 2025-08-07T06:41:18-0800
    Regex::new(r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d{1,9})?(?:Z|[+-]\d{2}(?::?\d{2})?)?").unwrap()
});

static RE_TZ_COMPACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([+-])(\d{2})(\d{2})$").unwrap());

static RE_SYSLOG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\b").unwrap()
});

static RE_EPOCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{16}|\d{13}|\d{10})\b").unwrap());

pub fn parse_line(line: &str) -> LogRecord {
    parse_line_with_hints(line, &[])
}

/// Parse one line; `time_keys` are JSON field paths tried first for the timestamp.
pub fn parse_line_with_hints(line: &str, time_keys: &[&str]) -> LogRecord {
    match serde_json::from_str::<Value>(line) {
        Ok(v @ Value::Object(_)) => {
            let mut fields = BTreeMap::new();
            flatten_json("", &v, &mut fields);

            let hinted = time_keys
                .iter()
                .filter_map(|k| fields.get(*k))
                .find_map(|val| parse_ts_candidate(val));
            let timestamp = hinted.or_else(|| fields.values().find_map(|val| parse_ts_candidate(val)));

            LogRecord { format: LogFormat::Json, timestamp, fields, source: v }
        }
        _ => {
            let message = line.trim_end().to_string();
            let timestamp = detect_timestamp_in_text(&message);
            let mut fields = BTreeMap::new();
            if let Some(m) = RE_LEVEL.find(&message) {
                fields.insert("level".to_string(), normalize_level(m.as_str()).to_string());
            }
            let source = serde_json::json!({ "message": message, "level": fields.get("level") });
            fields.insert("message".to_string(), message);
            LogRecord { format: LogFormat::Plaintext, timestamp, fields, source }
        }
    }
}

fn normalize_level(token: &str) -> &'static str {
    match token {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" | "NOTICE" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "ERR" => "error",
        _ => "critical",
    }
}

fn flatten_json(prefix: &str, v: &Value, out: &mut BTreeMap<String, String>) {
    let key_for = |k: &str| if prefix.is_empty() { k.to_string() } else { format!("{prefix}.{k}") };
    match v {
        Value::Object(map) => {
            for (k, v) in map.iter() {
                flatten_json(&key_for(k), v, out);
            }
        }
        Value::Array(arr) => {
            for (idx, item) in arr.iter().enumerate() {
                flatten_json(&key_for(&idx.to_string()), item, out);
            }
        }
        Value::Null => {}
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
    }
}

pub fn parse_ts_candidate(s: &str) -> Option<DateTime<Utc>> {
    parse_ts_string(s).or_else(|| parse_epoch(s))
}

fn parse_ts_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let zoned = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"];
    for f in zoned {
        if let Ok(dt) = DateTime::parse_from_str(s, f) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    for f in naive {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}

fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: i64 = s.parse().ok()?;
    match s.len() {
        10 => DateTime::<Utc>::from_timestamp(n, 0),
        13 => DateTime::<Utc>::from_timestamp(n / 1_000, ((n % 1_000) * 1_000_000) as u32),
        16 => DateTime::<Utc>::from_timestamp(n / 1_000_000, ((n % 1_000_000) * 1_000) as u32),
        _ => None,
    }
}

pub fn detect_timestamp_in_text(s: &str) -> Option<DateTime<Utc>> {
    if let Some(m) = RE_ISO_ANY.find(s) {
        let found = m.as_str();
        // -0800 -> -08:00 so RFC3339 accepts it
        let normalized = RE_TZ_COMPACT.replace(found, "$1$2:$3");
        if let Some(dt) = parse_ts_string(&normalized).or_else(|| parse_ts_string(&normalized.replacen(' ', "T", 1))) {
            return Some(dt);
        }
    }
    if let Some(m) = RE_SYSLOG.find(s) {
        let candidate = format!("{} {}", Utc::now().year(), m.as_str());
        if let Ok(naive) = NaiveDateTime::parse_from_str(&candidate, "%Y %b %d %H:%M:%S") {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    RE_EPOCH.find(s).and_then(|m| parse_epoch(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_json_and_finds_timestamp() {
        let rec = parse_line(r#"{"@timestamp":"2024-01-01T00:00:00Z","log":{"level":"error"},"message":"boom"}"#);
        assert_eq!(rec.format, LogFormat::Json);
        assert_eq!(rec.get("log.level"), Some("error"));
        assert_eq!(rec.timestamp, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn plaintext_gets_message_and_level() {
        let rec = parse_line("2024-01-01 10:00:00 ERROR db connection refused");
        assert_eq!(rec.format, LogFormat::Plaintext);
        assert_eq!(rec.get("level"), Some("error"));
        assert_eq!(rec.get("message"), Some("2024-01-01 10:00:00 ERROR db connection refused"));
        assert_eq!(rec.timestamp, Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()));
    }

    #[test]
    fn compact_offsets_are_normalized() {
        let ts = detect_timestamp_in_text("at 2024-01-01T10:00:00-0200 started");
        assert_eq!(ts, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
    }
}
