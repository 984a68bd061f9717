//! Text rendering of bucket series and trend rows: bar charts, sparkline
//! glyphs and Markdown tables. Everything here is a pure function of its inputs.

use crate::trend::{Direction, TrendResult};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

const SPARK_BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// A count of matching records in one time interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub key: DateTime<Utc>,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlyphStyle {
    #[default]
    Text,
    Ascii,
}

impl std::str::FromStr for GlyphStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(GlyphStyle::Text),
            "ascii" => Ok(GlyphStyle::Ascii),
            other => Err(format!("unknown style '{other}' (expected text or ascii)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub target_width: usize,
    pub max_points: usize,
    pub style: GlyphStyle,
    pub max_rows: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { target_width: 40, max_points: 15, style: GlyphStyle::Text, max_rows: 20 }
    }
}

/// Every `ceil(n / max_points)`-th bucket, starting with the first.
pub fn downsample(buckets: &[Bucket], max_points: usize) -> Vec<&Bucket> {
    let max_points = max_points.max(1);
    let step = buckets.len().div_ceil(max_points).max(1);
    buckets.iter().step_by(step).collect()
}

pub fn scale_factor(max_count: u64, target_width: usize) -> u64 {
    max_count.div_ceil(target_width.max(1) as u64).max(1)
}

pub fn bar_length(count: u64, scale: u64) -> usize {
    count.div_ceil(scale.max(1)).max(1) as usize
}

pub fn render_time_series(buckets: &[Bucket], opts: &RenderOptions) -> String {
    if buckets.is_empty() {
        return "(no data)\n".to_string();
    }
    let shown = downsample(buckets, opts.max_points);
    let max_count = shown.iter().map(|b| b.count).max().unwrap_or(0);
    let scale = scale_factor(max_count, opts.target_width);
    let label_width = shown.iter().map(|b| b.label.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    if shown.len() < buckets.len() {
        out.push_str(&format!("(showing {} of {} buckets)\n", shown.len(), buckets.len()));
    }
    for b in shown {
        let bar = "█".repeat(bar_length(b.count, scale));
        out.push_str(&format!("{:<label_width$} │{} {}\n", b.label, bar, b.count));
    }
    if scale > 1 {
        out.push_str(&format!("(each █ ≈ {scale} events)\n"));
    }
    out
}

/// Arrow in text mode; a block ramp whose length grows with |change| in ascii mode.
pub fn trend_glyph(direction: Direction, percentage_change: f64, style: GlyphStyle) -> String {
    match style {
        GlyphStyle::Text => match direction {
            Direction::Increasing => "↑",
            Direction::Decreasing => "↓",
            Direction::Stable => "→",
        }
        .to_string(),
        GlyphStyle::Ascii => {
            let level = (percentage_change / 20.0).round().abs().min(10.0) as usize;
            if level == 0 || direction == Direction::Stable {
                return "─".to_string();
            }
            let ramp = (0..level).map(|i| SPARK_BLOCKS[(i * SPARK_BLOCKS.len() / 10).min(SPARK_BLOCKS.len() - 1)]);
            match direction {
                Direction::Decreasing => ramp.rev().collect(),
                _ => ramp.collect(),
            }
        }
    }
}

fn format_pct(p: f64) -> String {
    format!("{:+.1}%", p)
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub fn render_trend_table(trends: &[TrendResult], opts: &RenderOptions) -> String {
    if trends.is_empty() {
        return "No significant changes detected.\n".to_string();
    }
    let mut out = String::from("| Value | Before | After | Change | % Change | Trend |\n");
    out.push_str("|---|---:|---:|---:|---:|:---:|\n");
    for t in trends.iter().take(opts.max_rows.max(1)) {
        out.push_str(&format!(
            "| {} | {} | {} | {:+} | {} | {} |\n",
            escape_cell(&t.value),
            t.before_count,
            t.after_count,
            t.absolute_change,
            format_pct(t.percentage_change),
            trend_glyph(t.direction, t.percentage_change, opts.style),
        ));
    }
    if trends.len() > opts.max_rows.max(1) {
        out.push_str(&format!("\n_{} more rows omitted_\n", trends.len() - opts.max_rows.max(1)));
    }
    out
}

/// Markdown table of (label, count) rows with each row's share of `total`.
pub fn render_category_table(rows: &[(String, u64)], total: u64, opts: &RenderOptions) -> String {
    if rows.is_empty() {
        return "No matching records.\n".to_string();
    }
    let header = "| Category | Count | Share |\n|---|---:|---:|\n";
    let body = rows
        .iter()
        .take(opts.max_rows.max(1))
        .map(|(label, count)| {
            let share = if total == 0 { 0.0 } else { *count as f64 * 100.0 / total as f64 };
            format!("| {} | {} | {:.1}% |", escape_cell(label), count, share)
        })
        .join("\n");
    format!("{header}{body}\n")
}

/// Compact one-line sparkline for a whole series (used in per-value detail rows).
pub fn sparkline(buckets: &[Bucket], max_points: usize) -> String {
    let shown = downsample(buckets, max_points);
    let max = shown.iter().map(|b| b.count).max().unwrap_or(0);
    if max == 0 {
        return SPARK_BLOCKS[0].to_string().repeat(shown.len());
    }
    shown
        .iter()
        .map(|b| {
            let idx = (b.count * (SPARK_BLOCKS.len() as u64 - 1)).div_ceil(max) as usize;
            SPARK_BLOCKS[idx.min(SPARK_BLOCKS.len() - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_never_below_one() {
        assert_eq!(scale_factor(0, 40), 1);
        assert_eq!(scale_factor(39, 40), 1);
        assert_eq!(scale_factor(81, 40), 3);
    }

    #[test]
    fn nonzero_counts_are_always_visible() {
        assert_eq!(bar_length(1, 1000), 1);
        assert_eq!(bar_length(0, 3), 1);
        assert_eq!(bar_length(81, 3), 27);
    }

    #[test]
    fn ascii_glyph_length_tracks_magnitude() {
        assert_eq!(trend_glyph(Direction::Increasing, 80.0, GlyphStyle::Ascii).chars().count(), 4);
        assert_eq!(trend_glyph(Direction::Increasing, 800.0, GlyphStyle::Ascii).chars().count(), 10);
        assert_eq!(trend_glyph(Direction::Stable, 3.0, GlyphStyle::Ascii), "─");
        assert_eq!(trend_glyph(Direction::Decreasing, -50.0, GlyphStyle::Text), "↓");
    }

    #[test]
    fn style_parses_case_insensitively() {
        assert_eq!("ASCII".parse::<GlyphStyle>(), Ok(GlyphStyle::Ascii));
        assert!("bars".parse::<GlyphStyle>().is_err());
    }
}
