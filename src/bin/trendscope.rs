use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Once;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use trendscope::backend::Deadline;
use trendscope::config::EngineConfig;
use trendscope::engine::{AnalysisOutput, CommonParams, ErrorParams, PatternParams, TrendEngine, TrendParams};
use trendscope::render::GlyphStyle;
use trendscope::MemoryBackend;

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

#[derive(Parser, Debug)]
#[command(name = "trendscope", version, about = "Time-windowed trend analysis over structured logs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Shared {
    /// Input files (`-` for stdin). May be repeated.
    input: Vec<String>,

    /// Timestamp field hints for JSON logs (e.g., time, ts, timestamp)
    #[arg(long = "time-key")]
    time_key: Vec<String>,

    /// Analysis window, e.g. 1h, 24h, 7d, 1M
    #[arg(long, default_value = "24h")]
    range: String,
    /// Window end as RFC 3339; defaults to now
    #[arg(long)]
    end: Option<DateTime<Utc>>,
    /// Filter expression, e.g. `service:api AND NOT level:debug`
    #[arg(long)]
    filter: Option<String>,
    /// Minimum absolute percentage change reported as a trend
    #[arg(long = "min-significance")]
    min_significance: Option<f64>,
    /// Keep stable rows at or above this count
    #[arg(long = "min-count")]
    min_count: Option<u64>,
    /// Trend glyphs: text | ascii
    #[arg(long)]
    style: Option<GlyphStyle>,
    #[arg(long)]
    top: Option<usize>,

    /// JSON config file
    #[arg(long)]
    config: Option<String>,
    /// Abort the analysis after this many seconds
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,
    /// Emit raw, summary and report as JSON (default when stdout is not a terminal)
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Shared {
    fn common(&self) -> CommonParams {
        CommonParams {
            range: self.range.clone(),
            end: self.end,
            filter: self.filter.clone(),
            min_significance: self.min_significance,
            min_count: self.min_count,
            style: self.style,
            top: self.top,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// How the distribution of a field's values changed between the two halves of the window
    Trends {
        /// Field to analyze; repeat to give fallbacks in order
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        #[arg(long = "sub-field")]
        sub_field: Option<String>,
        /// Always use flat per-period counts
        #[arg(long, default_value_t = false)]
        simple: bool,
        #[command(flatten)]
        shared: Shared,
    },
    /// Categorize error messages and compare category shares
    Errors {
        /// Severity field candidates
        #[arg(long = "level-field")]
        level_fields: Vec<String>,
        #[command(flatten)]
        shared: Shared,
    },
    /// Group messages into masked templates and compare template shares
    Patterns {
        #[arg(long = "message-field")]
        message_field: Option<String>,
        #[command(flatten)]
        shared: Shared,
    },
}

impl Command {
    fn shared(&self) -> &Shared {
        match self {
            Command::Trends { shared, .. } | Command::Errors { shared, .. } | Command::Patterns { shared, .. } => shared,
        }
    }
}

fn read_all_lines(paths: &[String]) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    for p in paths {
        if p == "-" {
            for line in io::stdin().lock().lines() {
                out.push(line?);
            }
        } else {
            for line in BufReader::new(File::open(p)?).lines() {
                out.push(line?);
            }
        }
    }
    Ok(out)
}

fn emit<S: Serialize>(output: &AnalysisOutput<S>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
    } else {
        print!("{}", output.report);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    init_parallelism();
    let cli = Cli::parse();
    let shared = cli.command.shared().clone();

    let config = match &shared.config {
        Some(path) => EngineConfig::from_path(path).with_context(|| format!("loading config {path}"))?,
        None => EngineConfig::default(),
    };

    let input_files = if shared.input.is_empty() { vec!["-".to_string()] } else { shared.input.clone() };
    let lines = read_all_lines(&input_files)?;
    let mut backend = MemoryBackend::new().with_time_keys(shared.time_key.clone());
    for line in &lines {
        backend.push_line(line);
    }
    if backend.untimed() > 0 {
        warn!(untimed = backend.untimed(), total = backend.len(), "lines without a timestamp are ignored");
    }
    debug!(records = backend.len(), "input loaded");

    let deadline = match shared.timeout_secs {
        Some(secs) => Deadline::after(std::time::Duration::from_secs(secs)),
        None => Deadline::none(),
    };
    let cancel = deadline.cancel_handle();
    let _ = ctrlc::set_handler(move || cancel.cancel());

    let engine = TrendEngine::new(backend, config);
    let json = shared.json || !atty::is(atty::Stream::Stdout);
    let common = shared.common();

    match cli.command {
        Command::Trends { fields, sub_field, simple, .. } => {
            let params = TrendParams { common, fields, sub_field, force_simple: simple };
            emit(&engine.detect_trends(&params, &deadline)?, json)
        }
        Command::Errors { level_fields, .. } => {
            let params = ErrorParams { common, level_fields, categories: Vec::new() };
            emit(&engine.analyze_errors(&params, &deadline)?, json)
        }
        Command::Patterns { message_field, .. } => {
            let params = PatternParams { common, message_field };
            emit(&engine.analyze_patterns(&params, &deadline)?, json)
        }
    }
}
