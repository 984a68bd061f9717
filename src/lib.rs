pub mod error;
pub mod parser;
pub mod masking;
pub mod filter;
pub mod timerange;
pub mod backend;
pub mod memory;
pub mod planner;
pub mod categorize;
pub mod trend;
pub mod render;
pub mod config;
pub mod engine;

pub use backend::{AggregationResponse, CancelHandle, Deadline, QuerySpec, SearchBackend};
pub use config::EngineConfig;
pub use engine::{AnalysisOutput, CommonParams, ErrorParams, PatternParams, TrendEngine, TrendParams};
pub use error::{AnalysisError, BackendError, BackendErrorKind};
pub use memory::MemoryBackend;
