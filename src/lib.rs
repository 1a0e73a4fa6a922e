//! Unified Observability Query & Correlation Core.
//!
//! Queries and correlates metrics (Prometheus-compatible), logs
//! (LogsQL-compatible) and traces (Jaeger-compatible) across one or more
//! backend instances, and discovers likely root causes for a KPI
//! regression over a time range. HTTP handler glue, config-file loading
//! and ingest paths are deliberately out of scope; this crate is the core
//! that such a service would embed.

pub mod correlation;
pub mod error;
pub mod kpi;
pub mod labels;
pub mod model;
pub mod registry;
pub mod sources;
pub mod stats;
pub mod telemetry;
pub mod time_range;

pub use correlation::CorrelationEngine;
pub use error::{CoreError, CoreResult};
pub use model::{
    CauseCandidate, Correlation, CorrelationQuery, CorrelationResult, CorrelationStats,
    CorrelationSummary, Engine, EngineConfig, QueryExpression, ResultStatus, UnifiedResult,
};
pub use time_range::{Ring, RingBuilder, RingConfig, TimeRange};
