//! Core query/result data model (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::time_range::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Metrics,
    Logs,
    Traces,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Metrics => "metrics",
            Engine::Logs => "logs",
            Engine::Traces => "traces",
        }
    }
}

/// A single backend sub-query. `query_text` is opaque to the engine and
/// passed through verbatim to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExpression {
    pub engine: Engine,
    pub query_text: String,
}

/// A correlation request spanning one or more engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationQuery {
    pub id: String,
    pub raw_query: String,
    pub expressions: Vec<QueryExpression>,
    pub time_window: Option<chrono::Duration>,
}

impl CorrelationQuery {
    /// Validates the invariants from spec.md §3 / §4.4 step 1:
    /// referenced engines must be a subset of `supported_engines`, and a
    /// `time_window` requires exactly two expressions.
    pub fn validate(&self, supported_engines: &[Engine]) -> Result<(), CoreError> {
        if self.expressions.is_empty() {
            return Err(CoreError::Validation(
                "correlation query has no expressions".into(),
            ));
        }
        for expr in &self.expressions {
            if !supported_engines.contains(&expr.engine) {
                return Err(CoreError::Validation(format!(
                    "engine {:?} is not among the configured sources",
                    expr.engine
                )));
            }
        }
        if self.time_window.is_some() && self.expressions.len() != 2 {
            return Err(CoreError::Validation(
                "time-window correlation requires exactly two expressions".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub engine_results: HashMap<String, serde_json::Value>,
    pub total_records: usize,
    pub data_sources: Vec<String>,
}

/// The response from executing one `QueryExpression` against its backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub query_id: String,
    pub engine: Engine,
    pub status: ResultStatus,
    pub payload: serde_json::Value,
    pub metadata: ResultMetadata,
}

/// A discovered association between two or more engines' results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub engines: HashMap<Engine, serde_json::Value>,
    pub confidence: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Correlation {
    pub fn new(timestamp: DateTime<Utc>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            engines: HashMap::new(),
            confidence: confidence.clamp(0.0, 0.95),
            metadata: HashMap::new(),
        }
    }

    pub fn with_engine(mut self, engine: Engine, payload: serde_json::Value) -> Self {
        self.engines.insert(engine, payload);
        self
    }
}

/// Summary statistics attached to a `CorrelationQuery` execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub count: usize,
    pub average_confidence: f64,
    pub engines_involved: Vec<Engine>,
}

/// Per-pair statistics produced by the Statistical Kernel (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub pearson: f64,
    pub spearman: f64,
    pub cross_corr_max: f64,
    pub cross_corr_lag: i64,
    pub partial: Option<f64>,
    pub sample_size: usize,
    pub p_value: f64,
    pub confidence: f64,
}

impl CorrelationStats {
    /// `sample_size >= 2` is required for a stat entry to carry any
    /// non-trivial signal (§3).
    pub fn is_significant(&self) -> bool {
        self.sample_size >= 2
    }
}

/// A ranked candidate root cause produced by the discovery-form pipeline
/// (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CauseCandidate {
    pub kpi_name: String,
    pub kpi_id: Uuid,
    pub kpi_formula: String,
    pub service: String,
    pub suspicion_score: f64,
    pub reasons: Vec<String>,
    pub stats: Option<CorrelationStats>,
}

/// Final result of the discovery-form pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub time_range: TimeRange,
    pub affected_services: Vec<String>,
    pub causes: Vec<CauseCandidate>,
}

/// Top-level configuration consumed by the `CorrelationEngine`. Loading
/// this from files/env is explicitly out of scope (spec.md §1); callers
/// construct it directly or deserialize it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub buckets: crate::time_range::RingConfig,
    pub default_query_limit: usize,
    pub min_correlation: f64,
    pub min_anomaly_score: f64,
    pub probes: Vec<QueryExpression>,
    pub service_candidates: Vec<String>,
    pub labels: crate::labels::LabelSchema,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buckets: crate::time_range::RingConfig::default(),
            default_query_limit: 1000,
            min_correlation: 0.3,
            min_anomaly_score: 0.2,
            probes: Vec::new(),
            service_candidates: Vec::new(),
            labels: crate::labels::LabelSchema::default(),
        }
    }
}
