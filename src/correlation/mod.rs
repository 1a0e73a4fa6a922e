//! Correlation Engine facade (§4.4, §4.7).

pub mod discovery;
pub mod expression;
pub mod merger;

use std::sync::Arc;

use crate::model::EngineConfig;
use crate::registry::KpiRegistry;
use crate::sources::{CallContext, LogsQuerier, MetricsQuerier, TracesQuerier};

/// Owns one backend client per engine plus the KPI registry and tuning
/// config; both the expression-form and discovery-form pipelines are
/// methods driven off this handle.
pub struct CorrelationEngine {
    pub metrics: Arc<dyn MetricsQuerier>,
    pub logs: Arc<dyn LogsQuerier>,
    pub traces: Arc<dyn TracesQuerier>,
    pub registry: Arc<dyn KpiRegistry>,
    pub config: EngineConfig,
}

impl CorrelationEngine {
    pub fn new(
        metrics: Arc<dyn MetricsQuerier>,
        logs: Arc<dyn LogsQuerier>,
        traces: Arc<dyn TracesQuerier>,
        registry: Arc<dyn KpiRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            metrics,
            logs,
            traces,
            registry,
            config,
        }
    }

    pub fn call_context(&self) -> CallContext {
        CallContext {
            limit: Some(self.config.default_query_limit),
            ..CallContext::default()
        }
    }
}
