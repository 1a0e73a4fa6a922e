//! Jaeger-dialect traces Source (§6). Search times are wire-converted to
//! microseconds at the boundary; the rest of the engine reasons in UTC
//! `DateTime`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::transport::Transport;
use super::{CallContext, SourceConfig, TracesQuerier};

pub struct JaegerSource {
    transport: Transport,
}

impl JaegerSource {
    pub fn new(config: &SourceConfig) -> CoreResult<Self> {
        Ok(Self {
            transport: Transport::new(config)?,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)], ctx: &CallContext) -> CoreResult<Value> {
        let resp = self
            .transport
            .get_with_fallback(path, path, query, ctx)
            .await?;
        resp.json::<Value>()
            .await
            .map_err(|e| CoreError::upstream(path.to_string(), e.to_string(), None))
    }
}

#[async_trait]
impl TracesQuerier for JaegerSource {
    async fn services(&self, ctx: &CallContext) -> CoreResult<Value> {
        self.get("/select/jaeger/api/services", &[], ctx).await
    }

    async fn operations(&self, service: &str, ctx: &CallContext) -> CoreResult<Value> {
        let path = format!("/select/jaeger/api/services/{service}/operations");
        self.get(&path, &[], ctx).await
    }

    async fn search(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        ctx: &CallContext,
    ) -> CoreResult<Value> {
        self.get(
            "/select/jaeger/api/traces",
            &[
                ("service", service.to_string()),
                ("start", start.timestamp_micros().to_string()),
                ("end", end.timestamp_micros().to_string()),
            ],
            ctx,
        )
        .await
    }

    async fn get_trace(&self, trace_id: &str, ctx: &CallContext) -> CoreResult<Value> {
        let path = format!("/select/jaeger/api/traces/{trace_id}");
        self.get(&path, &[], ctx).await
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        match self.get("/health", &[], ctx).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_cancelled() => Err(e),
            Err(_) => Ok(false),
        }
    }
}

/// Resolves a trace's service label, falling back through
/// `processes.*.serviceName` then the first span's `operationName` when
/// top-level fields are absent (§4.5).
pub fn extract_trace_labels(trace: &Value) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(processes) = trace.get("processes").and_then(|p| p.as_object()) {
        if let Some((_, process)) = processes.iter().next() {
            if let Some(service) = process.get("serviceName") {
                map.insert("service".to_string(), service.clone());
            }
        }
    }
    if let Some(spans) = trace.get("spans").and_then(|s| s.as_array()) {
        if let Some(first) = spans.first() {
            if let Some(op) = first.get("operationName") {
                map.insert("operation".to_string(), op.clone());
            }
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_trace_labels_prefers_process_service_name() {
        let trace = json!({
            "processes": {"p1": {"serviceName": "checkout"}},
            "spans": [{"operationName": "GET /cart"}]
        });
        let labels = extract_trace_labels(&trace);
        assert_eq!(labels.get("service").unwrap(), "checkout");
    }

    #[test]
    fn extract_trace_labels_falls_back_to_first_span_operation() {
        let trace = json!({"spans": [{"operationName": "GET /cart"}]});
        let labels = extract_trace_labels(&trace);
        assert_eq!(labels.get("operation").unwrap(), "GET /cart");
    }
}
