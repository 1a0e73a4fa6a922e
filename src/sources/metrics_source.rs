//! Prometheus-dialect metrics Source (§6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::transport::Transport;
use super::{CallContext, MetricsQuerier, SourceConfig};

pub struct PrometheusSource {
    transport: Transport,
}

impl PrometheusSource {
    pub fn new(config: &SourceConfig) -> CoreResult<Self> {
        Ok(Self {
            transport: Transport::new(config)?,
        })
    }

    async fn get(
        &self,
        cluster_path: &str,
        single_node_path: &str,
        query: &[(&str, String)],
        ctx: &CallContext,
    ) -> CoreResult<Value> {
        let resp = self
            .transport
            .get_with_fallback(cluster_path, single_node_path, query, ctx)
            .await?;
        resp.json::<Value>()
            .await
            .map_err(|e| CoreError::upstream(cluster_path.to_string(), e.to_string(), None))
    }
}

#[async_trait]
impl MetricsQuerier for PrometheusSource {
    async fn instant_query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value> {
        self.get(
            "/select/0/prometheus/api/v1/query",
            "/api/v1/query",
            &[("query", query.to_string())],
            ctx,
        )
        .await
    }

    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: chrono::Duration,
        ctx: &CallContext,
    ) -> CoreResult<Value> {
        let step_secs = step.num_seconds().max(1).to_string();
        self.get(
            "/select/0/prometheus/api/v1/query_range",
            "/api/v1/query_range",
            &[
                ("query", query.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", step_secs),
            ],
            ctx,
        )
        .await
    }

    async fn series(&self, matchers: &[String], ctx: &CallContext) -> CoreResult<Value> {
        let query: Vec<(&str, String)> =
            matchers.iter().map(|m| ("match[]", m.clone())).collect();
        self.get(
            "/select/0/prometheus/api/v1/series",
            "/api/v1/series",
            &query,
            ctx,
        )
        .await
    }

    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value> {
        self.get(
            "/select/0/prometheus/api/v1/labels",
            "/api/v1/labels",
            &[],
            ctx,
        )
        .await
    }

    async fn label_values(&self, label: &str, ctx: &CallContext) -> CoreResult<Value> {
        let cluster = format!("/select/0/prometheus/api/v1/label/{label}/values");
        let single = format!("/api/v1/label/{label}/values");
        self.get(&cluster, &single, &[], ctx).await
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        match self.get("/health", "/health", &[], ctx).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_cancelled() => Err(e),
            Err(_) => Ok(false),
        }
    }
}

/// Pulls `(timestamp_ms, value)` pairs out of an instant- or range-query
/// response, per the wire shapes in §6: `value:[ts,"v"]` for instant
/// queries, `values:[[ts,"v"], …]` for range queries.
pub fn extract_points(response: &Value) -> Vec<(i64, f64)> {
    let mut points = Vec::new();
    let Some(result) = response
        .get("data")
        .and_then(|d| d.get("result"))
        .and_then(|r| r.as_array())
    else {
        return points;
    };
    for series in result {
        if let Some(pair) = series.get("value").and_then(|v| v.as_array()) {
            if let Some((ts, val)) = parse_sample(pair) {
                points.push((ts, val));
            }
        }
        if let Some(values) = series.get("values").and_then(|v| v.as_array()) {
            for pair in values {
                if let Some(pair) = pair.as_array() {
                    if let Some((ts, val)) = parse_sample(pair) {
                        points.push((ts, val));
                    }
                }
            }
        }
    }
    points
}

fn parse_sample(pair: &[Value]) -> Option<(i64, f64)> {
    let ts = pair.first()?.as_f64()? as i64 * 1_000;
    let val: f64 = pair.get(1)?.as_str()?.parse().ok()?;
    Some((ts, val))
}

/// Extracts the label map (`metric` submap) per series, exposing
/// `__name__` additionally as `metric_name` per §4.5.
pub fn extract_labels(series: &Value) -> Value {
    let mut metric = series.get("metric").cloned().unwrap_or(Value::Null);
    if let Some(name) = metric.get("__name__").cloned() {
        if let Some(obj) = metric.as_object_mut() {
            obj.insert("metric_name".to_string(), name);
        }
    }
    metric
}
