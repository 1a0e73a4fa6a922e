//! Federation: composes N same-capability children into one Source that
//! fans a call out to every child concurrently and aggregates per the rules
//! in §4.3.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::{CallContext, LogSink, LogsQuerier, MetricsQuerier, SourceConfig, TracesQuerier};

/// Runs `op` against every child concurrently, returning `Ok` results in
/// child order alongside the count of failures. Per §4.3/§5, a failing
/// child cannot corrupt a successful one; only when every child fails does
/// the aggregator surface an error.
async fn fan_out<'a, T, F, Fut>(children: &'a [Arc<T>], op: F) -> Result<Vec<Value>, CoreError>
where
    T: ?Sized,
    F: Fn(&'a T) -> Fut,
    Fut: std::future::Future<Output = CoreResult<Value>>,
{
    let futures = children.iter().map(|child| op(child.as_ref()));
    let results = join_all(futures).await;

    let mut ok = Vec::with_capacity(results.len());
    let mut failures = 0;
    for result in results {
        match result {
            Ok(v) => ok.push(v),
            Err(_) => failures += 1,
        }
    }
    if ok.is_empty() && failures > 0 {
        return Err(CoreError::Upstream {
            url: "federated".into(),
            detail: "all sources failed".into(),
            body_snippet: None,
        });
    }
    Ok(ok)
}

/// Concatenates each response's `data.result` array, keeps the first
/// non-empty `resultType`, and sums the element counts.
fn aggregate_query_responses(responses: Vec<Value>) -> Value {
    let mut result_type: Option<Value> = None;
    let mut merged_result = Vec::new();
    for resp in &responses {
        if let Some(rt) = resp.get("data").and_then(|d| d.get("resultType")) {
            if result_type.is_none() && !rt.is_null() {
                result_type = Some(rt.clone());
            }
        }
        if let Some(arr) = resp
            .get("data")
            .and_then(|d| d.get("result"))
            .and_then(|r| r.as_array())
        {
            merged_result.extend(arr.iter().cloned());
        }
    }
    serde_json::json!({
        "status": "success",
        "data": {
            "resultType": result_type.unwrap_or(Value::String("vector".into())),
            "result": merged_result,
        }
    })
}

/// Set-union of string arrays nested under `data`.
fn aggregate_set_union(responses: Vec<Value>) -> Value {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for resp in &responses {
        if let Some(arr) = resp.get("data").and_then(|d| d.as_array()) {
            for item in arr {
                if let Some(s) = item.as_str() {
                    set.insert(s.to_string());
                }
            }
        }
    }
    serde_json::json!({"status": "success", "data": set.into_iter().collect::<Vec<_>>()})
}

/// Concatenation of arrays nested under `data` (used for `series`, where
/// duplicate series across replicas are expected and harmless).
fn aggregate_concat(responses: Vec<Value>) -> Value {
    let mut merged = Vec::new();
    for resp in &responses {
        if let Some(arr) = resp.get("data").and_then(|d| d.as_array()) {
            merged.extend(arr.iter().cloned());
        }
    }
    serde_json::json!({"status": "success", "data": merged})
}

pub struct FederatedMetricsSource {
    children: Vec<Arc<dyn MetricsQuerier>>,
}

impl FederatedMetricsSource {
    pub fn new(children: Vec<Arc<dyn MetricsQuerier>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl MetricsQuerier for FederatedMetricsSource {
    async fn instant_query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value> {
        let responses =
            fan_out(&self.children, |c| c.instant_query(query, ctx)).await?;
        Ok(aggregate_query_responses(responses))
    }

    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: chrono::Duration,
        ctx: &CallContext,
    ) -> CoreResult<Value> {
        let responses =
            fan_out(&self.children, |c| c.range_query(query, start, end, step, ctx)).await?;
        Ok(aggregate_query_responses(responses))
    }

    async fn series(&self, matchers: &[String], ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.series(matchers, ctx)).await?;
        Ok(aggregate_concat(responses))
    }

    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.labels(ctx)).await?;
        Ok(aggregate_set_union(responses))
    }

    async fn label_values(&self, label: &str, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.label_values(label, ctx)).await?;
        Ok(aggregate_set_union(responses))
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        let futures = self.children.iter().map(|c| c.health(ctx));
        let results = join_all(futures).await;
        Ok(results.into_iter().any(|r| matches!(r, Ok(true))))
    }
}

pub struct FederatedLogsSource {
    children: Vec<Arc<dyn LogsQuerier>>,
}

impl FederatedLogsSource {
    pub fn new(children: Vec<Arc<dyn LogsQuerier>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl LogsQuerier for FederatedLogsSource {
    async fn query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.query(query, ctx)).await?;
        Ok(aggregate_concat(responses))
    }

    /// Export fans out sequentially rather than concurrently: a single
    /// caller-supplied sink cannot be safely shared across concurrent
    /// writers, and log export is driven by one backward-pressured stream
    /// at a time regardless of how many replicas hold the data.
    async fn export(
        &self,
        query: &str,
        sink: &mut dyn LogSink,
        ctx: &CallContext,
    ) -> CoreResult<Vec<String>> {
        let mut fields = BTreeSet::new();
        let mut last_err = None;
        let mut any_ok = false;
        for child in &self.children {
            match child.export(query, sink, ctx).await {
                Ok(child_fields) => {
                    fields.extend(child_fields);
                    any_ok = true;
                }
                Err(e) => last_err = Some(e),
            }
        }
        if !any_ok {
            return Err(last_err.unwrap_or(CoreError::Upstream {
                url: "federated".into(),
                detail: "all sources failed".into(),
                body_snippet: None,
            }));
        }
        Ok(fields.into_iter().collect())
    }

    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.labels(ctx)).await?;
        Ok(aggregate_set_union(responses))
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        let futures = self.children.iter().map(|c| c.health(ctx));
        let results = join_all(futures).await;
        Ok(results.into_iter().any(|r| matches!(r, Ok(true))))
    }
}

pub struct FederatedTracesSource {
    children: Vec<Arc<dyn TracesQuerier>>,
}

impl FederatedTracesSource {
    pub fn new(children: Vec<Arc<dyn TracesQuerier>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl TracesQuerier for FederatedTracesSource {
    async fn services(&self, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.services(ctx)).await?;
        Ok(aggregate_set_union(responses))
    }

    async fn operations(&self, service: &str, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.operations(service, ctx)).await?;
        Ok(aggregate_set_union(responses))
    }

    async fn search(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        ctx: &CallContext,
    ) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.search(service, start, end, ctx)).await?;
        Ok(dedupe_traces_by_id(responses))
    }

    /// First success wins; remaining children are still awaited (via
    /// `join_all` inside `fan_out`) so a slow winner doesn't leave other
    /// requests dangling past this call's lifetime.
    async fn get_trace(&self, trace_id: &str, ctx: &CallContext) -> CoreResult<Value> {
        let responses = fan_out(&self.children, |c| c.get_trace(trace_id, ctx)).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("trace {trace_id} not found")))
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        let futures = self.children.iter().map(|c| c.health(ctx));
        let results = join_all(futures).await;
        Ok(results.into_iter().any(|r| matches!(r, Ok(true))))
    }
}

fn dedupe_traces_by_id(responses: Vec<Value>) -> Value {
    let mut seen = BTreeSet::new();
    let mut merged = Vec::new();
    for resp in &responses {
        if let Some(arr) = resp.get("data").and_then(|d| d.as_array()) {
            for trace in arr {
                if let Some(id) = trace.get("traceID").and_then(|v| v.as_str()) {
                    if seen.insert(id.to_string()) {
                        merged.push(trace.clone());
                    }
                }
            }
        }
    }
    serde_json::json!({"data": merged})
}

/// Builds a `SourceConfig` shared by every backend dialect, useful for
/// tests and single-endpoint deployments that don't need federation.
pub fn single_endpoint_config(name: &str, endpoint: &str) -> SourceConfig {
    SourceConfig::new(name, vec![endpoint.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_query_responses_concatenates_results() {
        let a = serde_json::json!({"data": {"resultType": "vector", "result": [1]}});
        let b = serde_json::json!({"data": {"resultType": "vector", "result": [2, 3]}});
        let merged = aggregate_query_responses(vec![a, b]);
        assert_eq!(
            merged["data"]["result"].as_array().unwrap().len(),
            3
        );
    }

    #[test]
    fn aggregate_set_union_dedupes() {
        let a = serde_json::json!({"data": ["x", "y"]});
        let b = serde_json::json!({"data": ["y", "z"]});
        let merged = aggregate_set_union(vec![a, b]);
        assert_eq!(merged["data"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn dedupe_traces_drops_repeats_across_replicas() {
        let a = serde_json::json!({"data": [{"traceID": "t1"}]});
        let b = serde_json::json!({"data": [{"traceID": "t1"}, {"traceID": "t2"}]});
        let merged = dedupe_traces_by_id(vec![a, b]);
        assert_eq!(merged["data"].as_array().unwrap().len(), 2);
    }
}
