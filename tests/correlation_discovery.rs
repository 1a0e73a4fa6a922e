//! End-to-end coverage for the discovery-form pipeline
//! (`obscore::correlation::discovery::discover`): a KPI registry seeded with
//! an impact metric and two candidate causes, probed across a ring series
//! provided entirely by an in-process mock metrics backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obscore::correlation::discovery;
use obscore::kpi::{KpiDefinition, KpiDefinitionFields, KpiIdentitySeed, KpiLayer, Sentiment};
use obscore::registry::InMemoryKpiRegistry;
use obscore::sources::{CallContext, LogSink, LogsQuerier, MetricsQuerier, TracesQuerier};
use obscore::{CorrelationEngine, EngineConfig, TimeRange};
use serde_json::{json, Value};

/// Each formula is backed by a fixed series; a per-formula call counter
/// walks it one element per call so the probe call and every ring call draw
/// consecutive (cyclic) samples, rather than all collapsing to one value.
#[derive(Default)]
struct ScriptedMetrics {
    calls: Mutex<HashMap<String, usize>>,
}

fn series_for(query: &str) -> Vec<f64> {
    match query {
        "impact_latency" => vec![1.0, 1.0, 1.0, 5.0, 9.0],
        "cause_cpu" => vec![1.0, 1.0, 2.0, 6.0, 10.0],
        "unrelated_disk" => vec![5.0, 4.0, 5.0, 4.0, 5.0],
        _ => vec![1.0],
    }
}

impl ScriptedMetrics {
    fn next_value(&self, query: &str) -> f64 {
        let values = series_for(query);
        let mut calls = self.calls.lock().unwrap();
        let idx = calls.entry(query.to_string()).or_insert(0);
        let value = values[*idx % values.len()];
        *idx += 1;
        value
    }
}

#[async_trait]
impl MetricsQuerier for ScriptedMetrics {
    async fn instant_query(&self, query: &str, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        self.range_query(query, Utc::now(), Utc::now(), chrono::Duration::seconds(15), _ctx)
            .await
    }
    async fn range_query(
        &self,
        query: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: chrono::Duration,
        _ctx: &CallContext,
    ) -> obscore::CoreResult<Value> {
        let value = self.next_value(query);
        Ok(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [{"metric": {}, "value": [0, value.to_string()]}]}
        }))
    }
    async fn series(&self, _matchers: &[String], _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn labels(&self, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn label_values(&self, _label: &str, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn health(&self, _ctx: &CallContext) -> obscore::CoreResult<bool> {
        Ok(true)
    }
}

struct EmptyLogs;

#[async_trait]
impl LogsQuerier for EmptyLogs {
    async fn query(&self, _query: &str, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn export(
        &self,
        _query: &str,
        _sink: &mut dyn LogSink,
        _ctx: &CallContext,
    ) -> obscore::CoreResult<Vec<String>> {
        Ok(Vec::new())
    }
    async fn labels(&self, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn health(&self, _ctx: &CallContext) -> obscore::CoreResult<bool> {
        Ok(true)
    }
}

struct EmptyTraces;

#[async_trait]
impl TracesQuerier for EmptyTraces {
    async fn services(&self, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn operations(&self, _service: &str, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn search(
        &self,
        _service: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _ctx: &CallContext,
    ) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn get_trace(&self, _trace_id: &str, _ctx: &CallContext) -> obscore::CoreResult<Value> {
        Ok(json!({"data": []}))
    }
    async fn health(&self, _ctx: &CallContext) -> obscore::CoreResult<bool> {
        Ok(true)
    }
}

fn kpi(name: &str, formula: &str, layer: KpiLayer) -> KpiDefinition {
    KpiDefinition::new(
        KpiIdentitySeed {
            name: name.into(),
            ..Default::default()
        },
        KpiDefinitionFields {
            signal_type: "gauge".into(),
            datastore: "metrics".into(),
            formula: formula.into(),
            layer,
            sentiment: Sentiment::Negative,
            service_family: "checkout".into(),
            kind: "application".into(),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn discovery_ranks_correlated_cause_above_unrelated_candidate() {
    let registry = InMemoryKpiRegistry::new(vec![
        kpi("checkout_latency", "impact_latency", KpiLayer::Impact),
        kpi("cpu_saturation", "cause_cpu", KpiLayer::Cause),
        kpi("disk_iops", "unrelated_disk", KpiLayer::Cause),
    ]);

    let engine = CorrelationEngine::new(
        Arc::new(ScriptedMetrics::default()),
        Arc::new(EmptyLogs),
        Arc::new(EmptyTraces),
        Arc::new(registry),
        EngineConfig::default(),
    );

    let end = Utc::now();
    let start = end - chrono::Duration::minutes(30);
    let range = TimeRange::new(start, end).unwrap();

    let result = discovery::discover(&engine, &range).await.unwrap();
    assert_eq!(result.affected_services, vec!["checkout_latency".to_string()]);
    assert_eq!(result.causes.len(), 2);
    let top = &result.causes[0];
    assert_eq!(top.kpi_name, "cpu_saturation");
    assert!(top.suspicion_score >= result.causes[1].suspicion_score);
    assert!(top.reasons.iter().any(|r| r == "strong_pearson" || r == "strong_spearman"));
}

#[tokio::test]
async fn discovery_with_no_impact_kpi_returns_synthetic_no_impact_cause() {
    let registry = InMemoryKpiRegistry::new(Vec::new());
    let engine = CorrelationEngine::new(
        Arc::new(ScriptedMetrics::default()),
        Arc::new(EmptyLogs),
        Arc::new(EmptyTraces),
        Arc::new(registry),
        EngineConfig::default(),
    );
    let end = Utc::now();
    let start = end - chrono::Duration::minutes(10);
    let range = TimeRange::new(start, end).unwrap();

    let result = discovery::discover(&engine, &range).await.unwrap();
    assert_eq!(result.causes.len(), 1);
    assert_eq!(result.causes[0].reasons, vec!["no_impact_kpi".to_string()]);
}
