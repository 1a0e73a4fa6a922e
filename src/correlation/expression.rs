//! Correlation Engine — Expression Form (§4.4).

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::labels::{importance_weight, LabelSchema, CANONICAL_LABELS};
use crate::model::{
    Correlation, CorrelationQuery, CorrelationSummary, Engine, QueryExpression, ResultMetadata,
    ResultStatus, UnifiedResult,
};
use crate::sources::{metrics_source, traces_source};

use super::merger;
use super::CorrelationEngine;

/// One `(timestamp_ms, labels)` record extracted from a `UnifiedResult`,
/// the common currency both correlation strategies below operate on.
struct ExtractedRecord {
    timestamp_ms: Option<i64>,
    labels: Value,
}

pub async fn execute(
    engine: &CorrelationEngine,
    query: &CorrelationQuery,
) -> CoreResult<(Vec<UnifiedResult>, Vec<Correlation>, CorrelationSummary)> {
    query.validate(&[Engine::Metrics, Engine::Logs, Engine::Traces])?;

    // Step 2: group by engine. Multi-expression per engine is reserved for
    // a future action item (§4.4 step 3) — only the first expression per
    // engine executes.
    let mut by_engine: HashMap<Engine, &QueryExpression> = HashMap::new();
    for expr in &query.expressions {
        by_engine.entry(expr.engine).or_insert(expr);
    }

    let ctx = engine.call_context();
    let window = query.time_window.unwrap_or_else(|| ChronoDuration::hours(1));
    let now = Utc::now();

    let futures = by_engine.values().map(|expr| {
        let expr = (*expr).clone();
        let ctx = ctx.clone();
        async move {
            let started = std::time::Instant::now();
            let outcome = execute_one(engine, &expr, now - window, now, &ctx).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::histogram!(
                crate::telemetry::metric_names::FANOUT_DURATION,
                "engine" => expr.engine.as_str()
            )
            .record(elapsed_ms);
            match &outcome {
                Ok(_) => {
                    metrics::counter!(
                        crate::telemetry::metric_names::FANOUT_SUCCESS,
                        "engine" => expr.engine.as_str()
                    )
                    .increment(1);
                }
                Err(_) => {
                    metrics::counter!(
                        crate::telemetry::metric_names::FANOUT_FAILURE,
                        "engine" => expr.engine.as_str()
                    )
                    .increment(1);
                }
            }
            outcome
        }
    });

    // Step 3/4: parallel fan-out, first error wins.
    let outcomes = join_all(futures).await;
    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        results.push(outcome?);
    }

    // Step 5: correlate.
    let correlations = if query.time_window.is_some() && query.expressions.len() == 2 {
        correlate_time_window(&results, window)
    } else {
        correlate_by_label(&results, &engine.config.labels)
    };

    // Step 6: merge near-duplicates.
    let merged = merger::merge(correlations);

    metrics::counter!(crate::telemetry::metric_names::CORRELATIONS_EMITTED)
        .increment(merged.len() as u64);

    // Step 7: summary.
    let summary = summarize(&merged);

    Ok((results, merged, summary))
}

async fn execute_one(
    engine: &CorrelationEngine,
    expr: &QueryExpression,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    ctx: &crate::sources::CallContext,
) -> CoreResult<UnifiedResult> {
    let payload = match expr.engine {
        Engine::Metrics => engine.metrics.instant_query(&expr.query_text, ctx).await?,
        Engine::Logs => engine.logs.query(&expr.query_text, ctx).await?,
        Engine::Traces => {
            engine
                .traces
                .search(&expr.query_text, start, end, ctx)
                .await?
        }
    };

    let total_records = count_records(expr.engine, &payload);
    Ok(UnifiedResult {
        query_id: format!("{:?}:{}", expr.engine, expr.query_text),
        engine: expr.engine,
        status: ResultStatus::Ok,
        payload,
        metadata: ResultMetadata {
            engine_results: HashMap::new(),
            total_records,
            data_sources: vec![expr.engine.as_str().to_string()],
        },
    })
}

fn count_records(engine: Engine, payload: &Value) -> usize {
    match engine {
        Engine::Metrics => metrics_source::extract_points(payload).len(),
        Engine::Logs | Engine::Traces => payload
            .get("data")
            .and_then(|d| d.as_array())
            .map(|a| a.len())
            .unwrap_or(0),
    }
}

fn extract_records(result: &UnifiedResult) -> Vec<ExtractedRecord> {
    match result.engine {
        Engine::Metrics => {
            let series = result
                .payload
                .get("data")
                .and_then(|d| d.get("result"))
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let points = metrics_source::extract_points(&result.payload);
            series
                .iter()
                .enumerate()
                .map(|(idx, entry)| ExtractedRecord {
                    timestamp_ms: points.get(idx).map(|(ts, _)| *ts),
                    labels: metrics_source::extract_labels(entry),
                })
                .collect()
        }
        Engine::Logs => result
            .payload
            .get("data")
            .and_then(|d| d.as_array())
            .map(|records| {
                records
                    .iter()
                    .map(|record| ExtractedRecord {
                        timestamp_ms: record_timestamp(record),
                        labels: record.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Engine::Traces => result
            .payload
            .get("data")
            .and_then(|d| d.as_array())
            .map(|traces| {
                traces
                    .iter()
                    .map(|trace| ExtractedRecord {
                        timestamp_ms: trace_timestamp(trace),
                        labels: traces_source::extract_trace_labels(trace),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn record_timestamp(record: &Value) -> Option<i64> {
    for key in ["_time", "timestamp", "time"] {
        if let Some(v) = record.get(key) {
            if let Some(ms) = crate::sources::normalize_timestamp_ms(v) {
                return Some(ms);
            }
        }
    }
    None
}

fn trace_timestamp(trace: &Value) -> Option<i64> {
    let spans = trace.get("spans")?.as_array()?;
    let first = spans.first()?;
    let micros = first.get("startTime")?.as_i64()?;
    Some(micros / 1_000)
}

/// Time-window correlation: pairs of `(timestamp, payload)` from each of
/// the exactly-two results within `window` of each other.
fn correlate_time_window(results: &[UnifiedResult], window: ChronoDuration) -> Vec<Correlation> {
    if results.len() != 2 {
        return Vec::new();
    }
    let a = &results[0];
    let b = &results[1];
    let a_records = extract_records(a);
    let b_records = extract_records(b);
    let window_ms = window.num_milliseconds().max(1) as f64;

    let mut correlations = Vec::new();
    for ra in &a_records {
        let Some(ta) = ra.timestamp_ms else { continue };
        for rb in &b_records {
            let Some(tb) = rb.timestamp_ms else { continue };
            let delta = (ta - tb).abs() as f64;
            if delta <= window_ms {
                let confidence = (0.5 + 0.4 * (1.0 - delta / window_ms)).clamp(0.0, 0.95);
                let timestamp = DateTime::from_timestamp_millis(ta.min(tb)).unwrap_or_else(Utc::now);
                let correlation = Correlation::new(timestamp, confidence)
                    .with_engine(a.engine, ra.labels.clone())
                    .with_engine(b.engine, rb.labels.clone());
                correlations.push(correlation);
            }
        }
    }
    correlations
}

/// Label-based correlation: for each pair of results from different
/// engines, weight matching `(key, value)` labels by importance. Canonical
/// labels are resolved through the configured `LabelSchema` (§4.5) rather
/// than read off fixed raw keys, so the same logic works whether a record
/// spells the service label `service`, `service_name`, or
/// `kubernetes.pod_name`-style nested path.
fn correlate_by_label(results: &[UnifiedResult], schema: &LabelSchema) -> Vec<Correlation> {
    let total_weight: f64 = CANONICAL_LABELS.iter().map(|l| importance_weight(l)).sum();
    let mut correlations = Vec::new();

    for i in 0..results.len() {
        for j in (i + 1)..results.len() {
            let a = &results[i];
            let b = &results[j];
            if a.engine == b.engine {
                continue;
            }
            let a_records = extract_records(a);
            let b_records = extract_records(b);

            for ra in &a_records {
                let ra_labels = schema.resolve_all(&ra.labels);
                for rb in &b_records {
                    let rb_labels = schema.resolve_all(&rb.labels);
                    let matched_weight = matching_weight(&ra_labels, &rb_labels);
                    if matched_weight <= 0.0 {
                        continue;
                    }
                    let confidence = (matched_weight / total_weight).clamp(0.6, 0.95);
                    let timestamp = ra
                        .timestamp_ms
                        .or(rb.timestamp_ms)
                        .and_then(DateTime::from_timestamp_millis)
                        .unwrap_or_else(Utc::now);
                    let correlation = Correlation::new(timestamp, confidence)
                        .with_engine(a.engine, ra.labels.clone())
                        .with_engine(b.engine, rb.labels.clone());
                    correlations.push(correlation);
                }
            }
        }
    }
    correlations
}

fn matching_weight(a: &HashMap<&'static str, String>, b: &HashMap<&'static str, String>) -> f64 {
    let mut weight = 0.0;
    for label in CANONICAL_LABELS {
        if let (Some(av), Some(bv)) = (a.get(label), b.get(label)) {
            if av == bv {
                weight += importance_weight(label);
            }
        }
    }
    weight
}

fn summarize(correlations: &[Correlation]) -> CorrelationSummary {
    if correlations.is_empty() {
        return CorrelationSummary::default();
    }
    let average_confidence =
        correlations.iter().map(|c| c.confidence).sum::<f64>() / correlations.len() as f64;
    let mut engines_involved: Vec<Engine> = correlations
        .iter()
        .flat_map(|c| c.engines.keys().copied())
        .collect();
    engines_involved.sort_by_key(|e| e.as_str());
    engines_involved.dedup();

    CorrelationSummary {
        count: correlations.len(),
        average_confidence,
        engines_involved,
    }
}
