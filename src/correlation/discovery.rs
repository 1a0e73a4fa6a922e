//! Correlation Engine — Discovery (TimeRange) Form (§4.7).

use chrono::Duration as ChronoDuration;
use statrs::statistics::Statistics;

use crate::error::CoreResult;
use crate::kpi::KpiDefinition;
use crate::model::{CauseCandidate, CorrelationResult, CorrelationStats};
use crate::sources::{metrics_source, CallContext};
use crate::stats;
use crate::time_range::{Ring, RingBuilder, TimeRange};

use super::CorrelationEngine;

const MAX_KPI_LIST: usize = 10_000;
const MAX_CROSS_CORR_LAG: usize = 3;
/// Below this many paired ring samples, a cause's stats are flagged as
/// thin evidence regardless of how strong the correlation looks.
const SMALL_SAMPLE_THRESHOLD: usize = 5;

/// One KPI's non-empty probe result and resolved label index (§4.7 step 3).
struct Probe {
    kpi: KpiDefinition,
    non_empty: bool,
}

pub async fn discover(
    engine: &CorrelationEngine,
    range: &TimeRange,
) -> CoreResult<CorrelationResult> {
    // Step 1: build rings.
    let rings = RingBuilder::build(range, &engine.config.buckets);
    let mid_ring = rings
        .get(rings.len() / 2)
        .copied()
        .unwrap_or(*range);

    // Step 2: list KPIs from the registry, bounded by a large limit.
    let mut kpis = engine.registry.list().await?;
    kpis.truncate(MAX_KPI_LIST);

    let ctx = engine.call_context();

    // Step 3: probe every KPI at the mid-ring window.
    let mut probes = Vec::with_capacity(kpis.len());
    for kpi in kpis {
        let non_empty = probe_kpi(engine, &kpi, &mid_ring, &ctx).await;
        probes.push(Probe { kpi, non_empty });
    }

    // Step 4: classify impact vs. candidate cause.
    let impacts: Vec<&Probe> = probes
        .iter()
        .filter(|p| p.non_empty && p.kpi.layer == crate::kpi::KpiLayer::Impact)
        .collect();
    let mut candidates: Vec<&Probe> = probes
        .iter()
        .filter(|p| p.non_empty && !(p.kpi.layer == crate::kpi::KpiLayer::Impact))
        .collect();

    // Step 5: fall back to configured probe queries when the registry
    // yields no impact KPI.
    let mut fallback_impact_formula: Option<String> = None;
    let mut fallback_candidate_formulas: Vec<String> = Vec::new();
    if impacts.is_empty() {
        for probe_query in &engine.config.probes {
            let non_empty = probe_query_non_empty(engine, probe_query, &mid_ring, &ctx).await;
            if !non_empty {
                continue;
            }
            if fallback_impact_formula.is_none() {
                fallback_impact_formula = Some(probe_query.query_text.clone());
            } else {
                fallback_candidate_formulas.push(probe_query.query_text.clone());
            }
        }
    }

    if impacts.is_empty() && fallback_impact_formula.is_none() {
        return Ok(CorrelationResult {
            time_range: *range,
            affected_services: Vec::new(),
            causes: vec![no_impact_cause()],
        });
    }

    // From here on, reason over the registry-sourced impact KPI when one
    // was found; otherwise synthesize one from the fallback formula.
    let impact_series = if let Some(first_impact) = impacts.first() {
        ring_aggregate_kpi(engine, &first_impact.kpi, &rings, &ctx).await
    } else {
        ring_aggregate_formula(
            engine,
            fallback_impact_formula.as_deref().unwrap_or_default(),
            &rings,
            &ctx,
        )
        .await
    };

    // Confounder: at most one, per kind/tag heuristic (step 7). Among
    // qualifying candidates, the one with the largest non-zero ring-aggregate
    // sample count wins; ties broken by smallest canonical KPI id. Computed
    // up front as owned data so `candidates` can still be mutated below.
    let confounder_pool: Vec<&Probe> = candidates
        .iter()
        .filter(|p| p.kpi.is_confounder_candidate())
        .copied()
        .collect();
    let mut confounder: Option<KpiDefinition> = None;
    let mut confounder_series: Option<Vec<f64>> = None;
    let mut best_count = 0usize;
    for p in &confounder_pool {
        let series = ring_aggregate_kpi(engine, &p.kpi, &rings, &ctx).await;
        let count = series.iter().filter(|v| **v != 0.0).count();
        let better = match &confounder {
            None => true,
            Some(cur) => {
                count > best_count
                    || (count == best_count && p.kpi.id.to_string() < cur.id.to_string())
            }
        };
        if better {
            best_count = count;
            confounder = Some(p.kpi.clone());
            confounder_series = Some(series);
        }
    }

    let affected_services: Vec<String> = impacts
        .iter()
        .map(|p| p.kpi.name.clone())
        .chain(fallback_impact_formula.iter().cloned())
        .collect();

    let mut causes = Vec::new();

    // Drop candidates that double as the confounder itself from the
    // ranked-cause list; only keep distinct candidates.
    candidates.retain(|p| confounder.as_ref().map(|c| c.id != p.kpi.id).unwrap_or(true));

    for candidate in &candidates {
        let candidate_series = ring_aggregate_kpi(engine, &candidate.kpi, &rings, &ctx).await;
        causes.push(build_cause(
            candidate.kpi.clone(),
            &impact_series,
            &candidate_series,
            confounder_series.as_deref(),
            engine.config.min_correlation,
        ));
    }
    for formula in &fallback_candidate_formulas {
        let candidate_series = ring_aggregate_formula(engine, formula, &rings, &ctx).await;
        let synthetic = synthetic_kpi(formula);
        causes.push(build_cause(
            synthetic,
            &impact_series,
            &candidate_series,
            confounder_series.as_deref(),
            engine.config.min_correlation,
        ));
    }

    causes.sort_by(|a, b| {
        b.suspicion_score
            .partial_cmp(&a.suspicion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(CorrelationResult {
        time_range: *range,
        affected_services,
        causes,
    })
}

fn no_impact_cause() -> CauseCandidate {
    CauseCandidate {
        kpi_name: "none".into(),
        kpi_id: uuid::Uuid::nil(),
        kpi_formula: String::new(),
        service: String::new(),
        suspicion_score: 0.0,
        reasons: vec!["no_impact_kpi".into()],
        stats: None,
    }
}

fn synthetic_kpi(formula: &str) -> KpiDefinition {
    KpiDefinition::new(
        crate::kpi::KpiIdentitySeed {
            name: formula.to_string(),
            ..Default::default()
        },
        crate::kpi::KpiDefinitionFields {
            formula: formula.to_string(),
            ..Default::default()
        },
    )
}

fn build_cause(
    kpi: KpiDefinition,
    impact: &[f64],
    candidate: &[f64],
    confounder: Option<&[f64]>,
    min_correlation: f64,
) -> CauseCandidate {
    let paired_len = impact.len().min(candidate.len());
    let impact = &impact[..paired_len];
    let candidate = &candidate[..paired_len];

    let mut reasons = Vec::new();

    if paired_len < 2 {
        reasons.push("insufficient_data".to_string());
        return CauseCandidate {
            kpi_name: kpi.name.clone(),
            kpi_id: kpi.id,
            kpi_formula: kpi.formula.clone(),
            service: kpi.service_family.clone(),
            suspicion_score: 0.0,
            reasons,
            stats: None,
        };
    }

    let pearson = stats::pearson(impact, candidate);
    let spearman = stats::spearman(impact, candidate);
    let (cross_corr_max, cross_corr_lag) =
        stats::cross_correlation(candidate, impact, MAX_CROSS_CORR_LAG);

    let partial = confounder.and_then(|z| {
        let z = &z[..paired_len.min(z.len())];
        if z.len() == paired_len {
            Some(stats::partial_correlation(impact, candidate, z))
        } else {
            None
        }
    });

    let anomaly_density = anomaly_density(candidate);

    let suspicion = stats::suspicion_score(&stats::SuspicionInputs {
        pearson,
        spearman,
        cross_corr_max,
        cross_corr_lag,
        sample_size: paired_len,
        min_correlation,
        partial,
        anomaly_density,
    });

    if pearson.abs() >= min_correlation {
        reasons.push("strong_pearson".to_string());
    }
    if spearman.abs() >= min_correlation {
        reasons.push("strong_spearman".to_string());
    }
    if cross_corr_max > 0.5 && cross_corr_lag > 0 {
        reasons.push("lagged_cause_precedes_impact".to_string());
    }
    match (partial, pearson.abs() > f64::EPSILON) {
        (Some(p), true) if p.abs() >= 0.8 * pearson.abs() => {
            reasons.push("partial_supports_direct_link".to_string())
        }
        (Some(p), true) if p.abs() < 0.5 * pearson.abs() => {
            reasons.push("partial_suggests_confounding".to_string());
            reasons.push("partial_penalized_due_to_confounding".to_string());
        }
        (None, _) => reasons.push("partial_correlation_not_available_no_confounder".to_string()),
        _ => {}
    }
    if anomaly_density > 0.0 {
        reasons.push("high_anomaly_density".to_string());
    } else {
        reasons.push("no_anomalies_detected".to_string());
    }
    if paired_len < SMALL_SAMPLE_THRESHOLD {
        reasons.push("small_sample_size".to_string());
    }

    CauseCandidate {
        kpi_name: kpi.name.clone(),
        kpi_id: kpi.id,
        kpi_formula: kpi.formula.clone(),
        service: kpi.service_family.clone(),
        suspicion_score: suspicion,
        reasons,
        stats: Some(CorrelationStats {
            pearson,
            spearman,
            cross_corr_max,
            cross_corr_lag,
            partial,
            sample_size: paired_len,
            p_value: 0.0,
            confidence: (pearson.abs() + spearman.abs()) / 2.0,
        }),
    }
}

/// Fraction of values lying outside `mean ± 2*stddev` (§4.7 step 9).
fn anomaly_density(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.mean();
    let stddev = values.std_dev();
    if stddev <= f64::EPSILON {
        return 0.0;
    }
    let outside = values
        .iter()
        .filter(|v| (**v - mean).abs() > 2.0 * stddev)
        .count();
    outside as f64 / values.len() as f64
}

async fn probe_kpi(
    engine: &CorrelationEngine,
    kpi: &KpiDefinition,
    ring: &Ring,
    ctx: &CallContext,
) -> bool {
    aggregate_for_ring(engine, &kpi.datastore, &kpi.formula, ring, ctx)
        .await
        .map(|v| v != 0.0)
        .unwrap_or(false)
}

async fn probe_query_non_empty(
    engine: &CorrelationEngine,
    probe: &crate::model::QueryExpression,
    ring: &Ring,
    ctx: &CallContext,
) -> bool {
    let datastore = probe.engine.as_str();
    aggregate_for_ring(engine, datastore, &probe.query_text, ring, ctx)
        .await
        .map(|v| v != 0.0)
        .unwrap_or(false)
}

/// One ring's aggregate value for a KPI formula, dispatched by datastore:
/// mean of points for metrics, record count for logs/traces.
async fn aggregate_for_ring(
    engine: &CorrelationEngine,
    datastore: &str,
    formula: &str,
    ring: &Ring,
    ctx: &CallContext,
) -> CoreResult<f64> {
    let started = std::time::Instant::now();
    let result = aggregate_for_ring_inner(engine, datastore, formula, ring, ctx).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    metrics::histogram!(
        crate::telemetry::metric_names::FANOUT_DURATION,
        "engine" => datastore.to_string()
    )
    .record(elapsed_ms);
    match &result {
        Ok(_) => {
            metrics::counter!(
                crate::telemetry::metric_names::FANOUT_SUCCESS,
                "engine" => datastore.to_string()
            )
            .increment(1);
        }
        Err(_) => {
            metrics::counter!(
                crate::telemetry::metric_names::FANOUT_FAILURE,
                "engine" => datastore.to_string()
            )
            .increment(1);
        }
    }
    result
}

async fn aggregate_for_ring_inner(
    engine: &CorrelationEngine,
    datastore: &str,
    formula: &str,
    ring: &Ring,
    ctx: &CallContext,
) -> CoreResult<f64> {
    match datastore {
        "logs" => {
            let resp = engine.logs.query(formula, ctx).await?;
            let count = resp
                .get("data")
                .and_then(|d| d.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            Ok(count as f64)
        }
        "traces" => {
            let resp = engine
                .traces
                .search(formula, ring.start(), ring.end(), ctx)
                .await?;
            let count = resp
                .get("data")
                .and_then(|d| d.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            Ok(count as f64)
        }
        _ => {
            let resp = engine
                .metrics
                .range_query(formula, ring.start(), ring.end(), step_for(ring), ctx)
                .await?;
            let points = metrics_source::extract_points(&resp);
            if points.is_empty() {
                Ok(0.0)
            } else {
                Ok(points.iter().map(|(_, v)| *v).collect::<Vec<_>>().mean())
            }
        }
    }
}

fn step_for(ring: &Ring) -> ChronoDuration {
    let duration = ring.duration();
    (duration / 10).max(ChronoDuration::seconds(15))
}

async fn ring_aggregate_kpi(
    engine: &CorrelationEngine,
    kpi: &KpiDefinition,
    rings: &[Ring],
    ctx: &CallContext,
) -> Vec<f64> {
    ring_aggregate(engine, &kpi.datastore, &kpi.formula, rings, ctx).await
}

async fn ring_aggregate_formula(
    engine: &CorrelationEngine,
    formula: &str,
    rings: &[Ring],
    ctx: &CallContext,
) -> Vec<f64> {
    ring_aggregate(engine, "metrics", formula, rings, ctx).await
}

async fn ring_aggregate(
    engine: &CorrelationEngine,
    datastore: &str,
    formula: &str,
    rings: &[Ring],
    ctx: &CallContext,
) -> Vec<f64> {
    let mut series = Vec::with_capacity(rings.len());
    for ring in rings {
        let value = aggregate_for_ring(engine, datastore, formula, ring, ctx)
            .await
            .unwrap_or(0.0);
        series.push(value);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_density_detects_outliers() {
        let values = vec![1.0, 1.0, 1.0, 1.0, 50.0];
        assert!(anomaly_density(&values) > 0.0);
    }

    #[test]
    fn anomaly_density_zero_for_constant_series() {
        let values = vec![1.0, 1.0, 1.0];
        assert_eq!(anomaly_density(&values), 0.0);
    }

    #[test]
    fn build_cause_flags_insufficient_data() {
        let kpi = synthetic_kpi("up");
        let cause = build_cause(kpi, &[1.0], &[1.0], None, 0.1);
        assert!(cause.reasons.contains(&"insufficient_data".to_string()));
        assert_eq!(cause.suspicion_score, 0.0);
    }
}
