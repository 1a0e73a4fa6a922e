//! Result Merger (§4.6): collapses near-duplicate correlations emitted by
//! the same pass.

use crate::model::{Correlation, Engine};

const TIMESTAMP_TOLERANCE_SECS: i64 = 60;
const CONFIDENCE_TOLERANCE: f64 = 0.2;

fn engine_set(c: &Correlation) -> std::collections::BTreeSet<Engine> {
    c.engines.keys().copied().collect()
}

fn similar(a: &Correlation, b: &Correlation) -> bool {
    engine_set(a) == engine_set(b)
        && (a.timestamp - b.timestamp).num_seconds().abs() <= TIMESTAMP_TOLERANCE_SECS
        && (a.confidence - b.confidence).abs() <= CONFIDENCE_TOLERANCE
}

/// Groups `correlations` by similarity and collapses each group into one
/// representative, per §4.6's merge rule.
pub fn merge(correlations: Vec<Correlation>) -> Vec<Correlation> {
    let mut groups: Vec<Vec<Correlation>> = Vec::new();

    'outer: for c in correlations {
        for group in groups.iter_mut() {
            if similar(&group[0], &c) {
                group.push(c);
                continue 'outer;
            }
        }
        groups.push(vec![c]);
    }

    groups.into_iter().map(collapse).collect()
}

fn collapse(group: Vec<Correlation>) -> Correlation {
    let n = group.len();
    if n == 1 {
        return group.into_iter().next().unwrap();
    }

    let mean_ts_nanos: i64 =
        group.iter().map(|c| c.timestamp.timestamp_nanos_opt().unwrap_or(0)).sum::<i64>() / n as i64;
    let timestamp = chrono::DateTime::from_timestamp_nanos(mean_ts_nanos);
    let mean_confidence = group.iter().map(|c| c.confidence).sum::<f64>() / n as f64;

    let mut merged = Correlation::new(timestamp, mean_confidence);
    for c in &group {
        for (engine, payload) in &c.engines {
            merged
                .engines
                .entry(*engine)
                .and_modify(|existing| {
                    if existing != payload {
                        match existing {
                            serde_json::Value::Array(arr) => {
                                if !arr.contains(payload) {
                                    arr.push(payload.clone());
                                }
                            }
                            other => {
                                let first = other.clone();
                                *other = serde_json::Value::Array(vec![first, payload.clone()]);
                            }
                        }
                    }
                })
                .or_insert_with(|| payload.clone());
        }
    }
    merged.metadata.insert(
        "merged_count".to_string(),
        serde_json::Value::from(n),
    );
    merged.metadata.insert(
        "merge_timestamp".to_string(),
        serde_json::Value::String(timestamp.to_rfc3339()),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn correlation(secs: i64, confidence: f64, engine: Engine, payload: serde_json::Value) -> Correlation {
        let ts = chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        Correlation::new(ts, confidence).with_engine(engine, payload)
    }

    #[test]
    fn distinct_correlations_are_not_merged() {
        let a = correlation(0, 0.8, Engine::Metrics, json!(1));
        let b = correlation(1_000, 0.8, Engine::Metrics, json!(2));
        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn near_duplicate_correlations_merge_into_one() {
        let a = correlation(0, 0.8, Engine::Metrics, json!("x"));
        let b = correlation(10, 0.85, Engine::Metrics, json!("x"));
        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].metadata["merged_count"], json!(2));
    }

    #[test]
    fn differing_payload_for_same_engine_becomes_a_list() {
        let a = correlation(0, 0.8, Engine::Logs, json!("x"));
        let b = correlation(5, 0.8, Engine::Logs, json!("y"));
        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].engines[&Engine::Logs],
            json!(["x", "y"])
        );
    }

    #[test]
    fn different_engine_sets_never_merge() {
        let a = correlation(0, 0.8, Engine::Metrics, json!(1));
        let b = correlation(0, 0.8, Engine::Logs, json!(1));
        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }
}
