//! Schema-driven label extraction (§4.5).
//!
//! Backends disagree on what they call the same concept: Prometheus calls
//! it `pod`, Loki-style log stores call it `pod_name`, Jaeger process tags
//! call it `k8s.pod.name`. The schema below maps each canonical label to an
//! ordered list of candidate raw keys (dotted paths supported) so the
//! correlation engine can compare "the same" dimension across engines.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical label names the correlation engine reasons about directly.
pub const CANONICAL_LABELS: &[&str] = &[
    "service",
    "pod",
    "namespace",
    "deployment",
    "container",
    "host",
    "level",
    "operation",
];

/// Importance weights used when scoring label-based correlation (§4.4 step
/// 5b): a shared `service` label carries more signal than a shared `host`.
pub fn importance_weight(label: &str) -> f64 {
    match label {
        "service" => 1.0,
        "pod" => 0.9,
        "namespace" | "deployment" => 0.8,
        "operation" => 0.8,
        "container" => 0.7,
        "host" => 0.6,
        "level" => 0.3,
        _ => 0.5,
    }
}

/// Maps each canonical label to the raw keys that may carry it, in
/// precedence order, per backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSchema {
    pub candidates: HashMap<String, Vec<String>>,
}

impl Default for LabelSchema {
    fn default() -> Self {
        let mut candidates: HashMap<String, Vec<String>> = HashMap::new();
        candidates.insert(
            "service".into(),
            vec![
                "service".into(),
                "service_name".into(),
                "k8s.deployment.name".into(),
                "job".into(),
            ],
        );
        candidates.insert(
            "pod".into(),
            vec![
                "pod".into(),
                "pod_name".into(),
                "k8s.pod.name".into(),
                "kubernetes.pod_name".into(),
            ],
        );
        candidates.insert(
            "namespace".into(),
            vec![
                "namespace".into(),
                "k8s.namespace.name".into(),
                "kubernetes.namespace_name".into(),
            ],
        );
        candidates.insert(
            "deployment".into(),
            vec!["deployment".into(), "k8s.deployment.name".into()],
        );
        candidates.insert(
            "container".into(),
            vec![
                "container".into(),
                "container_name".into(),
                "k8s.container.name".into(),
            ],
        );
        candidates.insert(
            "host".into(),
            vec![
                "host".into(),
                "instance".into(),
                "hostname".into(),
                "k8s.node.name".into(),
            ],
        );
        candidates.insert(
            "level".into(),
            vec!["level".into(), "severity".into(), "log.level".into()],
        );
        candidates.insert(
            "operation".into(),
            vec![
                "operation".into(),
                "operation_name".into(),
                "span.name".into(),
                "http.route".into(),
            ],
        );
        Self { candidates }
    }
}

impl LabelSchema {
    /// Resolves one canonical label against a record's raw key/value map
    /// (which may itself contain nested objects), walking dotted-path
    /// candidates as needed.
    pub fn resolve<'a>(&self, canonical: &str, raw: &'a Value) -> Option<&'a str> {
        let keys = self.candidates.get(canonical)?;
        for key in keys {
            if let Some(v) = lookup_path(raw, key) {
                if let Some(s) = v.as_str() {
                    if !s.is_empty() {
                        return Some(s);
                    }
                }
            }
        }
        None
    }

    /// Resolves every canonical label that is present in `raw`.
    pub fn resolve_all(&self, raw: &Value) -> HashMap<&'static str, String> {
        let mut out = HashMap::new();
        for label in CANONICAL_LABELS {
            if let Some(v) = self.resolve(label, raw) {
                out.insert(*label, v.to_string());
            }
        }
        out
    }
}

/// Looks up a dotted path (`"k8s.pod.name"`) in a JSON object, falling back
/// to a flat key lookup (covers backends that flatten dotted tag names into
/// a single literal key, e.g. Jaeger process tags).
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = value.get(path) {
        return Some(v);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_flat_key() {
        let schema = LabelSchema::default();
        let raw = json!({"service_name": "checkout"});
        assert_eq!(schema.resolve("service", &raw), Some("checkout"));
    }

    #[test]
    fn resolves_dotted_nested_path() {
        let schema = LabelSchema::default();
        let raw = json!({"k8s": {"pod": {"name": "checkout-7f8"}}});
        assert_eq!(schema.resolve("pod", &raw), Some("checkout-7f8"));
    }

    #[test]
    fn resolves_dotted_flat_fallback() {
        let schema = LabelSchema::default();
        let raw = json!({"k8s.pod.name": "checkout-7f8"});
        assert_eq!(schema.resolve("pod", &raw), Some("checkout-7f8"));
    }

    #[test]
    fn missing_label_returns_none() {
        let schema = LabelSchema::default();
        let raw = json!({"unrelated": "value"});
        assert_eq!(schema.resolve("service", &raw), None);
    }

    #[test]
    fn resolve_all_collects_present_labels() {
        let schema = LabelSchema::default();
        let raw = json!({"service": "checkout", "host": "node-1"});
        let resolved = schema.resolve_all(&raw);
        assert_eq!(resolved.get("service"), Some(&"checkout".to_string()));
        assert_eq!(resolved.get("host"), Some(&"node-1".to_string()));
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn importance_weight_ranks_service_highest() {
        assert!(importance_weight("service") > importance_weight("host"));
    }
}
