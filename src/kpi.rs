//! KPI definitions and deterministic ID derivation (§3, §4.8).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace UUID for KPI definition IDs. Fixed so that canonical-key
/// derivation (§4.8) is byte-identical across processes and releases.
const KPI_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x70, 0x69, 0x2d, 0x6e, 0x73, 0x2d, 0x31, 0x2d, 0x63, 0x6f, 0x72, 0x72, 0x65, 0x6c, 0x00,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiLayer {
    Impact,
    Cause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// NEGATIVE sentiment means "higher is worse" (§3).
    pub fn higher_is_worse(&self) -> bool {
        matches!(self, Sentiment::Negative)
    }
}

/// Fields used to derive a KPI's canonical key, prior to ID assignment.
#[derive(Debug, Clone, Default)]
pub struct KpiIdentitySeed {
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Canonical key precedence from spec.md §4.8:
/// 1. `source + source_id` present
/// 2. otherwise `namespace` present
/// 3. otherwise bare `name`
pub fn canonical_key(seed: &KpiIdentitySeed) -> String {
    if let (Some(source), Some(source_id)) = (&seed.source, &seed.source_id) {
        if !source.trim().is_empty() && !source_id.trim().is_empty() {
            return format!(
                "KPIDefinition|source={}|sourceId={}",
                norm(source),
                norm(source_id)
            );
        }
    }
    if let Some(namespace) = &seed.namespace {
        if !namespace.trim().is_empty() {
            return format!(
                "KPIDefinition|namespace={}|name={}",
                norm(namespace),
                norm(&seed.name)
            );
        }
    }
    format!("KPIDefinition|name={}", norm(&seed.name))
}

/// Deterministic ID for a KPI: a namespaced v5 UUID over the canonical key.
/// Same canonical key implies a byte-identical ID.
pub fn derive_kpi_id(seed: &KpiIdentitySeed) -> Uuid {
    Uuid::new_v5(&KPI_NAMESPACE, canonical_key(seed).as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: Uuid,
    pub name: String,
    pub signal_type: String,
    pub datastore: String,
    pub formula: String,
    pub layer: KpiLayer,
    pub sentiment: Sentiment,
    pub service_family: String,
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dimensions_hint: Vec<String>,
}

impl KpiDefinition {
    pub fn new(seed: KpiIdentitySeed, rest: KpiDefinitionFields) -> Self {
        let id = derive_kpi_id(&seed);
        Self {
            id,
            name: seed.name,
            signal_type: rest.signal_type,
            datastore: rest.datastore,
            formula: rest.formula,
            layer: rest.layer,
            sentiment: rest.sentiment,
            service_family: rest.service_family,
            kind: rest.kind,
            tags: rest.tags,
            dimensions_hint: rest.dimensions_hint,
        }
    }

    /// A KPI qualifies as a confounder candidate when its `kind` mentions
    /// infrastructure/load, or its tags carry the `confounder` marker
    /// (§4.7 step 7).
    pub fn is_confounder_candidate(&self) -> bool {
        let kind = self.kind.to_lowercase();
        if kind.contains("infra") || kind.contains("load") {
            return true;
        }
        self.tags.iter().any(|t| {
            let t = t.to_lowercase();
            t == "confounder" || t == "role=confounder"
        })
    }
}

/// The remaining fields of a `KpiDefinition`, split out so callers build the
/// identity seed separately from the descriptive fields.
#[derive(Debug, Clone, Default)]
pub struct KpiDefinitionFields {
    pub signal_type: String,
    pub datastore: String,
    pub formula: String,
    pub layer: KpiLayer,
    pub sentiment: Sentiment,
    pub service_family: String,
    pub kind: String,
    pub tags: Vec<String>,
    pub dimensions_hint: Vec<String>,
}

impl Default for KpiLayer {
    fn default() -> Self {
        KpiLayer::Cause
    }
}

impl Default for Sentiment {
    fn default() -> Self {
        Sentiment::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_canonical_inputs_yield_identical_ids() {
        let seed = KpiIdentitySeed {
            source: Some("Prometheus".into()),
            source_id: Some("  cpu_saturation  ".into()),
            namespace: None,
            name: "cpu saturation".into(),
        };
        let a = derive_kpi_id(&seed);
        let b = derive_kpi_id(&seed.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn differing_source_id_changes_the_id() {
        let mut seed = KpiIdentitySeed {
            source: Some("prometheus".into()),
            source_id: Some("a".into()),
            namespace: None,
            name: "x".into(),
        };
        let a = derive_kpi_id(&seed);
        seed.source_id = Some("b".into());
        let b = derive_kpi_id(&seed);
        assert_ne!(a, b);
    }

    #[test]
    fn precedence_prefers_source_over_namespace() {
        let seed = KpiIdentitySeed {
            source: Some("src".into()),
            source_id: Some("id".into()),
            namespace: Some("ns".into()),
            name: "name".into(),
        };
        assert!(canonical_key(&seed).starts_with("KPIDefinition|source="));
    }

    #[test]
    fn precedence_falls_back_to_bare_name() {
        let seed = KpiIdentitySeed {
            source: None,
            source_id: None,
            namespace: None,
            name: "Checkout Latency".into(),
        };
        assert_eq!(canonical_key(&seed), "KPIDefinition|name=checkout latency");
    }

    #[test]
    fn confounder_candidate_detection() {
        let mut fields = KpiDefinitionFields {
            kind: "infra.node".into(),
            ..Default::default()
        };
        let seed = KpiIdentitySeed {
            name: "node_load".into(),
            ..Default::default()
        };
        let kpi = KpiDefinition::new(seed.clone(), fields.clone());
        assert!(kpi.is_confounder_candidate());

        fields.kind = "business".into();
        fields.tags = vec!["role=confounder".into()];
        let kpi2 = KpiDefinition::new(seed, fields);
        assert!(kpi2.is_confounder_candidate());
    }
}
