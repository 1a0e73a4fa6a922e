//! Integration check that the KPI registry relies on deterministic identity
//! (§4.8): two `KpiDefinition`s built from equivalent identity seeds but
//! different descriptive fields collapse to one registry entry.

use obscore::kpi::{KpiDefinition, KpiDefinitionFields, KpiIdentitySeed, KpiLayer};
use obscore::registry::{InMemoryKpiRegistry, KpiRegistry};

#[tokio::test]
async fn same_canonical_key_collapses_to_one_registry_entry() {
    let seed = KpiIdentitySeed {
        source: Some("Prometheus".into()),
        source_id: Some("checkout_latency_p99".into()),
        namespace: None,
        name: "checkout latency p99".into(),
    };

    let v1 = KpiDefinition::new(
        seed.clone(),
        KpiDefinitionFields {
            formula: "histogram_quantile(0.99, checkout_latency_bucket)".into(),
            layer: KpiLayer::Impact,
            service_family: "checkout".into(),
            ..Default::default()
        },
    );
    // Re-discovered later with a revised formula but the same source/source_id.
    let v2 = KpiDefinition::new(
        seed,
        KpiDefinitionFields {
            formula: "histogram_quantile(0.99, checkout_latency_bucket[5m])".into(),
            layer: KpiLayer::Impact,
            service_family: "checkout".into(),
            ..Default::default()
        },
    );

    assert_eq!(v1.id, v2.id);

    let registry = InMemoryKpiRegistry::new(vec![v1, v2.clone()]);
    let all = registry.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].formula, v2.formula);
}

#[tokio::test]
async fn distinct_namespaces_yield_distinct_ids_for_the_same_bare_name() {
    let a = KpiDefinition::new(
        KpiIdentitySeed {
            namespace: Some("checkout".into()),
            name: "error_rate".into(),
            ..Default::default()
        },
        KpiDefinitionFields::default(),
    );
    let b = KpiDefinition::new(
        KpiIdentitySeed {
            namespace: Some("payments".into()),
            name: "error_rate".into(),
            ..Default::default()
        },
        KpiDefinitionFields::default(),
    );
    assert_ne!(a.id, b.id);

    let registry = InMemoryKpiRegistry::new(vec![a, b]);
    assert_eq!(registry.list().await.unwrap().len(), 2);
}
