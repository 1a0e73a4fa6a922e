//! KPI registry coupling (§4, §9 "KPI registry coupling").
//!
//! The correlation engine needs to enumerate and look up KPI definitions,
//! but owns no opinion about where they live — a config file, a database, a
//! remote catalog service. `KpiRegistry` is the seam; `InMemoryKpiRegistry`
//! is the only implementation this crate ships, useful for tests and small
//! deployments that hand the engine a fixed KPI set at construction time.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::kpi::KpiDefinition;

#[async_trait]
pub trait KpiRegistry: Send + Sync {
    async fn list(&self) -> CoreResult<Vec<KpiDefinition>>;
    async fn get(&self, id: Uuid) -> CoreResult<Option<KpiDefinition>>;
    async fn search(&self, service_family: &str) -> CoreResult<Vec<KpiDefinition>>;
}

/// A `KpiRegistry` backed by a fixed, in-process map. Construction is
/// infallible; duplicate IDs silently overwrite in insertion order, since
/// `derive_kpi_id` guarantees identical canonical keys collapse to the same
/// entry by design.
pub struct InMemoryKpiRegistry {
    by_id: HashMap<Uuid, KpiDefinition>,
}

impl InMemoryKpiRegistry {
    pub fn new(definitions: impl IntoIterator<Item = KpiDefinition>) -> Self {
        let by_id = definitions.into_iter().map(|kpi| (kpi.id, kpi)).collect();
        Self { by_id }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl KpiRegistry for InMemoryKpiRegistry {
    async fn list(&self) -> CoreResult<Vec<KpiDefinition>> {
        Ok(self.by_id.values().cloned().collect())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<KpiDefinition>> {
        Ok(self.by_id.get(&id).cloned())
    }

    async fn search(&self, service_family: &str) -> CoreResult<Vec<KpiDefinition>> {
        let needle = service_family.to_lowercase();
        Ok(self
            .by_id
            .values()
            .filter(|kpi| kpi.service_family.to_lowercase() == needle)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::{KpiDefinitionFields, KpiIdentitySeed};

    fn kpi(name: &str, service_family: &str) -> KpiDefinition {
        KpiDefinition::new(
            KpiIdentitySeed {
                name: name.into(),
                ..Default::default()
            },
            KpiDefinitionFields {
                service_family: service_family.into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn list_and_get_round_trip() {
        let kpi = kpi("checkout_latency", "checkout");
        let id = kpi.id;
        let registry = InMemoryKpiRegistry::new(vec![kpi]);
        assert_eq!(registry.list().await.unwrap().len(), 1);
        assert_eq!(registry.get(id).await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let registry = InMemoryKpiRegistry::new(Vec::new());
        assert!(registry.get(Uuid::nil()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_filters_by_service_family_case_insensitively() {
        let registry = InMemoryKpiRegistry::new(vec![
            kpi("a", "Checkout"),
            kpi("b", "payments"),
        ]);
        let found = registry.search("checkout").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");
    }
}
