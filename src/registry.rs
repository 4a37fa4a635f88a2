//! Entity registry: the single source of truth for entities, keyed by GUID.
//! Creation is idempotent on GUID — repeated creation with the same
//! identity updates metadata and returns the existing entity. Auto-linking
//! of CONTAINS/CONTAINED_IN is performed by the orchestrator, which holds
//! both the registry and the relationship manager.

use dashmap::DashMap;
use tracing::debug;

use crate::entity::{Entity, HasLifecycle};

pub struct Registry {
    entities: DashMap<String, Entity>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { entities: DashMap::new() }
    }

    /// Insert `entity`, or if its GUID already exists, fold `entity`'s
    /// payload/header into the existing record and reset its absence
    /// counter. Returns the GUID either way.
    pub fn upsert(&self, mut entity: Entity) -> String {
        let guid = entity.header.guid.clone();
        entity.mark_observed();
        if let Some(mut existing) = self.entities.get_mut(&guid) {
            existing.payload = entity.payload;
            existing.header.tags = entity.header.tags;
            existing.header.golden_metrics = entity.header.golden_metrics;
            existing.header.metadata = entity.header.metadata;
            existing.mark_observed();
            debug!(guid, "entity updated");
        } else {
            debug!(guid, "entity created");
            self.entities.insert(guid.clone(), entity);
        }
        guid
    }

    pub fn get(&self, guid: &str) -> Option<Entity> {
        self.entities.get(guid).map(|e| e.clone())
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.entities.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Increment the absence counter on every entity not observed this
    /// tick, evicting entities absent for `max_absent_ticks` consecutive
    /// ticks. `observed` is the set of GUIDs upserted during the current tick.
    pub fn age_and_evict(&self, observed: &std::collections::HashSet<String>, max_absent_ticks: u32) -> Vec<String> {
        let mut evicted = Vec::new();
        for mut entry in self.entities.iter_mut() {
            if !observed.contains(entry.key()) {
                entry.mark_absent();
            }
        }
        self.entities.retain(|guid, entity| {
            let keep = !entity.is_evictable(max_absent_ticks);
            if !keep {
                evicted.push(guid.clone());
            }
            keep
        });
        evicted
    }

    pub fn all_guids(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Provider;

    #[test]
    fn upsert_is_idempotent_on_guid() {
        let registry = Registry::new();
        let entity = crate::entity::create_cluster(1, Provider::Kafka, "prod", None).unwrap();
        let guid_a = registry.upsert(entity.clone());
        let guid_b = registry.upsert(entity);
        assert_eq!(guid_a, guid_b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn eviction_after_n_consecutive_absent_ticks() {
        let registry = Registry::new();
        let entity = crate::entity::create_cluster(1, Provider::Kafka, "prod", None).unwrap();
        let guid = registry.upsert(entity);

        let empty = std::collections::HashSet::new();
        registry.age_and_evict(&empty, 3);
        assert!(registry.contains(&guid));
        registry.age_and_evict(&empty, 3);
        assert!(registry.contains(&guid));
        let evicted = registry.age_and_evict(&empty, 3);
        assert_eq!(evicted, vec![guid.clone()]);
        assert!(!registry.contains(&guid));
    }

    #[test]
    fn observation_resets_absence_counter() {
        let registry = Registry::new();
        let entity = crate::entity::create_cluster(1, Provider::Kafka, "prod", None).unwrap();
        let guid = registry.upsert(entity.clone());

        let empty = std::collections::HashSet::new();
        registry.age_and_evict(&empty, 3);
        registry.age_and_evict(&empty, 3);

        let mut observed = std::collections::HashSet::new();
        observed.insert(guid.clone());
        registry.upsert(entity);
        registry.age_and_evict(&observed, 3);
        registry.age_and_evict(&empty, 3);
        registry.age_and_evict(&empty, 3);
        assert!(registry.contains(&guid));
    }
}
