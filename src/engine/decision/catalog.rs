use std::collections::HashMap;

use crate::engine::types::{ConceptId, Resource, ResourceKind};

/// Resources grouped by concept, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    by_concept: HashMap<ConceptId, Vec<Resource>>,
    locations: HashMap<String, (ConceptId, usize)>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut catalog = Self::new();
        for resource in resources {
            catalog.insert(resource);
        }
        catalog
    }

    /// Adds a resource. A resource with an existing id replaces the old entry.
    pub fn insert(&mut self, resource: Resource) {
        if let Some((concept_id, idx)) = self.locations.get(&resource.id).cloned() {
            if concept_id == resource.concept_id {
                if let Some(slot) = self
                    .by_concept
                    .get_mut(&concept_id)
                    .and_then(|list| list.get_mut(idx))
                {
                    *slot = resource;
                    return;
                }
            }
            self.remove(&resource.id);
        }

        let list = self.by_concept.entry(resource.concept_id.clone()).or_default();
        self.locations.insert(
            resource.id.clone(),
            (resource.concept_id.clone(), list.len()),
        );
        list.push(resource);
    }

    pub fn remove(&mut self, resource_id: &str) -> Option<Resource> {
        let (concept_id, idx) = self.locations.remove(resource_id)?;
        let list = self.by_concept.get_mut(&concept_id)?;
        let removed = list.remove(idx);
        for (i, r) in list.iter().enumerate().skip(idx) {
            self.locations.insert(r.id.clone(), (concept_id.clone(), i));
        }
        Some(removed)
    }

    pub fn candidates(&self, concept_id: &str) -> &[Resource] {
        self.by_concept
            .get(concept_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, resource_id: &str) -> Option<&Resource> {
        let (concept_id, idx) = self.locations.get(resource_id)?;
        self.by_concept.get(concept_id)?.get(*idx)
    }

    pub fn kind_of(&self, resource_id: &str) -> Option<ResourceKind> {
        self.get(resource_id).map(|r| r.kind)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// All resources, grouped by concept. Concept order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.by_concept.values().flatten()
    }
}
