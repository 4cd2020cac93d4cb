//! Ordered view over the members of one relation or search result.
//!
//! # Invariants
//! - Members are canonical registry instances, in listing order, without
//!   duplicate ids.
//! - Lookup by id or by handle returns the same instance as iteration.

use crate::handle::EntityHandle;
use crate::model::entity::{Entity, EntityId, EntityKey};
use crate::model::schema::EntityKind;
use crate::registry::EntityRegistry;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub struct RelationshipCollection {
    registry: EntityRegistry,
    name: &'static str,
    target: EntityKind,
    members: Vec<Arc<Entity>>,
    positions: HashMap<EntityId, usize>,
}

impl RelationshipCollection {
    pub(crate) fn new(
        registry: EntityRegistry,
        name: &'static str,
        target: EntityKind,
        listed: Vec<Arc<Entity>>,
    ) -> Self {
        let mut members = Vec::with_capacity(listed.len());
        let mut positions = HashMap::with_capacity(listed.len());
        for entity in listed {
            if positions.contains_key(&entity.id()) {
                continue;
            }
            positions.insert(entity.id(), members.len());
            members.push(entity);
        }
        Self {
            registry,
            name,
            target,
            members,
            positions,
        }
    }

    /// Relation name, or `search` for search results.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target_kind(&self) -> EntityKind {
        self.target
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: impl Into<EntityKey>) -> bool {
        self.position(&key.into()).is_some()
    }

    pub fn get(&self, key: impl Into<EntityKey>) -> Option<EntityHandle> {
        self.position(&key.into()).map(|index| self.wrap(index))
    }

    pub fn get_by_id(&self, id: EntityId) -> Option<EntityHandle> {
        self.get(EntityKey::Id(id))
    }

    pub fn get_by_handle(&self, handle: &str) -> Option<EntityHandle> {
        self.get(EntityKey::Handle(handle.to_string()))
    }

    /// Members in listing order.
    pub fn iter(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        (0..self.members.len()).map(move |index| self.wrap(index))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.members.iter().map(|member| member.id()).collect()
    }

    fn position(&self, key: &EntityKey) -> Option<usize> {
        match key {
            EntityKey::Id(id) => self.positions.get(id).copied(),
            EntityKey::Handle(handle) => {
                let handle = handle.trim();
                // Handles can be learned after listing, so fall back to members.
                self.registry
                    .key_index(self.target)
                    .resolve(handle)
                    .and_then(|id| self.positions.get(&id).copied())
                    .or_else(|| {
                        self.members
                            .iter()
                            .position(|member| member.handle() == Some(handle))
                    })
            }
        }
    }

    fn wrap(&self, index: usize) -> EntityHandle {
        EntityHandle::new(self.registry.clone(), Arc::clone(&self.members[index]))
    }
}

impl Debug for RelationshipCollection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipCollection")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("ids", &self.ids())
            .finish()
    }
}
