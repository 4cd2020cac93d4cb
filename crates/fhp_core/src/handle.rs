//! Caller-facing reference to a canonical entity.
//!
//! # Responsibility
//! - Pair an entity with the registry that owns it, so every accessor can
//!   complete missing fields lazily.
//!
//! # Invariants
//! - Cloning a handle never clones the entity; `is_same` compares instances.

use crate::capability::{Capability, CapabilityGate};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::Entity;
use crate::registry::{ActionTarget, EntityRegistry};
use crate::relationship::RelationshipCollection;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone)]
pub struct EntityHandle {
    registry: EntityRegistry,
    entity: Arc<Entity>,
}

impl EntityHandle {
    pub(crate) fn new(registry: EntityRegistry, entity: Arc<Entity>) -> Self {
        Self { registry, entity }
    }

    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Identity comparison; two handles are the same only when they share the
    /// canonical instance.
    pub fn is_same(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }

    /// Whether this entity holds its own authorization context.
    pub fn is_authorized(&self) -> bool {
        CapabilityGate::holds_own_authorization(&self.entity)
    }

    /// Value of `field`, completed from the source when missing or stale.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        self.registry.ensure(&self.entity, field)
    }

    /// Typed variant of `get`.
    ///
    /// # Errors
    /// - `InvalidValue` when the value does not deserialize into `T`.
    /// - Everything `get` can return.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> CoreResult<T> {
        let value = self.get(field)?;
        serde_json::from_value(value).map_err(|err| CoreError::InvalidValue {
            name: field.to_string(),
            message: err.to_string(),
        })
    }

    /// Non-failing field probe; performs no I/O.
    pub fn has_field(&self, field: &str) -> bool {
        self.registry.has_field(&self.entity, field)
    }

    /// Non-failing capability probe; performs no I/O.
    pub fn can(&self, capability: Capability<'_>) -> bool {
        CapabilityGate::authorized_for(&self.entity, &capability)
    }

    pub fn relationship(&self, name: &str) -> CoreResult<RelationshipCollection> {
        self.registry.relationship(&self.entity, name)
    }

    pub fn invalidate(&self, field: &str) -> CoreResult<()> {
        self.registry.invalidate(&self.entity, field)
    }

    pub fn invalidate_relationship(&self, name: &str) -> CoreResult<()> {
        self.registry.invalidate_relationship(&self.entity, name)
    }

    /// Person handle; served from the key index when already bound.
    pub fn username(&self) -> CoreResult<String> {
        match self.entity.handle() {
            Some(handle) => Ok(handle.to_string()),
            None => self.get_as("username"),
        }
    }

    pub fn affection(&self) -> CoreResult<u64> {
        self.get_as("affection")
    }

    pub fn friends(&self) -> CoreResult<RelationshipCollection> {
        self.relationship("friends")
    }

    pub fn followers(&self) -> CoreResult<RelationshipCollection> {
        self.relationship("followers")
    }

    pub fn blog_posts(&self) -> CoreResult<RelationshipCollection> {
        self.relationship("blog_posts")
    }

    pub fn photos(&self) -> CoreResult<RelationshipCollection> {
        self.relationship("photos")
    }

    /// Own collections; requires this person's authorization.
    pub fn collections(&self) -> CoreResult<RelationshipCollection> {
        self.relationship("collections")
    }

    pub fn favorite(&self, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.registry.favorite(&self.entity, target)
    }

    pub fn unfavorite(&self, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.registry.unfavorite(&self.entity, target)
    }

    pub fn follow(&self, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.registry.follow(&self.entity, target)
    }

    pub fn unfollow(&self, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.registry.unfollow(&self.entity, target)
    }
}

impl Deref for EntityHandle {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

impl Debug for EntityHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("kind", &self.entity.kind())
            .field("id", &self.entity.id())
            .field("handle", &self.entity.handle())
            .finish()
    }
}
