//! Authorization gate for self-scoped fields, relations and actions.
//!
//! # Responsibility
//! - Answer "would this be permitted?" without ever failing.
//! - Turn the same answer into a typed `NotAuthorized` for value accessors.
//!
//! # Invariants
//! - Denied by default: self-scoped capabilities need an authorization context
//!   whose owner is the entity itself.
//! - The gate never performs I/O.

use crate::error::{CoreError, CoreResult};
use crate::model::entity::Entity;
use crate::model::schema::{ActionKind, EntityKind, FieldScope};
use log::warn;
use std::fmt::{Display, Formatter};

/// Something a caller may want to read or do through an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability<'a> {
    Field(&'a str),
    Relation(&'a str),
    Action(ActionKind),
}

impl Capability<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Field(name) | Self::Relation(name) => name,
            Self::Action(action) => action.as_str(),
        }
    }
}

impl Display for Capability<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => write!(f, "field:{name}"),
            Self::Relation(name) => write!(f, "relation:{name}"),
            Self::Action(action) => write!(f, "action:{}", action.as_str()),
        }
    }
}

pub struct CapabilityGate;

impl CapabilityGate {
    /// Scope of `capability` on `kind`, or `None` when the kind lacks it.
    pub fn scope(kind: EntityKind, capability: &Capability<'_>) -> Option<FieldScope> {
        let schema = kind.schema();
        match capability {
            Capability::Field(name) => schema.field_scope(name),
            Capability::Relation(name) => schema.relation(name).map(|relation| relation.scope),
            Capability::Action(action) => schema.action_scope(*action),
        }
    }

    /// Non-failing probe. Undefined capabilities report `false`.
    pub fn authorized_for(entity: &Entity, capability: &Capability<'_>) -> bool {
        match Self::scope(entity.kind(), capability) {
            None => false,
            Some(FieldScope::Public) => true,
            Some(FieldScope::SelfOnly) => Self::holds_own_authorization(entity),
        }
    }

    /// Checks `capability` for a value access or an action.
    ///
    /// # Errors
    /// - `NoSuchAttribute` when the kind does not define the capability.
    /// - `NotAuthorized` when it is self-scoped and the entity does not hold
    ///   its own authorization context.
    pub fn require(entity: &Entity, capability: &Capability<'_>) -> CoreResult<()> {
        match Self::scope(entity.kind(), capability) {
            None => Err(CoreError::no_such_attribute(
                entity.kind(),
                capability.name(),
            )),
            Some(FieldScope::Public) => Ok(()),
            Some(FieldScope::SelfOnly) if Self::holds_own_authorization(entity) => Ok(()),
            Some(FieldScope::SelfOnly) => {
                warn!(
                    "event=capability_denied module=capability status=error kind={} id={} capability={}",
                    entity.kind().as_str(),
                    entity.id(),
                    capability
                );
                Err(CoreError::NotAuthorized {
                    kind: entity.kind(),
                    id: entity.id(),
                    capability: capability.to_string(),
                })
            }
        }
    }

    /// Whether the entity carries an authorization context issued for itself.
    pub fn holds_own_authorization(entity: &Entity) -> bool {
        entity
            .authorization()
            .is_some_and(|auth| auth.grants(entity.id()))
    }
}
