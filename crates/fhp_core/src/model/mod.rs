//! Domain model for lazily-loaded remote entities.
//!
//! # Responsibility
//! - Define the canonical entity instance and its keys.
//! - Declare per-kind attribute groups, relations and actions.
//! - Define the authorization context consumed from the auth collaborator.
//!
//! # Invariants
//! - Every entity is identified by `(EntityKind, EntityId)`.
//! - Entities are never deleted for the lifetime of their registry.

pub mod auth;
pub mod entity;
pub mod schema;
