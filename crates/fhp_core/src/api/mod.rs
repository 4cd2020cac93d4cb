//! Collaborator contract for the remote API client.
//!
//! # Responsibility
//! - Describe the three fetch/act capabilities core consumes from transport.
//! - Keep HTTP, JSON decoding and rate limiting outside core.
//!
//! # Invariants
//! - Implementations are shared across threads and must be `Send + Sync`.
//! - A call either returns a complete payload or an error; core never sees
//!   partial responses.

use crate::model::auth::AuthContext;
use crate::model::entity::{EntityId, EntityKey, FieldMap};
use crate::model::schema::{ActionKind, AttributeGroup, EntityKind, RelationSpec};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ApiResult<T> = Result<T, ApiError>;

/// Decoded attributes returned by one group fetch.
pub type GroupPayload = FieldMap;

/// Collaborator failure, opaque to core beyond these two cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound,
    Transport(String),
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "resource not found"),
            Self::Transport(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ApiError {}

/// One member returned by a listing or search call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub id: EntityId,
    pub handle: Option<String>,
    /// Partial attributes, shaped like the relation's listing group.
    pub attributes: FieldMap,
}

impl ListingEntry {
    pub fn new(id: EntityId, handle: Option<&str>, attributes: FieldMap) -> Self {
        Self {
            id,
            handle: handle.map(str::to_string),
            attributes,
        }
    }
}

/// Remote API capabilities consumed by the registry and resolver.
pub trait ApiClient: Send + Sync {
    /// Fetches one attribute group of one entity.
    fn fetch_entity(
        &self,
        kind: EntityKind,
        key: &EntityKey,
        group: &AttributeGroup,
        auth: Option<&AuthContext>,
    ) -> ApiResult<GroupPayload>;

    /// Lists the members of `relation` in source order.
    fn fetch_relationship(
        &self,
        kind: EntityKind,
        id: EntityId,
        relation: &RelationSpec,
        auth: Option<&AuthContext>,
    ) -> ApiResult<Vec<ListingEntry>>;

    /// Performs a self-scoped action on behalf of `auth`'s owner.
    ///
    /// Returns `true` once the target is in the requested state, including
    /// when it already was.
    fn perform_action(
        &self,
        action: ActionKind,
        target: EntityId,
        auth: &AuthContext,
    ) -> ApiResult<bool>;

    /// Free-text search; entries carry the kind's `summary` group.
    fn search(&self, kind: EntityKind, term: &str) -> ApiResult<Vec<ListingEntry>>;
}
