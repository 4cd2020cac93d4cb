//! Core error taxonomy.
//!
//! # Invariants
//! - `NotFound` and `TransportFailure` carry collaborator failures unchanged in
//!   meaning; callers can always branch on the variant.
//! - Capability probes never produce these errors; only value accessors and
//!   actions do.

use crate::api::ApiError;
use crate::model::entity::{EntityId, EntityKey};
use crate::model::schema::EntityKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The key resolves to nothing at the source.
    NotFound { kind: EntityKind, key: EntityKey },
    /// The field or relation is undefined for the kind, or no group supplies it.
    NoSuchAttribute { kind: EntityKind, name: String },
    /// Self-scoped field, relation or action without a matching context.
    NotAuthorized {
        kind: EntityKind,
        id: EntityId,
        capability: String,
    },
    /// Collaborator I/O failure or a payload rejected by the merge.
    TransportFailure(String),
    /// Malformed request: missing key, invalid handle, wrong target kind.
    InvalidLookup(String),
    /// Known value that does not have the requested shape.
    InvalidValue { name: String, message: String },
}

impl CoreError {
    /// Maps a collaborator error raised while resolving `key`.
    pub(crate) fn from_api(err: ApiError, kind: EntityKind, key: EntityKey) -> Self {
        match err {
            ApiError::NotFound => Self::NotFound { kind, key },
            ApiError::Transport(message) => Self::TransportFailure(message),
        }
    }

    pub(crate) fn no_such_attribute(kind: EntityKind, name: &str) -> Self {
        Self::NoSuchAttribute {
            kind,
            name: name.to_string(),
        }
    }

    /// Short stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoSuchAttribute { .. } => "no_such_attribute",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::TransportFailure(_) => "transport_failure",
            Self::InvalidLookup(_) => "invalid_lookup",
            Self::InvalidValue { .. } => "invalid_value",
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, key } => write!(f, "{} not found: {key}", kind.as_str()),
            Self::NoSuchAttribute { kind, name } => {
                write!(f, "{} has no attribute `{name}`", kind.as_str())
            }
            Self::NotAuthorized {
                kind,
                id,
                capability,
            } => write!(
                f,
                "not authorized for `{capability}` on {} id={id}",
                kind.as_str()
            ),
            Self::TransportFailure(message) => write!(f, "transport failure: {message}"),
            Self::InvalidLookup(message) => write!(f, "invalid lookup: {message}"),
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for `{name}`: {message}")
            }
        }
    }
}

impl Error for CoreError {}
