//! Core object model for the photo-community client.
//! Canonical entities, lazy attribute completion and authorization gating live
//! here; HTTP transport is supplied by the host through `ApiClient`.

pub mod api;
pub mod capability;
pub mod error;
mod flight;
pub mod handle;
pub mod logging;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod resolver;
pub mod settings;

pub use api::{ApiClient, ApiError, ApiResult, GroupPayload, ListingEntry};
pub use capability::{Capability, CapabilityGate};
pub use error::{CoreError, CoreResult};
pub use handle::EntityHandle;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::auth::AuthContext;
pub use model::entity::{Entity, EntityId, EntityKey, FieldMap};
pub use model::schema::{ActionKind, AttributeGroup, EntityKind, FieldScope, RelationSpec};
pub use registry::{normalize_handle, ActionTarget, EntityRegistry, KeyIndex};
pub use relationship::RelationshipCollection;
pub use resolver::AttributeResolver;
pub use settings::{LogSettings, Settings, SettingsError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
