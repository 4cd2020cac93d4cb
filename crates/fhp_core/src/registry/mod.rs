//! Identity map and key indexes.

pub mod entity_registry;
pub mod key_index;

pub use entity_registry::{ActionTarget, EntityRegistry};
pub use key_index::{normalize_handle, KeyIndex};
