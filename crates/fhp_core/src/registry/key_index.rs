//! Handle → id index for one entity kind.
//!
//! # Responsibility
//! - Map resolved handles to primary keys.
//! - Own the pending slots that make handle resolution single-flight.
//!
//! # Invariants
//! - A handle is bound to at most one id, and an id to at most one handle, for
//!   the index lifetime.
//! - A batch of bindings is checked in full before any of it is recorded.
//! - While a handle is unresolved, every caller gets the same pending slot.
//! - `resolved` is re-checked under the `pending` lock, so a caller never opens
//!   a second slot for a handle that was bound in the meantime.

use crate::error::{CoreError, CoreResult};
use crate::flight::Flight;
use crate::model::entity::EntityId;
use crate::model::schema::EntityKind;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

const HANDLE_MAX_CHARS: usize = 64;

static HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid handle regex"));

/// Trims and validates a handle supplied by a caller or a payload.
pub fn normalize_handle(raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidLookup("handle must not be empty".to_string()));
    }
    if trimmed.chars().count() > HANDLE_MAX_CHARS {
        return Err(CoreError::InvalidLookup(format!(
            "handle exceeds {HANDLE_MAX_CHARS} characters"
        )));
    }
    if !HANDLE_RE.is_match(trimmed) {
        return Err(CoreError::InvalidLookup(format!(
            "handle contains unsupported characters: `{trimmed}`"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) type PendingSlot = Arc<Flight<EntityId>>;

/// Outcome of asking the index for a handle.
pub(crate) enum HandleSlot {
    Resolved(EntityId),
    Pending(PendingSlot),
}

#[derive(Debug, Default)]
struct Bindings {
    ids: HashMap<String, EntityId>,
    handles: HashMap<EntityId, String>,
}

#[derive(Debug)]
pub struct KeyIndex {
    kind: EntityKind,
    resolved: RwLock<Bindings>,
    pending: Mutex<HashMap<String, PendingSlot>>,
}

impl KeyIndex {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            resolved: RwLock::new(Bindings::default()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Id bound to `handle`, if resolution already completed.
    pub fn resolve(&self, handle: &str) -> Option<EntityId> {
        self.resolved.read().ids.get(handle).copied()
    }

    /// Handle bound to `id`, if any.
    pub fn handle_of(&self, id: EntityId) -> Option<String> {
        self.resolved.read().handles.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.resolved.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.read().ids.is_empty()
    }

    /// Number of handles whose resolution is in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Binds `handle` to `id`; rebinding the same pair is a no-op.
    ///
    /// # Errors
    /// - `TransportFailure` when the handle or the id is already bound to
    ///   something else, which means the source contradicted itself.
    pub(crate) fn bind(&self, handle: &str, id: EntityId) -> CoreResult<()> {
        self.bind_all(&[(id, handle.to_string())])
    }

    /// Binds every `(id, handle)` pair, or none of them.
    pub(crate) fn bind_all(&self, pairs: &[(EntityId, String)]) -> CoreResult<()> {
        let mut resolved = self.resolved.write();
        let mut staged_ids: HashMap<&str, EntityId> = HashMap::new();
        let mut staged_handles: HashMap<EntityId, &str> = HashMap::new();
        for (id, handle) in pairs {
            let bound_id = resolved
                .ids
                .get(handle.as_str())
                .or_else(|| staged_ids.get(handle.as_str()));
            if let Some(existing) = bound_id.filter(|existing| *existing != id) {
                return Err(CoreError::TransportFailure(format!(
                    "{} handle `{handle}` already bound to id={existing}, refusing id={id}",
                    self.kind.as_str()
                )));
            }
            let bound_handle = resolved
                .handles
                .get(id)
                .map(String::as_str)
                .or_else(|| staged_handles.get(id).copied());
            if let Some(existing) = bound_handle.filter(|existing| *existing != handle.as_str()) {
                return Err(CoreError::TransportFailure(format!(
                    "{} id={id} already has handle `{existing}`, refusing `{handle}`",
                    self.kind.as_str()
                )));
            }
            staged_ids.insert(handle.as_str(), *id);
            staged_handles.insert(*id, handle.as_str());
        }
        for (id, handle) in pairs {
            resolved.ids.insert(handle.clone(), *id);
            resolved.handles.insert(*id, handle.clone());
        }
        Ok(())
    }

    /// Returns the bound id, or the shared pending slot for `handle`.
    pub(crate) fn pending_slot(&self, handle: &str) -> HandleSlot {
        let mut pending = self.pending.lock();
        if let Some(id) = self.resolve(handle) {
            return HandleSlot::Resolved(id);
        }
        HandleSlot::Pending(pending.entry(handle.to_string()).or_default().clone())
    }

    /// Discards the pending slot once its resolution finished or failed.
    pub(crate) fn finish_pending(&self, handle: &str, slot: &PendingSlot) {
        let mut pending = self.pending.lock();
        if pending
            .get(handle)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            pending.remove(handle);
        }
    }
}
