//! Canonical entity instance.
//!
//! # Responsibility
//! - Hold everything currently known about one real-world entity.
//! - Carry the per-entity lock and single-flight slots used by the resolver.
//!
//! # Invariants
//! - `kind` and `id` never change after construction.
//! - The handle and the authorization context are set at most once.
//! - Known fields are only ever overwritten by an equal-or-newer generation and
//!   never removed.
//!
//! # See also
//! - crate::resolver for the merge and fetch rules.

use crate::capability::{Capability, CapabilityGate};
use crate::flight::Flight;
use crate::model::auth::AuthContext;
use crate::model::schema::EntityKind;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Kind-scoped primary key assigned by the remote API.
pub type EntityId = u64;

/// Field name to value, as decoded by the transport collaborator.
pub type FieldMap = Map<String, Value>;

/// Either of the two keys an entity can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Id(EntityId),
    Handle(String),
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id={id}"),
            Self::Handle(handle) => write!(f, "handle={handle}"),
        }
    }
}

impl From<EntityId> for EntityKey {
    fn from(value: EntityId) -> Self {
        Self::Id(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Handle(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Handle(value)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct KnownField {
    pub(crate) value: Value,
    pub(crate) generation: u64,
}

/// Single-flight slot; holds the generation of the fetch that filled it.
pub(crate) type GroupSlot = Arc<Flight<u64>>;
/// Single-flight slot for one relation listing; members are kept as ids only.
pub(crate) type RelationSlot = Arc<Flight<Vec<EntityId>>>;

#[derive(Debug, Default)]
pub(crate) struct EntityState {
    pub(crate) fields: HashMap<String, KnownField>,
    /// Stale field name to the generation current when it was invalidated.
    pub(crate) stale: HashMap<String, u64>,
    pub(crate) groups: HashMap<&'static str, GroupSlot>,
    pub(crate) relations: HashMap<&'static str, RelationSlot>,
}

impl EntityState {
    /// Known value that is not marked stale.
    pub(crate) fn fresh_value(&self, field: &str) -> Option<Value> {
        if self.stale.contains_key(field) {
            return None;
        }
        self.fields.get(field).map(|known| known.value.clone())
    }

    pub(crate) fn is_group_loaded(&self, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|slot| slot.value().is_some())
    }

    pub(crate) fn group_slot(&mut self, group: &'static str) -> GroupSlot {
        self.groups.entry(group).or_default().clone()
    }

    /// Drops `slot` once it failed, unless it was already replaced.
    pub(crate) fn forget_failed_group(&mut self, group: &'static str, slot: &GroupSlot) {
        if slot.has_failed()
            && self
                .groups
                .get(group)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            self.groups.remove(group);
        }
    }

    pub(crate) fn relation_slot(&mut self, relation: &'static str) -> RelationSlot {
        self.relations.entry(relation).or_default().clone()
    }

    /// Drops `slot` once it failed, unless it was already replaced.
    pub(crate) fn forget_failed_relation(&mut self, relation: &'static str, slot: &RelationSlot) {
        if slot.has_failed()
            && self
                .relations
                .get(relation)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            self.relations.remove(relation);
        }
    }

    /// Marks `field` stale as of `generation`; only a fetch issued later
    /// makes it fresh again.
    pub(crate) fn mark_stale(&mut self, field: &str, generation: u64) {
        self.stale.insert(field.to_string(), generation);
    }

    /// Records a group filled outside its slot (listing payloads).
    ///
    /// An existing slot is left alone: it is either already filled or owned by
    /// an in-flight fetch that will fill it.
    pub(crate) fn mark_group_loaded(&mut self, group: &'static str, generation: u64) {
        self.groups
            .entry(group)
            .or_insert_with(|| Arc::new(Flight::landed(generation)));
    }

    /// Applies a validated payload; returns how many fields were written.
    ///
    /// A written field stays stale when the payload was fetched before the
    /// field was invalidated.
    pub(crate) fn merge(&mut self, fields: FieldMap, generation: u64) -> usize {
        let mut written = 0;
        for (name, value) in fields {
            let newer = self
                .fields
                .get(&name)
                .map_or(true, |known| known.generation <= generation);
            if !newer {
                continue;
            }
            if self
                .stale
                .get(&name)
                .is_some_and(|invalidated| *invalidated < generation)
            {
                self.stale.remove(&name);
            }
            self.fields.insert(name, KnownField { value, generation });
            written += 1;
        }
        written
    }
}

/// The single registry-owned instance representing one real-world entity.
pub struct Entity {
    kind: EntityKind,
    id: EntityId,
    handle: OnceCell<String>,
    auth: OnceCell<AuthContext>,
    state: Mutex<EntityState>,
}

impl Entity {
    pub(crate) fn stub(kind: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            id,
            handle: OnceCell::new(),
            auth: OnceCell::new(),
            state: Mutex::new(EntityState::default()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Secondary key, once known.
    pub fn handle(&self) -> Option<&str> {
        self.handle.get().map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&AuthContext> {
        self.auth.get()
    }

    /// Current value without triggering any fetch. Stale values are returned;
    /// self-scoped values only to an entity holding its own authorization.
    pub fn peek(&self, field: &str) -> Option<Value> {
        if !CapabilityGate::authorized_for(self, &Capability::Field(field)) {
            return None;
        }
        self.state
            .lock()
            .fields
            .get(field)
            .map(|known| known.value.clone())
    }

    /// Names of all known fields, sorted.
    pub fn known_fields(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().fields.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_group_loaded(&self, group: &str) -> bool {
        self.state.lock().is_group_loaded(group)
    }

    pub fn is_stale(&self, field: &str) -> bool {
        self.state.lock().stale.contains_key(field)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock()
    }

    /// Sets the handle once; returns the handle already held on conflict.
    pub(crate) fn set_handle(&self, handle: &str) -> Result<(), String> {
        let current = self.handle.get_or_init(|| handle.to_string());
        if current == handle {
            Ok(())
        } else {
            Err(current.clone())
        }
    }

    /// Attaches `auth` unless a context is already attached.
    ///
    /// Returns `true` when this call attached it.
    pub(crate) fn attach_authorization(&self, auth: AuthContext) -> bool {
        self.auth.set(auth).is_ok()
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("handle", &self.handle.get())
            .field("authorized", &self.auth.get().is_some())
            .finish_non_exhaustive()
    }
}
