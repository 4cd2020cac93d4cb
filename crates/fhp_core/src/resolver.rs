//! Lazy attribute completion and additive merge.
//!
//! # Responsibility
//! - Serve known fields without I/O.
//! - Pick and fetch the one attribute group that completes a missing field.
//! - Validate payloads before any field of any entity is written.
//!
//! # Invariants
//! - At most one fetch per `(entity, group)` is in flight; concurrent callers
//!   wait on the same slot and share its outcome, failures included.
//! - A payload only writes fields of the group it was fetched as (plus the
//!   handle field).
//! - A rejected payload leaves every entity untouched.
//! - The entity lock is never held across a collaborator call.

use crate::api::ListingEntry;
use crate::capability::{Capability, CapabilityGate};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{Entity, EntityId, EntityKey, EntityState, FieldMap};
use crate::model::schema::{AttributeGroup, EntityKind, FieldScope, ID_FIELD};
use crate::registry::key_index::normalize_handle;
use crate::registry::EntityRegistry;
use log::{debug, error};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

/// Payload checked against known identity, ready to be applied.
#[derive(Debug)]
pub(crate) struct PreparedMerge {
    pub(crate) id: EntityId,
    pub(crate) handle: Option<String>,
    pub(crate) fields: FieldMap,
}

pub struct AttributeResolver<'r> {
    registry: &'r EntityRegistry,
}

impl<'r> AttributeResolver<'r> {
    pub fn new(registry: &'r EntityRegistry) -> Self {
        Self { registry }
    }

    /// Whether `field` is defined for the kind and readable through `entity`.
    pub fn probe(&self, entity: &Entity, field: &str) -> bool {
        CapabilityGate::authorized_for(entity, &Capability::Field(field))
    }

    /// Returns `field`, fetching one group when it is missing or stale.
    ///
    /// # Errors
    /// - `NoSuchAttribute` when the kind lacks the field or no remaining
    ///   group delivers it.
    /// - `NotAuthorized` for self-scoped fields, before any I/O.
    /// - `NotFound` / `TransportFailure` from the fetch.
    pub fn ensure(&self, entity: &Entity, field: &str) -> CoreResult<Value> {
        if field == ID_FIELD {
            return Ok(Value::from(entity.id()));
        }
        CapabilityGate::require(entity, &Capability::Field(field))?;

        let (group, slot) = {
            let mut state = entity.state();
            if let Some(value) = state.fresh_value(field) {
                return Ok(value);
            }
            match select_group(entity, &state, field) {
                Some(group) => (group, state.group_slot(group.name)),
                None => {
                    // Nothing left to fetch; a stale value beats no value.
                    return state
                        .fields
                        .get(field)
                        .map(|known| known.value.clone())
                        .ok_or_else(|| CoreError::no_such_attribute(entity.kind(), field));
                }
            }
        };

        let outcome = slot.run(|| self.fetch_group(entity, group));
        let mut state = entity.state();
        if let Err(err) = outcome {
            state.forget_failed_group(group.name, &slot);
            return Err(err);
        }
        state
            .fields
            .get(field)
            .map(|known| known.value.clone())
            .ok_or_else(|| CoreError::no_such_attribute(entity.kind(), field))
    }

    /// Merges listing entries of `kind`, shaped like `group`.
    ///
    /// Every entry is validated before any is applied; returns the canonical
    /// members in listing order.
    pub fn merge_listing(
        &self,
        kind: EntityKind,
        entries: Vec<ListingEntry>,
        group: &'static AttributeGroup,
        generation: u64,
    ) -> CoreResult<Vec<Arc<Entity>>> {
        let mut prepared = Vec::with_capacity(entries.len());
        let mut seen_handles: HashMap<String, EntityId> = HashMap::new();
        for entry in entries {
            let mut merge = self.prepare(kind, Some(entry.id), entry.attributes, group)?;
            if let Some(listed) = entry.handle.as_deref() {
                let listed =
                    normalize_handle(listed).map_err(|_| malformed(kind, "listed handle is not valid"))?;
                match merge.handle.as_deref() {
                    Some(carried) if carried != listed => {
                        return Err(malformed(
                            kind,
                            format!("entry id={} carries two different handles", merge.id),
                        ))
                    }
                    Some(_) => {}
                    None => {
                        self.check_handle(kind, merge.id, &listed)?;
                        merge.handle = Some(listed);
                    }
                }
            }
            if let Some(handle) = merge.handle.as_deref() {
                let owner = *seen_handles.entry(handle.to_string()).or_insert(merge.id);
                if owner != merge.id {
                    return Err(malformed(
                        kind,
                        format!("listing binds one handle to id={owner} and id={}", merge.id),
                    ));
                }
            }
            prepared.push(merge);
        }

        // Bind every handle up front so a conflict found now writes nothing.
        let pairs: Vec<(EntityId, String)> = prepared
            .iter()
            .filter_map(|merge| merge.handle.clone().map(|handle| (merge.id, handle)))
            .collect();
        self.registry.key_index(kind).bind_all(&pairs)?;

        let mut members = Vec::with_capacity(prepared.len());
        for merge in prepared {
            let entity = self.registry.register(kind, merge.id);
            self.apply(&entity, merge, generation, group.name, true)?;
            members.push(entity);
        }
        Ok(members)
    }

    /// Checks a payload of `kind` against known identity without writing.
    ///
    /// `expected` is the id the payload was requested for, if known. Fields
    /// outside `group` are dropped.
    pub(crate) fn prepare(
        &self,
        kind: EntityKind,
        expected: Option<EntityId>,
        mut payload: FieldMap,
        group: &AttributeGroup,
    ) -> CoreResult<PreparedMerge> {
        let schema = kind.schema();
        let id = match payload.remove(ID_FIELD) {
            Some(value) => value
                .as_u64()
                .ok_or_else(|| malformed(kind, "id is not an unsigned integer"))?,
            None => expected.ok_or_else(|| malformed(kind, "payload carries no id"))?,
        };
        if let Some(expected) = expected {
            if expected != id {
                return Err(malformed(
                    kind,
                    format!("payload id={id} does not match requested id={expected}"),
                ));
            }
        }

        let carried = schema
            .secondary_key_field
            .and_then(|field| payload.get(field))
            .filter(|value| !value.is_null());
        let handle = match carried {
            None => None,
            Some(value) => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| malformed(kind, "handle is not a string"))?;
                let handle =
                    normalize_handle(raw).map_err(|_| malformed(kind, "handle is not valid"))?;
                self.check_handle(kind, id, &handle)?;
                Some(handle)
            }
        };

        payload.retain(|name, _| {
            group.supplies(name) || schema.secondary_key_field == Some(name.as_str())
        });
        Ok(PreparedMerge {
            id,
            handle,
            fields: payload,
        })
    }

    /// Rejects a handle that contradicts what is already known about `id`.
    pub(crate) fn check_handle(&self, kind: EntityKind, id: EntityId, handle: &str) -> CoreResult<()> {
        let keys = self.registry.key_index(kind);
        if let Some(bound) = keys.resolve(handle) {
            if bound != id {
                return Err(malformed(
                    kind,
                    format!("handle already belongs to id={bound}, not id={id}"),
                ));
            }
        }
        match keys.handle_of(id) {
            Some(existing) if existing != handle => Err(malformed(
                kind,
                format!("id={id} already has a different handle"),
            )),
            _ => Ok(()),
        }
    }

    /// Writes a prepared payload into `entity`.
    ///
    /// `mark_loaded` records `group` as loaded for payloads that did not come
    /// through the group's own slot.
    pub(crate) fn apply(
        &self,
        entity: &Entity,
        prepared: PreparedMerge,
        generation: u64,
        group: &'static str,
        mark_loaded: bool,
    ) -> CoreResult<usize> {
        if let Some(handle) = prepared.handle.as_deref() {
            self.registry
                .bind_handle(entity, handle)
                .map_err(CoreError::TransportFailure)?;
        }
        let written = {
            let mut state = entity.state();
            let written = state.merge(prepared.fields, generation);
            if mark_loaded {
                state.mark_group_loaded(group, generation);
            }
            written
        };
        debug!(
            "event=group_merge module=resolver status=ok kind={} id={} group={} generation={} written={}",
            entity.kind().as_str(),
            entity.id(),
            group,
            generation,
            written
        );
        Ok(written)
    }

    fn fetch_group(&self, entity: &Entity, group: &'static AttributeGroup) -> CoreResult<u64> {
        let started_at = Instant::now();
        let kind = entity.kind();
        debug!(
            "event=group_fetch module=resolver status=start kind={} id={} group={}",
            kind.as_str(),
            entity.id(),
            group.name
        );

        let key = EntityKey::Id(entity.id());
        let generation = self.registry.next_generation();
        let result = self
            .registry
            .api()
            .fetch_entity(kind, &key, group, entity.authorization())
            .map_err(|err| CoreError::from_api(err, kind, key.clone()))
            .and_then(|payload| {
                let prepared = self.prepare(kind, Some(entity.id()), payload, group)?;
                self.apply(entity, prepared, generation, group.name, false)
            });

        match &result {
            Ok(written) => debug!(
                "event=group_fetch module=resolver status=ok kind={} id={} group={} written={} duration_ms={}",
                kind.as_str(),
                entity.id(),
                group.name,
                written,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=group_fetch module=resolver status=error kind={} id={} group={} duration_ms={} error_code={}",
                kind.as_str(),
                entity.id(),
                group.name,
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result.map(|_| generation)
    }
}

/// Picks the group to fetch for `field`.
///
/// Candidates are direct, unloaded and readable groups declaring the field.
/// Preference: some fields already known, then lowest cost, then declaration
/// order.
fn select_group(
    entity: &Entity,
    state: &EntityState,
    field: &str,
) -> Option<&'static AttributeGroup> {
    let own_auth = CapabilityGate::holds_own_authorization(entity);
    entity
        .kind()
        .schema()
        .groups
        .iter()
        .enumerate()
        .filter(|(_, group)| group.is_direct() && group.supplies(field))
        .filter(|(_, group)| !state.is_group_loaded(group.name))
        .filter(|(_, group)| group.scope == FieldScope::Public || own_auth)
        .min_by_key(|(index, group)| {
            let partial = group
                .fields
                .iter()
                .any(|name| *name != field && state.fields.contains_key(*name));
            (!partial, group.cost, *index)
        })
        .map(|(_, group)| group)
}

fn malformed(kind: EntityKind, detail: impl Display) -> CoreError {
    CoreError::TransportFailure(format!("malformed {} payload: {detail}", kind.as_str()))
}
