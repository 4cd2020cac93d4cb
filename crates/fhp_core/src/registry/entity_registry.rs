//! Identity map for all entities reachable through one API client.
//!
//! # Responsibility
//! - Hand out the single canonical instance per `(kind, id)`.
//! - Resolve handles to ids (single-flight per handle).
//! - Own the entry points for relations, search, actions and staleness.
//!
//! # Invariants
//! - At most one `Entity` per `(kind, id)` for the registry lifetime; entries
//!   are never evicted.
//! - The handle index is updated before a handle lookup returns, so a later
//!   lookup by either key observes the same instance.
//! - No registry or entity lock is held across a collaborator call.

use crate::api::{ApiClient, ApiError};
use crate::capability::{Capability, CapabilityGate};
use crate::error::{CoreError, CoreResult};
use crate::handle::EntityHandle;
use crate::model::auth::AuthContext;
use crate::model::entity::{Entity, EntityId, EntityKey};
use crate::model::schema::{ActionKind, EntityKind, RelationSpec, ID_FIELD};
use crate::registry::key_index::{normalize_handle, HandleSlot, KeyIndex};
use crate::relationship::RelationshipCollection;
use crate::resolver::AttributeResolver;
use crate::settings::Settings;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Name given to collections produced by `search`.
const SEARCH_COLLECTION: &str = "search";

struct Shard {
    entities: RwLock<HashMap<EntityId, Arc<Entity>>>,
    keys: KeyIndex,
}

impl Shard {
    fn new(kind: EntityKind) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            keys: KeyIndex::new(kind),
        }
    }
}

struct RegistryInner {
    api: Arc<dyn ApiClient>,
    settings: Settings,
    shards: [Shard; 3],
    generation: AtomicU64,
}

/// Target of a person action: a bare id or an already resolved entity.
#[derive(Debug, Clone)]
pub enum ActionTarget {
    Id(EntityId),
    Entity(Arc<Entity>),
}

impl From<EntityId> for ActionTarget {
    fn from(value: EntityId) -> Self {
        Self::Id(value)
    }
}

impl From<Arc<Entity>> for ActionTarget {
    fn from(value: Arc<Entity>) -> Self {
        Self::Entity(value)
    }
}

impl From<&Arc<Entity>> for ActionTarget {
    fn from(value: &Arc<Entity>) -> Self {
        Self::Entity(Arc::clone(value))
    }
}

impl From<EntityHandle> for ActionTarget {
    fn from(value: EntityHandle) -> Self {
        Self::Entity(Arc::clone(value.entity()))
    }
}

impl From<&EntityHandle> for ActionTarget {
    fn from(value: &EntityHandle) -> Self {
        Self::Entity(Arc::clone(value.entity()))
    }
}

/// Shared identity map. Cloning is cheap and yields the same registry.
#[derive(Clone)]
pub struct EntityRegistry {
    inner: Arc<RegistryInner>,
}

impl EntityRegistry {
    /// Registry in anonymous mode (default settings).
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self::with_settings(api, Settings::default())
    }

    pub fn with_settings(api: Arc<dyn ApiClient>, settings: Settings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                api,
                settings,
                shards: EntityKind::ALL.map(Shard::new),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn key_index(&self, kind: EntityKind) -> &KeyIndex {
        &self.shard(kind).keys
    }

    /// Number of canonical instances of `kind`, stubs included.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.shard(kind).entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Stamps the next fetch; later fetches win overlapping fields.
    pub fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registered instance for `id`, without any I/O.
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<EntityHandle> {
        self.get_entity(kind, id).map(|entity| self.wrap(entity))
    }

    /// Registered instance bound to `handle`, without any I/O.
    pub fn find(&self, kind: EntityKind, handle: &str) -> Option<EntityHandle> {
        let id = self.shard(kind).keys.resolve(handle.trim())?;
        self.get(kind, id)
    }

    /// Looks up by id or handle; see `get_or_create`.
    pub fn lookup(&self, kind: EntityKind, key: impl Into<EntityKey>) -> CoreResult<EntityHandle> {
        match key.into() {
            EntityKey::Id(id) => self.get_or_create(kind, Some(id), None),
            EntityKey::Handle(handle) => self.get_or_create(kind, None, Some(&handle)),
        }
    }

    /// Returns the canonical instance for the given keys.
    ///
    /// An id alone never performs I/O and may return a stub. A handle alone
    /// is resolved through the handle index, fetching the kind's lookup group
    /// on a miss. Both keys bind the handle to the id.
    ///
    /// # Errors
    /// - `InvalidLookup` when no key is given, the handle is malformed, the
    ///   kind has no handles, or the keys contradict known identity.
    /// - `NotFound` / `TransportFailure` from the handle fetch.
    pub fn get_or_create(
        &self,
        kind: EntityKind,
        id: Option<EntityId>,
        handle: Option<&str>,
    ) -> CoreResult<EntityHandle> {
        let entity = match (id, handle) {
            (None, None) => {
                return Err(CoreError::InvalidLookup(format!(
                    "{} lookup needs an id or a handle",
                    kind.as_str()
                )))
            }
            (Some(id), None) => self.register(kind, id),
            (Some(id), Some(raw)) => {
                let handle = self.checked_handle(kind, raw)?;
                self.shard(kind)
                    .keys
                    .bind(&handle, id)
                    .map_err(|err| match err {
                        CoreError::TransportFailure(message) => CoreError::InvalidLookup(message),
                        other => other,
                    })?;
                let entity = self.register(kind, id);
                self.bind_handle(&entity, &handle)
                    .map_err(CoreError::InvalidLookup)?;
                entity
            }
            (None, Some(raw)) => self.resolve_handle(kind, raw)?,
        };
        Ok(self.wrap(entity))
    }

    /// Attaches `auth` to the person it was issued for.
    ///
    /// An already attached context is kept; the new one is ignored.
    ///
    /// # Errors
    /// - `NotAuthorized` when authorized mode is off or `auth` belongs to
    ///   another person.
    /// - `InvalidLookup` for kinds that cannot hold a session.
    pub fn authorize(
        &self,
        kind: EntityKind,
        id: EntityId,
        auth: AuthContext,
    ) -> CoreResult<EntityHandle> {
        let denied = |reason: &str| {
            warn!(
                "event=auth_attach module=registry status=error kind={} id={} reason={}",
                kind.as_str(),
                id,
                reason
            );
            CoreError::NotAuthorized {
                kind,
                id,
                capability: "authorize".to_string(),
            }
        };
        if !self.inner.settings.authorized_mode() {
            return Err(denied("oauth_disabled"));
        }
        if kind != EntityKind::Person {
            return Err(CoreError::InvalidLookup(format!(
                "{} cannot hold an authorization context",
                kind.as_str()
            )));
        }
        if !auth.grants(id) {
            return Err(denied("owner_mismatch"));
        }

        let session_id = auth.session_id();
        let entity = self.register(kind, id);
        if entity.attach_authorization(auth) {
            info!(
                "event=auth_attach module=registry status=ok kind={} id={} session_id={}",
                kind.as_str(),
                id,
                session_id
            );
        } else {
            debug!(
                "event=auth_attach module=registry status=skip kind={} id={} reason=already_attached",
                kind.as_str(),
                id
            );
        }
        Ok(self.wrap(entity))
    }

    /// Value of `field`, fetching the cheapest missing group when needed.
    pub fn ensure(&self, entity: &Entity, field: &str) -> CoreResult<Value> {
        AttributeResolver::new(self).ensure(entity, field)
    }

    /// Non-failing probe: whether `field` could be read through `entity`.
    pub fn has_field(&self, entity: &Entity, field: &str) -> bool {
        AttributeResolver::new(self).probe(entity, field)
    }

    /// Members of `relation`, listed once per entity and then served from the
    /// cached member ids.
    ///
    /// # Errors
    /// - `NoSuchAttribute` for relations the kind does not define.
    /// - `NotAuthorized` for self-scoped relations without own authorization.
    /// - `NotFound` / `TransportFailure` from the listing call.
    pub fn relationship(
        &self,
        entity: &Entity,
        relation: &str,
    ) -> CoreResult<RelationshipCollection> {
        let spec = entity
            .kind()
            .schema()
            .relation(relation)
            .ok_or_else(|| CoreError::no_such_attribute(entity.kind(), relation))?;
        CapabilityGate::require(entity, &Capability::Relation(spec.name))?;

        let slot = entity.state().relation_slot(spec.name);
        let outcome = slot.run(|| self.fetch_members(entity, spec));
        if outcome.is_err() {
            entity.state().forget_failed_relation(spec.name, &slot);
        }
        let members = outcome?
            .iter()
            .map(|id| self.register(spec.target, *id))
            .collect();
        Ok(RelationshipCollection::new(
            self.clone(),
            spec.name,
            spec.target,
            members,
        ))
    }

    /// Free-text search returning canonical entities in result order.
    ///
    /// A term the source knows nothing about yields an empty collection.
    pub fn search(&self, kind: EntityKind, term: &str) -> CoreResult<RelationshipCollection> {
        let term = term.trim();
        if term.is_empty() {
            return Err(CoreError::InvalidLookup(
                "search term must not be empty".to_string(),
            ));
        }
        let group = kind
            .schema()
            .summary_group()
            .ok_or_else(|| CoreError::no_such_attribute(kind, "summary"))?;

        let started_at = Instant::now();
        let generation = self.next_generation();
        let members = match self.inner.api.search(kind, term) {
            Ok(entries) => AttributeResolver::new(self).merge_listing(kind, entries, group, generation),
            Err(ApiError::NotFound) => Ok(Vec::new()),
            Err(ApiError::Transport(message)) => Err(CoreError::TransportFailure(message)),
        };
        match &members {
            Ok(found) => info!(
                "event=relation_fetch module=registry status=ok kind={} relation={} members={} duration_ms={}",
                kind.as_str(),
                SEARCH_COLLECTION,
                found.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=relation_fetch module=registry status=error kind={} relation={} duration_ms={} error_code={}",
                kind.as_str(),
                SEARCH_COLLECTION,
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        Ok(RelationshipCollection::new(
            self.clone(),
            SEARCH_COLLECTION,
            kind,
            members?,
        ))
    }

    pub fn favorite(&self, actor: &Entity, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.perform(actor, ActionKind::Favorite, target.into())
    }

    pub fn unfavorite(&self, actor: &Entity, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.perform(actor, ActionKind::Unfavorite, target.into())
    }

    pub fn follow(&self, actor: &Entity, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.perform(actor, ActionKind::Follow, target.into())
    }

    pub fn unfollow(&self, actor: &Entity, target: impl Into<ActionTarget>) -> CoreResult<bool> {
        self.perform(actor, ActionKind::Unfollow, target.into())
    }

    /// Marks `field` stale so the next `ensure` refetches it.
    ///
    /// The stale value stays readable through `peek` until a fetch issued
    /// after this call replaces it.
    ///
    /// # Errors
    /// - `NoSuchAttribute` for the id field and fields the kind lacks.
    pub fn invalidate(&self, entity: &Entity, field: &str) -> CoreResult<()> {
        if field == ID_FIELD || !entity.kind().schema().has_field(field) {
            return Err(CoreError::no_such_attribute(entity.kind(), field));
        }
        let known = mark_stale(entity, field, self.next_generation());
        info!(
            "event=field_invalidate module=registry status=ok kind={} id={} field={} known={}",
            entity.kind().as_str(),
            entity.id(),
            field,
            known
        );
        Ok(())
    }

    /// Drops cached membership of `relation`; the next access re-lists it.
    pub fn invalidate_relationship(&self, entity: &Entity, relation: &str) -> CoreResult<()> {
        let spec = entity
            .kind()
            .schema()
            .relation(relation)
            .ok_or_else(|| CoreError::no_such_attribute(entity.kind(), relation))?;
        let dropped = entity.state().relations.remove(spec.name).is_some();
        info!(
            "event=field_invalidate module=registry status=ok kind={} id={} relation={} known={}",
            entity.kind().as_str(),
            entity.id(),
            spec.name,
            dropped
        );
        Ok(())
    }

    pub(crate) fn api(&self) -> &dyn ApiClient {
        self.inner.api.as_ref()
    }

    pub(crate) fn get_entity(&self, kind: EntityKind, id: EntityId) -> Option<Arc<Entity>> {
        self.shard(kind).entities.read().get(&id).cloned()
    }

    /// Canonical instance for `id`, creating a stub on first sight.
    pub(crate) fn register(&self, kind: EntityKind, id: EntityId) -> Arc<Entity> {
        let shard = self.shard(kind);
        if let Some(existing) = shard.entities.read().get(&id) {
            return Arc::clone(existing);
        }

        let mut created = false;
        let entity = {
            let mut entities = shard.entities.write();
            Arc::clone(entities.entry(id).or_insert_with(|| {
                created = true;
                Arc::new(Entity::stub(kind, id))
            }))
        };
        if created {
            debug!(
                "event=entity_register module=registry status=ok kind={} id={}",
                kind.as_str(),
                id
            );
        }
        entity
    }

    /// Binds `handle` to `entity` in both the entity and the handle index.
    ///
    /// Returns a description of the contradiction when either side already
    /// holds another binding.
    pub(crate) fn bind_handle(&self, entity: &Entity, handle: &str) -> Result<(), String> {
        if let Some(existing) = entity.handle() {
            if existing != handle {
                return Err(format!(
                    "{} id={} already has handle `{existing}`, refusing `{handle}`",
                    entity.kind().as_str(),
                    entity.id()
                ));
            }
        }
        let keys = &self.shard(entity.kind()).keys;
        keys.bind(handle, entity.id())
            .map_err(|err| err.to_string())?;
        entity.set_handle(handle).map_err(|existing| {
            format!(
                "{} id={} already has handle `{existing}`, refusing `{handle}`",
                entity.kind().as_str(),
                entity.id()
            )
        })
    }

    fn shard(&self, kind: EntityKind) -> &Shard {
        &self.inner.shards[kind.slot()]
    }

    fn wrap(&self, entity: Arc<Entity>) -> EntityHandle {
        EntityHandle::new(self.clone(), entity)
    }

    fn checked_handle(&self, kind: EntityKind, raw: &str) -> CoreResult<String> {
        if kind.schema().secondary_key_field.is_none() {
            return Err(CoreError::InvalidLookup(format!(
                "{} has no handle",
                kind.as_str()
            )));
        }
        normalize_handle(raw)
    }

    fn resolve_handle(&self, kind: EntityKind, raw: &str) -> CoreResult<Arc<Entity>> {
        let handle = self.checked_handle(kind, raw)?;
        let keys = &self.shard(kind).keys;
        let slot = match keys.pending_slot(&handle) {
            HandleSlot::Resolved(id) => return Ok(self.register(kind, id)),
            HandleSlot::Pending(slot) => slot,
        };

        let outcome = slot.run(|| self.fetch_by_handle(kind, &handle));
        keys.finish_pending(&handle, &slot);
        outcome.map(|id| self.register(kind, id))
    }

    fn fetch_by_handle(&self, kind: EntityKind, handle: &str) -> CoreResult<EntityId> {
        let started_at = Instant::now();
        let schema = kind.schema();
        let group = schema
            .group(schema.lookup_group)
            .ok_or_else(|| CoreError::no_such_attribute(kind, schema.lookup_group))?;
        info!(
            "event=key_resolve module=registry status=start kind={} group={}",
            kind.as_str(),
            group.name
        );

        let key = EntityKey::Handle(handle.to_string());
        let generation = self.next_generation();
        let result = self
            .inner
            .api
            .fetch_entity(kind, &key, group, None)
            .map_err(|err| CoreError::from_api(err, kind, key.clone()))
            .and_then(|payload| {
                let resolver = AttributeResolver::new(self);
                let mut prepared = resolver.prepare(kind, None, payload, group)?;
                match prepared.handle.as_deref() {
                    Some(returned) if returned != handle => {
                        return Err(CoreError::TransportFailure(format!(
                            "{} lookup returned another handle for id={}",
                            kind.as_str(),
                            prepared.id
                        )))
                    }
                    Some(_) => {}
                    None => {
                        resolver.check_handle(kind, prepared.id, handle)?;
                        prepared.handle = Some(handle.to_string());
                    }
                }
                let id = prepared.id;
                let entity = self.register(kind, id);
                resolver.apply(&entity, prepared, generation, group.name, true)?;
                Ok(id)
            });

        match &result {
            Ok(id) => info!(
                "event=key_resolve module=registry status=ok kind={} id={} duration_ms={}",
                kind.as_str(),
                id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=key_resolve module=registry status=error kind={} duration_ms={} error_code={}",
                kind.as_str(),
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result
    }

    fn fetch_members(&self, entity: &Entity, spec: &'static RelationSpec) -> CoreResult<Vec<EntityId>> {
        let started_at = Instant::now();
        let group = spec
            .target
            .schema()
            .group(spec.listing_group)
            .ok_or_else(|| CoreError::no_such_attribute(spec.target, spec.listing_group))?;

        let generation = self.next_generation();
        let result = self
            .inner
            .api
            .fetch_relationship(entity.kind(), entity.id(), spec, entity.authorization())
            .map_err(|err| CoreError::from_api(err, entity.kind(), EntityKey::Id(entity.id())))
            .and_then(|entries| {
                AttributeResolver::new(self).merge_listing(spec.target, entries, group, generation)
            })
            .map(|members| members.iter().map(|member| member.id()).collect::<Vec<_>>());

        match &result {
            Ok(ids) => info!(
                "event=relation_fetch module=registry status=ok kind={} id={} relation={} members={} duration_ms={}",
                entity.kind().as_str(),
                entity.id(),
                spec.name,
                ids.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=relation_fetch module=registry status=error kind={} id={} relation={} duration_ms={} error_code={}",
                entity.kind().as_str(),
                entity.id(),
                spec.name,
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result
    }

    fn perform(&self, actor: &Entity, action: ActionKind, target: ActionTarget) -> CoreResult<bool> {
        CapabilityGate::require(actor, &Capability::Action(action))?;
        let auth = actor.authorization().ok_or_else(|| CoreError::NotAuthorized {
            kind: actor.kind(),
            id: actor.id(),
            capability: Capability::Action(action).to_string(),
        })?;

        let target_kind = action.target_kind();
        let target_id = match &target {
            ActionTarget::Id(id) => *id,
            ActionTarget::Entity(entity) if entity.kind() == target_kind => entity.id(),
            ActionTarget::Entity(entity) => {
                return Err(CoreError::InvalidLookup(format!(
                    "{} expects a {} target, got {}",
                    action.as_str(),
                    target_kind.as_str(),
                    entity.kind().as_str()
                )))
            }
        };
        if target_kind == actor.kind() && target_id == actor.id() {
            return Err(CoreError::InvalidLookup(format!(
                "{} cannot target the acting {} itself",
                action.as_str(),
                actor.kind().as_str()
            )));
        }

        let started_at = Instant::now();
        let result = self
            .inner
            .api
            .perform_action(action, target_id, auth)
            .map_err(|err| CoreError::from_api(err, target_kind, EntityKey::Id(target_id)));

        match &result {
            Ok(done) => {
                if let Some(entity) = self.get_entity(target_kind, target_id) {
                    mark_stale(&entity, action.affected_field(), self.next_generation());
                }
                info!(
                    "event=action_perform module=registry status=ok action={} actor_id={} target_id={} session_id={} done={} duration_ms={}",
                    action.as_str(),
                    actor.id(),
                    target_id,
                    auth.session_id(),
                    done,
                    started_at.elapsed().as_millis()
                );
            }
            Err(err) => error!(
                "event=action_perform module=registry status=error action={} actor_id={} target_id={} session_id={} duration_ms={} error_code={}",
                action.as_str(),
                actor.id(),
                target_id,
                auth.session_id(),
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result
    }
}

/// Marks `field` stale as of `generation` and forgets every group supplying
/// it, in-flight ones included.
///
/// Returns whether the field was known.
fn mark_stale(entity: &Entity, field: &str, generation: u64) -> bool {
    let mut state = entity.state();
    let known = state.fields.contains_key(field);
    state.mark_stale(field, generation);
    for group in entity.kind().schema().groups_supplying(field) {
        state.groups.remove(group.name);
    }
    known
}

impl Debug for EntityRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("EntityRegistry");
        for kind in EntityKind::ALL {
            debug.field(kind.as_str(), &self.len(kind));
        }
        debug
            .field("oauth", &self.inner.settings.authorized_mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionTarget, EntityRegistry};
    use crate::api::{ApiClient, ApiError, ApiResult, GroupPayload, ListingEntry};
    use crate::error::CoreError;
    use crate::model::auth::AuthContext;
    use crate::model::entity::{EntityId, EntityKey};
    use crate::model::schema::{ActionKind, AttributeGroup, EntityKind, RelationSpec};
    use crate::settings::Settings;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Knows a single person, `zachaysan` (id 403022).
    #[derive(Default)]
    struct OnePerson {
        fetches: AtomicUsize,
    }

    impl ApiClient for OnePerson {
        fn fetch_entity(
            &self,
            _kind: EntityKind,
            key: &EntityKey,
            _group: &AttributeGroup,
            _auth: Option<&AuthContext>,
        ) -> ApiResult<GroupPayload> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match key {
                EntityKey::Id(403022) => {}
                EntityKey::Handle(handle) if handle == "zachaysan" => {}
                _ => return Err(ApiError::NotFound),
            }
            Ok(json!({"id": 403022, "username": "zachaysan", "affection": 7})
                .as_object()
                .cloned()
                .unwrap_or_default())
        }

        fn fetch_relationship(
            &self,
            _kind: EntityKind,
            _id: EntityId,
            _relation: &RelationSpec,
            _auth: Option<&AuthContext>,
        ) -> ApiResult<Vec<ListingEntry>> {
            Ok(Vec::new())
        }

        fn perform_action(
            &self,
            _action: ActionKind,
            _target: EntityId,
            _auth: &AuthContext,
        ) -> ApiResult<bool> {
            Ok(true)
        }

        fn search(&self, _kind: EntityKind, _term: &str) -> ApiResult<Vec<ListingEntry>> {
            Err(ApiError::NotFound)
        }
    }

    fn registry(settings: Settings) -> (Arc<OnePerson>, EntityRegistry) {
        let api = Arc::new(OnePerson::default());
        let registry = EntityRegistry::with_settings(api.clone(), settings);
        (api, registry)
    }

    #[test]
    fn id_lookup_creates_one_stub_without_io() {
        let (api, registry) = registry(Settings::default());
        let first = registry.lookup(EntityKind::Person, 403022_u64).expect("stub");
        let second = registry.lookup(EntityKind::Person, 403022_u64).expect("stub");
        assert!(first.is_same(&second));
        assert_eq!(registry.len(EntityKind::Person), 1);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_lookup_converges_with_id_lookup() {
        let (api, registry) = registry(Settings::default());
        let by_handle = registry
            .lookup(EntityKind::Person, "zachaysan")
            .expect("handle lookup");
        let by_id = registry.lookup(EntityKind::Person, 403022_u64).expect("id lookup");
        assert!(by_handle.is_same(&by_id));
        assert_eq!(by_id.handle(), Some("zachaysan"));
        assert!(by_id.is_group_loaded("profile"));

        registry
            .lookup(EntityKind::Person, " zachaysan ")
            .expect("cached handle lookup");
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.key_index(EntityKind::Person).pending_len(), 0);
    }

    #[test]
    fn lookup_requires_a_usable_key() {
        let (_, registry) = registry(Settings::default());
        assert!(matches!(
            registry.get_or_create(EntityKind::Person, None, None),
            Err(CoreError::InvalidLookup(_))
        ));
        assert!(matches!(
            registry.lookup(EntityKind::MediaItem, "sunset"),
            Err(CoreError::InvalidLookup(_))
        ));
        assert!(matches!(
            registry.lookup(EntityKind::Person, "ghost"),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(registry.len(EntityKind::Person), 0);
    }

    #[test]
    fn both_keys_bind_and_contradictions_are_rejected() {
        let (_, registry) = registry(Settings::default());
        registry
            .get_or_create(EntityKind::Person, Some(1), Some("tchebotarev"))
            .expect("bind both keys");
        assert!(registry.find(EntityKind::Person, "tchebotarev").is_some());

        let err = registry
            .get_or_create(EntityKind::Person, Some(2), Some("tchebotarev"))
            .expect_err("handle already bound to id 1");
        assert!(matches!(err, CoreError::InvalidLookup(_)));
        let err = registry
            .get_or_create(EntityKind::Person, Some(1), Some("evgeny"))
            .expect_err("id 1 already has a handle");
        assert!(matches!(err, CoreError::InvalidLookup(_)));

        // Rejected pairs leave no stub behind.
        assert!(registry.get(EntityKind::Person, 2).is_none());
        assert_eq!(registry.len(EntityKind::Person), 1);
        assert_eq!(registry.key_index(EntityKind::Person).resolve("evgeny"), None);
    }

    #[test]
    fn authorize_requires_oauth_mode_and_matching_owner() {
        let (_, anonymous) = registry(Settings::default());
        let err = anonymous
            .authorize(EntityKind::Person, 403022, AuthContext::new(403022, "t"))
            .expect_err("oauth is off");
        assert!(matches!(err, CoreError::NotAuthorized { .. }));

        let (_, registry) = registry(Settings {
            oauth: true,
            ..Settings::default()
        });
        let err = registry
            .authorize(EntityKind::Person, 1, AuthContext::new(403022, "t"))
            .expect_err("owner mismatch");
        assert!(matches!(err, CoreError::NotAuthorized { id: 1, .. }));

        let me = registry
            .authorize(EntityKind::Person, 403022, AuthContext::new(403022, "t"))
            .expect("own context");
        assert!(me.is_authorized());
    }

    #[test]
    fn actions_reject_wrong_targets() {
        let (_, registry) = registry(Settings {
            oauth: true,
            ..Settings::default()
        });
        let me = registry
            .authorize(EntityKind::Person, 403022, AuthContext::new(403022, "t"))
            .expect("own context");
        let friend = registry.lookup(EntityKind::Person, 1_u64).expect("stub");

        let err = registry
            .favorite(&me, ActionTarget::from(&friend))
            .expect_err("people cannot be favorited");
        assert!(matches!(err, CoreError::InvalidLookup(_)));
        let err = registry.follow(&me, 403022_u64).expect_err("self follow");
        assert!(matches!(err, CoreError::InvalidLookup(_)));
        assert!(registry.follow(&me, &friend).expect("follow friend"));
    }

    #[test]
    fn search_misses_yield_empty_collections() {
        let (_, registry) = registry(Settings::default());
        let found = registry
            .search(EntityKind::Person, "nobody")
            .expect("miss is not an error");
        assert!(found.is_empty());
        assert!(matches!(
            registry.search(EntityKind::Person, "  "),
            Err(CoreError::InvalidLookup(_))
        ));
    }
}
