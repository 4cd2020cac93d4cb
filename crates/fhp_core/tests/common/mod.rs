#![allow(dead_code)]

use fhp_core::{
    ActionKind, ApiClient, ApiError, ApiResult, AttributeGroup, AuthContext, EntityId, EntityKey,
    EntityKind, EntityRegistry, FieldMap, FieldScope, GroupPayload, ListingEntry, RelationSpec, Settings,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const ZACH: EntityId = 403022;
pub const EVGENY: EntityId = 1;
pub const OLEG: EntityId = 2;
pub const ARRAGORN: EntityId = 1354783;
pub const SKYLINE: EntityId = 10;

/// One recorded `fetch_entity` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub kind: EntityKind,
    pub key: EntityKey,
    pub group: &'static str,
}

/// In-memory stand-in for the remote API.
pub struct FakeApi {
    records: HashMap<(EntityKind, EntityId), Value>,
    relations: HashMap<(EntityKind, EntityId, &'static str), Vec<EntityId>>,
    fetches: Mutex<Vec<FetchRecord>>,
    relation_fetches: Mutex<Vec<(EntityId, &'static str)>>,
    searches: Mutex<usize>,
    latency: Mutex<Option<Duration>>,
    fetch_latency: Mutex<Option<Duration>>,
    listing_extras: Mutex<Option<FieldMap>>,
    failure: Mutex<Option<ApiError>>,
    overrides: Mutex<HashMap<(EntityKind, EntityId), Value>>,
    updates: Mutex<HashMap<(EntityKind, EntityId), Value>>,
    favorites: Mutex<HashSet<(EntityId, EntityId)>>,
    follows: Mutex<HashSet<(EntityId, EntityId)>>,
    actions: Mutex<Vec<(ActionKind, EntityId)>>,
}

impl FakeApi {
    pub fn seeded() -> Arc<Self> {
        let mut records = HashMap::new();
        let people = [
            json!({
                "id": ZACH, "username": "zachaysan", "fullname": "Zach Aysan",
                "firstname": "Zach", "lastname": "Aysan", "city": "Toronto",
                "country": "Canada", "affection": 4, "followers_count": 3,
                "friends_count": 2, "photos_count": 0, "upgrade_status": 0,
                "email": "zach@example.com", "upload_limit": 20, "contacts": {}
            }),
            json!({
                "id": EVGENY, "username": "tchebotarev", "fullname": "Evgeny Tchebotarev",
                "firstname": "Evgeny", "lastname": "Tchebotarev", "city": "Toronto",
                "country": "Canada", "affection": 31337, "followers_count": 12000,
                "friends_count": 1, "photos_count": 120, "upgrade_status": 2
            }),
            json!({
                "id": OLEG, "username": "oleggutsol", "fullname": "Oleg Gutsol",
                "firstname": "Oleg", "lastname": "Gutsol", "city": "Toronto",
                "country": "Canada", "affection": 9001, "followers_count": 8000,
                "friends_count": 0, "photos_count": 80, "upgrade_status": 2
            }),
            json!({
                "id": ARRAGORN, "username": "arragorn", "fullname": "Arragorn",
                "affection": 7, "followers_count": 1, "upgrade_status": 0
            }),
        ];
        for person in people {
            records.insert((EntityKind::Person, id_of(&person)), person);
        }

        let media = [
            json!({"id": 1, "name": "First light", "user_id": OLEG, "rating": 91.2,
                   "camera": "X100", "favorites_count": 3, "times_viewed": 300}),
            json!({"id": 5, "name": "Harbour", "user_id": OLEG, "rating": 88.0,
                   "camera": "X100", "favorites_count": 1, "times_viewed": 120}),
            json!({"id": 3, "name": "Fog", "user_id": OLEG, "rating": 79.5,
                   "camera": "X-T2", "favorites_count": 0, "times_viewed": 40}),
            json!({"id": SKYLINE, "name": "Toronto skyline", "user_id": EVGENY, "rating": 95.0,
                   "camera": "A7R", "favorites_count": 41, "times_viewed": 9000}),
        ];
        for item in media {
            records.insert((EntityKind::MediaItem, id_of(&item)), item);
        }

        let collections = [
            json!({"id": 383355, "title": "Portfolio", "path": "portfolio", "position": 0,
                   "items_count": 2}),
            json!({"id": 383356, "title": "Travel", "path": "travel", "position": 1,
                   "items_count": 0}),
        ];
        for collection in collections {
            records.insert((EntityKind::Collection, id_of(&collection)), collection);
        }

        let relations = HashMap::from([
            ((EntityKind::Person, ZACH, "friends"), vec![EVGENY, OLEG]),
            ((EntityKind::Person, ZACH, "followers"), vec![EVGENY, OLEG, ARRAGORN]),
            ((EntityKind::Person, ZACH, "collections"), vec![383355, 383356]),
            ((EntityKind::Person, EVGENY, "friends"), vec![ZACH]),
            ((EntityKind::Person, EVGENY, "photos"), vec![SKYLINE]),
            ((EntityKind::Person, OLEG, "blog_posts"), vec![1, 5, 3]),
            ((EntityKind::Collection, 383355, "photos"), vec![SKYLINE, 1]),
        ]);

        Arc::new(Self {
            records,
            relations,
            fetches: Mutex::new(Vec::new()),
            relation_fetches: Mutex::new(Vec::new()),
            searches: Mutex::new(0),
            latency: Mutex::new(None),
            fetch_latency: Mutex::new(None),
            listing_extras: Mutex::new(None),
            failure: Mutex::new(None),
            overrides: Mutex::new(HashMap::new()),
            updates: Mutex::new(HashMap::new()),
            favorites: Mutex::new(HashSet::new()),
            follows: Mutex::new(HashSet::new()),
            actions: Mutex::new(Vec::new()),
        })
    }

    /// Every call sleeps this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Entity fetches alone sleep this long; other calls answer at once.
    pub fn set_fetch_latency(&self, latency: Duration) {
        *self.fetch_latency.lock() = Some(latency);
    }

    /// Adds `extras` to every listing and search entry, as a chatty API would.
    pub fn set_listing_extras(&self, extras: Value) {
        *self.listing_extras.lock() = extras.as_object().cloned();
    }

    /// Every call fails with `failure` until cleared.
    pub fn set_failure(&self, failure: Option<ApiError>) {
        *self.failure.lock() = failure;
    }

    /// Next entity fetch for `(kind, id)` returns `payload` verbatim.
    pub fn override_next(&self, kind: EntityKind, id: EntityId, payload: Value) {
        self.overrides.lock().insert((kind, id), payload);
    }

    /// Changes a stored value, as another client would.
    pub fn update(&self, kind: EntityKind, id: EntityId, field: &str, value: Value) {
        let mut updates = self.updates.lock();
        let record = updates
            .entry((kind, id))
            .or_insert_with(|| self.records.get(&(kind, id)).cloned().unwrap_or_else(|| json!({ "id": id })));
        record[field] = value;
    }

    pub fn fetch_log(&self) -> Vec<FetchRecord> {
        self.fetches.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn group_fetches(&self, kind: EntityKind, id: EntityId, group: &str) -> usize {
        self.fetches
            .lock()
            .iter()
            .filter(|record| {
                record.kind == kind && record.key == EntityKey::Id(id) && record.group == group
            })
            .count()
    }

    pub fn relation_fetch_count(&self) -> usize {
        self.relation_fetches.lock().len()
    }

    pub fn search_count(&self) -> usize {
        *self.searches.lock()
    }

    pub fn is_favorite(&self, owner: EntityId, item: EntityId) -> bool {
        self.favorites.lock().contains(&(owner, item))
    }

    pub fn is_following(&self, owner: EntityId, person: EntityId) -> bool {
        self.follows.lock().contains(&(owner, person))
    }

    pub fn action_count(&self) -> usize {
        self.actions.lock().len()
    }

    fn pause_or_fail(&self) -> ApiResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        match self.failure.lock().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn record(&self, kind: EntityKind, id: EntityId) -> Option<Value> {
        if let Some(updated) = self.updates.lock().get(&(kind, id)) {
            return Some(updated.clone());
        }
        self.records.get(&(kind, id)).cloned()
    }

    fn id_for_handle(&self, kind: EntityKind, handle: &str) -> Option<EntityId> {
        self.records
            .iter()
            .find(|((record_kind, _), record)| {
                *record_kind == kind && record["username"].as_str() == Some(handle)
            })
            .map(|((_, id), _)| *id)
    }

    fn listing_entry(&self, kind: EntityKind, id: EntityId) -> Option<ListingEntry> {
        let record = self.record(kind, id)?;
        let summary = kind.schema().summary_group()?;
        let handle = record["username"].as_str().map(str::to_string);
        let mut attributes = shaped(&record, summary.fields);
        if let Some(extras) = self.listing_extras.lock().clone() {
            attributes.extend(extras);
        }
        Some(ListingEntry {
            id,
            handle,
            attributes,
        })
    }
}

impl ApiClient for FakeApi {
    fn fetch_entity(
        &self,
        kind: EntityKind,
        key: &EntityKey,
        group: &AttributeGroup,
        auth: Option<&AuthContext>,
    ) -> ApiResult<GroupPayload> {
        self.fetches.lock().push(FetchRecord {
            kind,
            key: key.clone(),
            group: group.name,
        });
        let fetch_latency = *self.fetch_latency.lock();
        if let Some(latency) = fetch_latency {
            std::thread::sleep(latency);
        }
        self.pause_or_fail()?;

        let id = match key {
            EntityKey::Id(id) => *id,
            EntityKey::Handle(handle) => self
                .id_for_handle(kind, handle)
                .ok_or(ApiError::NotFound)?,
        };
        if group.scope == FieldScope::SelfOnly && !auth.is_some_and(|auth| auth.grants(id)) {
            return Err(ApiError::Transport("401 unauthorized".to_string()));
        }
        if let Some(payload) = self.overrides.lock().remove(&(kind, id)) {
            return payload
                .as_object()
                .cloned()
                .ok_or_else(|| ApiError::Transport("payload is not an object".to_string()));
        }
        let record = self.record(kind, id).ok_or(ApiError::NotFound)?;
        Ok(shaped(&record, group.fields))
    }

    fn fetch_relationship(
        &self,
        kind: EntityKind,
        id: EntityId,
        relation: &RelationSpec,
        _auth: Option<&AuthContext>,
    ) -> ApiResult<Vec<ListingEntry>> {
        self.relation_fetches.lock().push((id, relation.name));
        self.pause_or_fail()?;
        if !self.records.contains_key(&(kind, id)) {
            return Err(ApiError::NotFound);
        }
        let members = self
            .relations
            .get(&(kind, id, relation.name))
            .cloned()
            .unwrap_or_default();
        Ok(members
            .into_iter()
            .filter_map(|member| self.listing_entry(relation.target, member))
            .collect())
    }

    fn perform_action(
        &self,
        action: ActionKind,
        target: EntityId,
        auth: &AuthContext,
    ) -> ApiResult<bool> {
        self.actions.lock().push((action, target));
        self.pause_or_fail()?;
        if !self.records.contains_key(&(action.target_kind(), target)) {
            return Err(ApiError::NotFound);
        }
        let pair = (auth.owner(), target);
        match action {
            ActionKind::Favorite => self.favorites.lock().insert(pair),
            ActionKind::Unfavorite => self.favorites.lock().remove(&pair),
            ActionKind::Follow => self.follows.lock().insert(pair),
            ActionKind::Unfollow => self.follows.lock().remove(&pair),
        };
        Ok(true)
    }

    fn search(&self, kind: EntityKind, term: &str) -> ApiResult<Vec<ListingEntry>> {
        *self.searches.lock() += 1;
        self.pause_or_fail()?;
        let needle = term.to_lowercase();
        let mut ids: Vec<EntityId> = self
            .records
            .iter()
            .filter(|((record_kind, _), record)| {
                *record_kind == kind
                    && ["username", "fullname", "name", "title"].iter().any(|field| {
                        record[*field]
                            .as_str()
                            .is_some_and(|value| value.to_lowercase().contains(&needle))
                    })
            })
            .map(|((_, id), _)| *id)
            .collect();
        if ids.is_empty() {
            return Err(ApiError::NotFound);
        }
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.listing_entry(kind, id))
            .collect())
    }
}

fn id_of(record: &Value) -> EntityId {
    record["id"].as_u64().expect("fixture records carry an id")
}

/// `record` reduced to `fields` plus the id.
fn shaped(record: &Value, fields: &[&str]) -> FieldMap {
    let mut payload = FieldMap::new();
    payload.insert("id".to_string(), record["id"].clone());
    for field in fields {
        if let Some(value) = record.get(*field) {
            payload.insert((*field).to_string(), value.clone());
        }
    }
    payload
}

/// Anonymous registry over the seeded fake.
pub fn registry() -> (Arc<FakeApi>, EntityRegistry) {
    let api = FakeApi::seeded();
    let registry = EntityRegistry::new(api.clone());
    (api, registry)
}

/// Registry in authorized mode.
pub fn oauth_registry() -> (Arc<FakeApi>, EntityRegistry) {
    let api = FakeApi::seeded();
    let settings = Settings {
        oauth: true,
        ..Settings::default()
    };
    let registry = EntityRegistry::with_settings(api.clone(), settings);
    (api, registry)
}

pub fn object(value: Value) -> FieldMap {
    value.as_object().cloned().expect("object fixture")
}
