//! Static attribute-group, relation and action tables per entity kind.
//!
//! # Responsibility
//! - Declare which fields each entity kind can carry.
//! - Declare the fetch granularity (attribute groups) that supplies them.
//! - Declare relations and actions together with their authorization scope.
//!
//! # Invariants
//! - Every group belongs to exactly one kind; group names are unique per kind.
//! - `lookup_group` always names a declared group that supplies the id.
//! - A field is self-scoped only when every group supplying it is self-scoped.

use serde::{Deserialize, Serialize};

/// Implicit primary-key field carried by every payload and every entity.
pub const ID_FIELD: &str = "id";

const SUMMARY_GROUP: &str = "summary";

/// Entity kinds backed by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    MediaItem,
    Collection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Person, Self::MediaItem, Self::Collection];

    /// Stable string id used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::MediaItem => "media_item",
            Self::Collection => "collection",
        }
    }

    pub fn schema(self) -> &'static EntitySchema {
        match self {
            Self::Person => &PERSON_SCHEMA,
            Self::MediaItem => &MEDIA_ITEM_SCHEMA,
            Self::Collection => &COLLECTION_SCHEMA,
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::Person => 0,
            Self::MediaItem => 1,
            Self::Collection => 2,
        }
    }
}

/// Who may read a group/relation or perform an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    /// Readable through any view of the entity.
    Public,
    /// Requires the entity's own authorization context.
    SelfOnly,
}

/// How a group reaches core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSource {
    /// Fetchable on its own through `fetch_entity`.
    Direct,
    /// Only ever delivered embedded in listing and search results.
    Listing,
}

/// A bundle of fields that one fetch always returns together.
#[derive(Debug, PartialEq, Eq)]
pub struct AttributeGroup {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    /// Relative fetch cost; lower is cheaper.
    pub cost: u8,
    pub scope: FieldScope,
    pub source: GroupSource,
}

impl AttributeGroup {
    pub fn supplies(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }

    pub fn is_direct(&self) -> bool {
        self.source == GroupSource::Direct
    }
}

/// A listing call from one entity to a sequence of others.
#[derive(Debug, PartialEq, Eq)]
pub struct RelationSpec {
    pub name: &'static str,
    pub target: EntityKind,
    /// Group whose fields the listing call returns for every member.
    pub listing_group: &'static str,
    pub scope: FieldScope,
}

/// Self-scoped mutations performed by an authorized person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Favorite,
    Unfavorite,
    Follow,
    Unfollow,
}

impl ActionKind {
    /// Kind of entity that performs every action.
    pub const ACTOR_KIND: EntityKind = EntityKind::Person;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Favorite => "favorite",
            Self::Unfavorite => "unfavorite",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
        }
    }

    /// Kind of entity the action is applied to.
    pub fn target_kind(self) -> EntityKind {
        match self {
            Self::Favorite | Self::Unfavorite => EntityKind::MediaItem,
            Self::Follow | Self::Unfollow => EntityKind::Person,
        }
    }

    /// Counter on the target that the action changes server-side.
    pub fn affected_field(self) -> &'static str {
        match self {
            Self::Favorite | Self::Unfavorite => "favorites_count",
            Self::Follow | Self::Unfollow => "followers_count",
        }
    }
}

/// Complete attribute layout of one entity kind.
///
/// Every kind declares a listing-only `summary` group; listings and search
/// results are always shaped like it.
#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    /// Field holding the human-readable handle, if this kind has one.
    pub secondary_key_field: Option<&'static str>,
    /// Group fetched when resolving the entity by its handle.
    pub lookup_group: &'static str,
    pub groups: &'static [AttributeGroup],
    pub relations: &'static [RelationSpec],
}

impl EntitySchema {
    pub fn group(&self, name: &str) -> Option<&'static AttributeGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Group every listing and search result of this kind is shaped like.
    pub fn summary_group(&self) -> Option<&'static AttributeGroup> {
        self.group(SUMMARY_GROUP)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationSpec> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Groups declaring `field`, in declaration order.
    pub fn groups_supplying<'a>(
        &'static self,
        field: &'a str,
    ) -> impl Iterator<Item = &'static AttributeGroup> + 'a {
        self.groups.iter().filter(move |group| group.supplies(field))
    }

    pub fn has_field(&self, field: &str) -> bool {
        field == ID_FIELD || self.groups.iter().any(|group| group.supplies(field))
    }

    /// Returns `None` for fields this kind does not define.
    pub fn field_scope(&self, field: &str) -> Option<FieldScope> {
        if field == ID_FIELD {
            return Some(FieldScope::Public);
        }
        let mut supplying = self.groups.iter().filter(|group| group.supplies(field));
        let first = supplying.next()?;
        if first.scope == FieldScope::Public
            || supplying.any(|group| group.scope == FieldScope::Public)
        {
            Some(FieldScope::Public)
        } else {
            Some(FieldScope::SelfOnly)
        }
    }

    /// Returns `None` when this kind cannot act. Every action shares one
    /// actor kind, so the answer does not depend on the action.
    pub fn action_scope(&self, _action: ActionKind) -> Option<FieldScope> {
        (self.kind == ActionKind::ACTOR_KIND).then_some(FieldScope::SelfOnly)
    }
}

static PERSON_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Person,
    secondary_key_field: Some("username"),
    lookup_group: "profile",
    groups: &[
        AttributeGroup {
            name: "summary",
            fields: &["username", "fullname", "userpic_url", "upgrade_status"],
            cost: 1,
            scope: FieldScope::Public,
            source: GroupSource::Listing,
        },
        AttributeGroup {
            name: "profile",
            fields: &[
                "username",
                "fullname",
                "firstname",
                "lastname",
                "userpic_url",
                "upgrade_status",
                "city",
                "country",
                "about",
                "affection",
                "photos_count",
                "friends_count",
                "followers_count",
                "registration_date",
            ],
            cost: 2,
            scope: FieldScope::Public,
            source: GroupSource::Direct,
        },
        AttributeGroup {
            name: "account",
            fields: &["email", "upload_limit", "contacts"],
            cost: 2,
            scope: FieldScope::SelfOnly,
            source: GroupSource::Direct,
        },
    ],
    relations: &[
        RelationSpec {
            name: "friends",
            target: EntityKind::Person,
            listing_group: "summary",
            scope: FieldScope::Public,
        },
        RelationSpec {
            name: "followers",
            target: EntityKind::Person,
            listing_group: "summary",
            scope: FieldScope::Public,
        },
        RelationSpec {
            name: "blog_posts",
            target: EntityKind::MediaItem,
            listing_group: "summary",
            scope: FieldScope::Public,
        },
        RelationSpec {
            name: "photos",
            target: EntityKind::MediaItem,
            listing_group: "summary",
            scope: FieldScope::Public,
        },
        RelationSpec {
            name: "collections",
            target: EntityKind::Collection,
            listing_group: "summary",
            scope: FieldScope::SelfOnly,
        },
    ],
};

static MEDIA_ITEM_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::MediaItem,
    secondary_key_field: None,
    lookup_group: "details",
    groups: &[
        AttributeGroup {
            name: "summary",
            fields: &[
                "name",
                "description",
                "user_id",
                "image_url",
                "rating",
                "created_at",
            ],
            cost: 1,
            scope: FieldScope::Public,
            source: GroupSource::Listing,
        },
        AttributeGroup {
            name: "details",
            fields: &[
                "name",
                "description",
                "user_id",
                "image_url",
                "rating",
                "created_at",
                "camera",
                "lens",
                "focal_length",
                "iso",
                "category",
                "times_viewed",
                "votes_count",
                "favorites_count",
                "comments_count",
            ],
            cost: 2,
            scope: FieldScope::Public,
            source: GroupSource::Direct,
        },
        AttributeGroup {
            name: "stats",
            fields: &[
                "rating",
                "times_viewed",
                "votes_count",
                "favorites_count",
                "comments_count",
            ],
            cost: 1,
            scope: FieldScope::Public,
            source: GroupSource::Direct,
        },
    ],
    relations: &[RelationSpec {
        name: "favorited_by",
        target: EntityKind::Person,
        listing_group: "summary",
        scope: FieldScope::Public,
    }],
};

static COLLECTION_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Collection,
    secondary_key_field: None,
    lookup_group: "details",
    groups: &[
        AttributeGroup {
            name: "summary",
            fields: &["title", "path", "position", "thumbnail_url"],
            cost: 1,
            scope: FieldScope::Public,
            source: GroupSource::Listing,
        },
        AttributeGroup {
            name: "details",
            fields: &[
                "title",
                "path",
                "position",
                "thumbnail_url",
                "items_count",
                "created_at",
                "updated_at",
            ],
            cost: 2,
            scope: FieldScope::Public,
            source: GroupSource::Direct,
        },
    ],
    relations: &[RelationSpec {
        name: "photos",
        target: EntityKind::MediaItem,
        listing_group: "summary",
        scope: FieldScope::Public,
    }],
};
