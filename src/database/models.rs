use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Trait for database entity types
///
/// Entities are identified by a stable ID and stored wrapped in a
/// versioned [`Record`]. All engine state that must survive a crash
/// (templates, profiles, telos instances, observations) implements this.
pub trait Entity: Serialize + Clone + Debug + Send + Sync + 'static {
    /// Type of the entity's unique identifier
    type Id: AsRef<str> + Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Get the unique identifier for this entity
    fn id(&self) -> Self::Id;
}

/// A record in the database, which wraps an entity with metadata.
///
/// The version number implements optimistic concurrency: an update that
/// names an expected version fails with a conflict if another writer got
/// there first. Lease acquisition and step persistence both rely on this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Entity + for<'a> Deserialize<'a>"))]
pub struct Record<T: Entity + for<'a> Deserialize<'a> + Unpin> {
    /// The entity's key, duplicated at the top level. Entities name their
    /// key field however they like (`name`, `agent_id`, ...), so query
    /// backends filter on this field instead of reaching into the entity.
    pub key: String,
    /// The entity being stored
    pub entity: T,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Version number for optimistic concurrency control
    pub version: u64,
}

impl<T: Entity + for<'a> Deserialize<'a> + Unpin> Record<T> {
    /// Create a new record with the given entity
    pub fn new(entity: T) -> Self {
        let now = Utc::now();
        Self {
            key: entity.id().as_ref().to_string(),
            entity,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Replace the entity and advance the version
    pub fn update(&mut self, entity: T) {
        self.key = entity.id().as_ref().to_string();
        self.entity = entity;
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Get the entity's ID
    pub fn id(&self) -> T::Id {
        self.entity.id()
    }

    /// Get a reference to the entity
    pub fn entity(&self) -> &T {
        &self.entity
    }
}
