use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::core::config::Config;
use crate::database::{DbResult, Entity, FileDb, MongoDb, Record};
use crate::telos::instance::AgentTelos;
use crate::telos::observation::Observation;
use crate::telos::registry::AgentProfile;
use crate::telos::template::TelosTemplate;

/// Trait for database operations
#[async_trait::async_trait]
pub trait DatabaseInterface<T: Entity + for<'a> Deserialize<'a> + Unpin>: Send + Sync {
    /// Get a record by ID
    async fn get(&self, id: &T::Id) -> DbResult<Record<T>>;

    /// Get all records
    async fn get_all(&self) -> DbResult<Vec<Record<T>>>;

    /// Insert a new entity
    async fn insert(&self, entity: T) -> DbResult<Record<T>>;

    /// Update an existing entity, conditionally on the expected version
    async fn update(&self, entity: T, expected_version: Option<u64>) -> DbResult<Record<T>>;

    /// Delete a record by ID
    async fn delete(&self, id: &T::Id) -> DbResult<()>;

    /// Clear all records
    async fn clear(&self) -> DbResult<()>;
}

// Implement DatabaseInterface for FileDb
#[async_trait::async_trait]
impl<T: Entity + for<'a> Deserialize<'a> + Unpin> DatabaseInterface<T> for FileDb<T> {
    async fn get(&self, id: &T::Id) -> DbResult<Record<T>> {
        self.get(id).await
    }

    async fn get_all(&self) -> DbResult<Vec<Record<T>>> {
        self.get_all().await
    }

    async fn insert(&self, entity: T) -> DbResult<Record<T>> {
        self.insert(entity).await
    }

    async fn update(&self, entity: T, expected_version: Option<u64>) -> DbResult<Record<T>> {
        self.update(entity, expected_version).await
    }

    async fn delete(&self, id: &T::Id) -> DbResult<()> {
        self.delete(id).await
    }

    async fn clear(&self) -> DbResult<()> {
        self.clear().await
    }
}

// Implement DatabaseInterface for MongoDb
#[async_trait::async_trait]
impl<T: Entity + for<'a> Deserialize<'a> + Unpin> DatabaseInterface<T> for MongoDb<T> {
    async fn get(&self, id: &T::Id) -> DbResult<Record<T>> {
        self.get(id).await
    }

    async fn get_all(&self) -> DbResult<Vec<Record<T>>> {
        self.get_all().await
    }

    async fn insert(&self, entity: T) -> DbResult<Record<T>> {
        self.insert(entity).await
    }

    async fn update(&self, entity: T, expected_version: Option<u64>) -> DbResult<Record<T>> {
        self.update(entity, expected_version).await
    }

    async fn delete(&self, id: &T::Id) -> DbResult<()> {
        self.delete(id).await
    }

    async fn clear(&self) -> DbResult<()> {
        self.clear().await
    }
}

/// Database Manager coordinates access to all engine collections
pub struct DatabaseManager {
    /// Database for mission templates
    templates_db: Arc<dyn DatabaseInterface<TelosTemplate>>,

    /// Database for agent profiles
    profiles_db: Arc<dyn DatabaseInterface<AgentProfile>>,

    /// Database for telos instances
    instances_db: Arc<dyn DatabaseInterface<AgentTelos>>,

    /// Database for the observation journal
    observations_db: Arc<dyn DatabaseInterface<Observation>>,
}

impl DatabaseManager {
    /// Create a new database manager from configuration
    pub async fn new(config: &Config) -> Result<Self> {
        if config.storage.mongodb.enabled {
            info!(
                "Using MongoDB for storage: {}",
                config.storage.mongodb.connection_string
            );
            Self::new_mongo(
                &config.storage.mongodb.connection_string,
                &config.storage.mongodb.database,
            )
            .await
        } else {
            info!(
                "Using file-based storage with data directory: {}",
                config.storage.data_dir
            );
            Self::new_file(&config.storage.data_dir).await
        }
    }

    /// Create a file-backed manager rooted at the given data directory
    pub async fn new_file(data_dir: &str) -> Result<Self> {
        let templates_db = FileDb::new(data_dir, "telos_templates")
            .await
            .context("Failed to create telos templates database")?;

        let profiles_db = FileDb::new(data_dir, "agent_profiles")
            .await
            .context("Failed to create agent profiles database")?;

        let instances_db = FileDb::new(data_dir, "agent_telos")
            .await
            .context("Failed to create agent telos database")?;

        let observations_db = FileDb::new(data_dir, "observations")
            .await
            .context("Failed to create observations database")?;

        Ok(Self {
            templates_db: Arc::new(templates_db),
            profiles_db: Arc::new(profiles_db),
            instances_db: Arc::new(instances_db),
            observations_db: Arc::new(observations_db),
        })
    }

    /// Create a MongoDB-backed manager
    pub async fn new_mongo(connection_string: &str, database: &str) -> Result<Self> {
        let templates_db = MongoDb::new(connection_string, database, "telos_templates")
            .await
            .context("Failed to create telos templates MongoDB database")?;

        let profiles_db = MongoDb::new(connection_string, database, "agent_profiles")
            .await
            .context("Failed to create agent profiles MongoDB database")?;

        let instances_db = MongoDb::new(connection_string, database, "agent_telos")
            .await
            .context("Failed to create agent telos MongoDB database")?;

        let observations_db = MongoDb::new(connection_string, database, "observations")
            .await
            .context("Failed to create observations MongoDB database")?;

        Ok(Self {
            templates_db: Arc::new(templates_db),
            profiles_db: Arc::new(profiles_db),
            instances_db: Arc::new(instances_db),
            observations_db: Arc::new(observations_db),
        })
    }

    /// Get the mission templates database
    pub fn templates(&self) -> Arc<dyn DatabaseInterface<TelosTemplate>> {
        self.templates_db.clone()
    }

    /// Get the agent profiles database
    pub fn profiles(&self) -> Arc<dyn DatabaseInterface<AgentProfile>> {
        self.profiles_db.clone()
    }

    /// Get the telos instances database
    pub fn instances(&self) -> Arc<dyn DatabaseInterface<AgentTelos>> {
        self.instances_db.clone()
    }

    /// Get the observations database
    pub fn observations(&self) -> Arc<dyn DatabaseInterface<Observation>> {
        self.observations_db.clone()
    }
}
