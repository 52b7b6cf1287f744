use std::marker::PhantomData;

use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde::Deserialize;

use super::file_db::DatabaseError;
use super::models::{Entity, Record};

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// A MongoDB-based database for storing entities.
///
/// Unlike the file store, several engine processes may share one MongoDB
/// deployment, so the version-checked update is pushed down into the query
/// filter: the replace only matches a document that still carries the
/// expected version. That single server-side conditional write is what
/// makes cross-process lease acquisition safe.
pub struct MongoDb<T: Entity + for<'a> Deserialize<'a> + Unpin> {
    /// MongoDB collection
    collection: Collection<Record<T>>,

    /// Phantom data for the entity type
    _phantom: PhantomData<T>,
}

/// Map a driver error to the storage taxonomy. Transport-level failures
/// become `Unavailable` so the scheduler pauses instead of failing runs.
fn map_mongo_error(e: mongodb::error::Error) -> DatabaseError {
    use mongodb::error::ErrorKind;

    match *e.kind {
        ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::ServerSelection { .. } => DatabaseError::Unavailable(e.to_string()),
        _ => DatabaseError::InternalError(format!("MongoDB error: {}", e)),
    }
}

impl<T: Entity + for<'a> Deserialize<'a> + Unpin> MongoDb<T> {
    /// Create a new MongoDB database
    pub async fn new(
        connection_string: &str,
        database_name: &str,
        collection_name: &str,
    ) -> DbResult<Self> {
        let client_options = ClientOptions::parse(connection_string).await.map_err(|e| {
            DatabaseError::InternalError(format!(
                "Failed to parse MongoDB connection string: {}",
                e
            ))
        })?;

        let client = Client::with_options(client_options).map_err(|e| {
            DatabaseError::InternalError(format!("Failed to create MongoDB client: {}", e))
        })?;

        let collection = client
            .database(database_name)
            .collection::<Record<T>>(collection_name);

        info!(
            "Connected to MongoDB database: {}, collection: {}",
            database_name, collection_name
        );

        Ok(Self {
            collection,
            _phantom: PhantomData,
        })
    }

    /// Get a record by ID
    pub async fn get(&self, id: &T::Id) -> DbResult<Record<T>> {
        let filter = doc! { "key": id.as_ref() };

        match self.collection.find_one(filter).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(DatabaseError::NotFound(id.as_ref().to_string())),
            Err(e) => Err(map_mongo_error(e)),
        }
    }

    /// Get all records
    pub async fn get_all(&self) -> DbResult<Vec<Record<T>>> {
        let cursor = self
            .collection
            .find(doc! {})
            .await
            .map_err(map_mongo_error)?;

        let records = cursor.try_collect().await.map_err(map_mongo_error)?;

        Ok(records)
    }

    /// Insert a new entity
    pub async fn insert(&self, entity: T) -> DbResult<Record<T>> {
        let id = entity.id();

        let filter = doc! { "key": id.as_ref() };
        let exists = self
            .collection
            .find_one(filter)
            .await
            .map_err(map_mongo_error)?;

        if exists.is_some() {
            return Err(DatabaseError::DuplicateKey(id.as_ref().to_string()));
        }

        let record = Record::new(entity);

        self.collection
            .insert_one(&record)
            .await
            .map_err(map_mongo_error)?;

        Ok(record)
    }

    /// Update an existing entity. With an expected version, the replace is
    /// filtered on that version server-side so concurrent writers cannot
    /// both succeed.
    pub async fn update(&self, entity: T, expected_version: Option<u64>) -> DbResult<Record<T>> {
        let id = entity.id();

        let filter = doc! { "key": id.as_ref() };
        let existing = self
            .collection
            .find_one(filter.clone())
            .await
            .map_err(map_mongo_error)?;

        let mut record = match existing {
            Some(record) => record,
            None => return Err(DatabaseError::NotFound(id.as_ref().to_string())),
        };

        if let Some(expected) = expected_version {
            if record.version != expected {
                return Err(DatabaseError::VersionConflict {
                    expected,
                    found: record.version,
                });
            }
        }

        let old_version = record.version;
        record.update(entity);

        // The replace filter pins the version we read, so a racing writer
        // that bumped it in the meantime makes this match nothing
        let versioned_filter = doc! {
            "key": id.as_ref(),
            "version": old_version as i64,
        };

        let result = self
            .collection
            .replace_one(versioned_filter, &record)
            .await
            .map_err(map_mongo_error)?;

        if result.matched_count == 0 {
            let found = self
                .collection
                .find_one(doc! { "key": id.as_ref() })
                .await
                .map_err(map_mongo_error)?
                .map(|r| r.version)
                .unwrap_or(0);
            return Err(DatabaseError::VersionConflict {
                expected: old_version,
                found,
            });
        }

        Ok(record)
    }

    /// Delete a record by ID
    pub async fn delete(&self, id: &T::Id) -> DbResult<()> {
        let filter = doc! { "key": id.as_ref() };

        let result = self
            .collection
            .delete_one(filter)
            .await
            .map_err(map_mongo_error)?;

        if result.deleted_count == 0 {
            return Err(DatabaseError::NotFound(id.as_ref().to_string()));
        }

        Ok(())
    }

    /// Clear all records
    pub async fn clear(&self) -> DbResult<()> {
        self.collection
            .delete_many(doc! {})
            .await
            .map_err(map_mongo_error)?;

        Ok(())
    }
}
