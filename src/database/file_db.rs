use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use super::models::{Entity, Record};

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Entity not found with ID: {0}")]
    NotFound(String),

    #[error("Duplicate entity with ID: {0}")]
    DuplicateKey(String),

    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal database error: {0}")]
    InternalError(String),
}

/// A file-based database for storing entities.
///
/// Each collection lives in one JSON file under the data directory, with an
/// in-memory cache in front. Writes go through a temp file and an atomic
/// rename, so a crash mid-save leaves the previous collection state intact.
/// Mutations hold the cache write lock for the full read-modify-persist
/// cycle, which makes the version-checked update a true conditional write
/// within one process.
pub struct FileDb<T: Entity + for<'a> Deserialize<'a> + Unpin> {
    /// Data directory where collection files are stored
    data_dir: PathBuf,

    /// Name of the collection (used as filename)
    collection_name: String,

    /// In-memory cache of records
    cache: Arc<RwLock<HashMap<T::Id, Record<T>>>>,

    /// Phantom data for the entity type
    _phantom: PhantomData<T>,
}

impl<T: Entity + for<'a> Deserialize<'a> + Unpin> FileDb<T> {
    /// Create a new file database, loading any existing collection file
    pub async fn new(data_dir: impl AsRef<Path>, collection_name: &str) -> DbResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        fs::create_dir_all(&data_dir).map_err(DatabaseError::IoError)?;

        let db = Self {
            data_dir,
            collection_name: collection_name.to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            _phantom: PhantomData,
        };

        db.load_all().await?;

        Ok(db)
    }

    /// Get the path to the collection file
    fn collection_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.collection_name))
    }

    /// Load all records from disk
    async fn load_all(&self) -> DbResult<()> {
        let path = self.collection_path();

        if !path.exists() {
            debug!(
                "Collection file not found at {:?}, starting with empty collection",
                path
            );
            return Ok(());
        }

        let file = File::open(&path).map_err(DatabaseError::IoError)?;
        let reader = BufReader::new(file);

        let records: Vec<Record<T>> =
            serde_json::from_reader(reader).map_err(DatabaseError::SerializationError)?;

        let mut cache = self.cache.write().await;
        cache.clear();

        for record in records {
            cache.insert(record.id(), record);
        }

        info!(
            "Loaded {} records into collection {}",
            cache.len(),
            self.collection_name
        );
        Ok(())
    }

    /// Persist the cache to disk. Callers must still hold the write lock
    /// so that the saved snapshot matches what they just mutated.
    async fn save_snapshot(&self, cache: &HashMap<T::Id, Record<T>>) -> DbResult<()> {
        let path = self.collection_path();
        let temp_path = path.with_extension("tmp");

        let records: Vec<&Record<T>> = cache.values().collect();

        let file = File::create(&temp_path).map_err(DatabaseError::IoError)?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &records)
            .map_err(DatabaseError::SerializationError)?;

        // Atomic rename: either the old snapshot or the new one, never a torn file
        fs::rename(&temp_path, &path).map_err(DatabaseError::IoError)?;

        debug!(
            "Saved {} records to collection {}",
            records.len(),
            self.collection_name
        );
        Ok(())
    }

    /// Get a record by ID
    pub async fn get(&self, id: &T::Id) -> DbResult<Record<T>> {
        let cache = self.cache.read().await;

        cache
            .get(id)
            .cloned()
            .ok_or_else(|| DatabaseError::NotFound(id.as_ref().to_string()))
    }

    /// Get all records
    pub async fn get_all(&self) -> DbResult<Vec<Record<T>>> {
        let cache = self.cache.read().await;

        Ok(cache.values().cloned().collect())
    }

    /// Insert a new entity
    pub async fn insert(&self, entity: T) -> DbResult<Record<T>> {
        let mut cache = self.cache.write().await;

        let id = entity.id();

        if cache.contains_key(&id) {
            return Err(DatabaseError::DuplicateKey(id.as_ref().to_string()));
        }

        let record = Record::new(entity);
        cache.insert(id, record.clone());

        self.save_snapshot(&cache).await?;

        Ok(record)
    }

    /// Update an existing entity. When `expected_version` is given, the
    /// update only applies if the stored version still matches; otherwise
    /// it fails with `VersionConflict` and nothing is written.
    pub async fn update(&self, entity: T, expected_version: Option<u64>) -> DbResult<Record<T>> {
        let mut cache = self.cache.write().await;

        let id = entity.id();

        let record = match cache.get_mut(&id) {
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

        record.update(entity);
        let updated_record = record.clone();

        self.save_snapshot(&cache).await?;

        Ok(updated_record)
    }

    /// Delete a record by ID
    pub async fn delete(&self, id: &T::Id) -> DbResult<()> {
        let mut cache = self.cache.write().await;

        if cache.remove(id).is_none() {
            return Err(DatabaseError::NotFound(id.as_ref().to_string()));
        }

        self.save_snapshot(&cache).await?;

        Ok(())
    }

    /// Clear all records
    pub async fn clear(&self) -> DbResult<()> {
        let mut cache = self.cache.write().await;

        cache.clear();

        self.save_snapshot(&cache).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestEntity {
        id: String,
        value: u32,
    }

    impl Unpin for TestEntity {}

    impl Entity for TestEntity {
        type Id = String;

        fn id(&self) -> Self::Id {
            self.id.clone()
        }
    }

    async fn test_db(dir: &TempDir) -> FileDb<TestEntity> {
        FileDb::new(dir.path(), "test_entities").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        let record = db
            .insert(TestEntity {
                id: "a".to_string(),
                value: 1,
            })
            .await
            .unwrap();
        assert_eq!(record.version, 1);

        let fetched = db.get(&"a".to_string()).await.unwrap();
        assert_eq!(fetched.entity.value, 1);

        let missing = db.get(&"b".to_string()).await;
        assert!(matches!(missing, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        db.insert(TestEntity {
            id: "a".to_string(),
            value: 1,
        })
        .await
        .unwrap();

        let dup = db
            .insert(TestEntity {
                id: "a".to_string(),
                value: 2,
            })
            .await;
        assert!(matches!(dup, Err(DatabaseError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_versioned_update_conflict() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        let record = db
            .insert(TestEntity {
                id: "a".to_string(),
                value: 1,
            })
            .await
            .unwrap();

        // First conditional update succeeds and bumps the version
        let updated = db
            .update(
                TestEntity {
                    id: "a".to_string(),
                    value: 2,
                },
                Some(record.version),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // Re-using the stale version must fail and leave the entity untouched
        let stale = db
            .update(
                TestEntity {
                    id: "a".to_string(),
                    value: 99,
                },
                Some(record.version),
            )
            .await;
        assert!(matches!(
            stale,
            Err(DatabaseError::VersionConflict {
                expected: 1,
                found: 2
            })
        ));
        assert_eq!(db.get(&"a".to_string()).await.unwrap().entity.value, 2);
    }

    #[tokio::test]
    async fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();

        {
            let db = test_db(&dir).await;
            db.insert(TestEntity {
                id: "a".to_string(),
                value: 7,
            })
            .await
            .unwrap();
        }

        // A fresh instance over the same directory sees the persisted record
        let db = test_db(&dir).await;
        let fetched = db.get(&"a".to_string()).await.unwrap();
        assert_eq!(fetched.entity.value, 7);
    }
}
