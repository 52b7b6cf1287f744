//! Database module for Hive
//!
//! Persistent storage for templates, agent profiles, telos instances and
//! observations. A file-based implementation covers single-host deployments;
//! a MongoDB implementation is available for shared storage. Both expose the
//! same versioned-record interface, and the version-checked update is the
//! engine's only transactional primitive.

mod entities;
mod file_db;
mod manager;
mod models;
mod mongo_db;

pub use file_db::{DatabaseError, DbResult, FileDb};
pub use manager::{DatabaseInterface, DatabaseManager};
pub use models::{Entity, Record};
pub use mongo_db::MongoDb;
