use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::instance::TelosSource;
use crate::core::error::EngineError;
use crate::database::{DatabaseError, DatabaseInterface, DbResult, Record};

/// A named mission definition shared by many agent instances.
///
/// The step payloads are opaque to the store; only the step executor
/// interprets them. Templates are append-only: once a name exists, putting
/// different steps under it is rejected so instances referencing it cannot
/// silently change semantics mid-flight. Semantic edits require a new name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelosTemplate {
    /// Unique name, used as the store key
    pub name: String,
    pub description: String,
    /// Ordered, opaque step payloads
    pub steps: Vec<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl TelosTemplate {
    pub fn new(name: &str, description: &str, steps: Vec<JsonValue>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Store wrapper for mission templates
pub struct TemplateStore {
    db: Arc<dyn DatabaseInterface<TelosTemplate>>,
}

impl TemplateStore {
    pub fn new(db: Arc<dyn DatabaseInterface<TelosTemplate>>) -> Self {
        Self { db }
    }

    pub async fn get(&self, name: &str) -> Result<TelosTemplate, EngineError> {
        match self.db.get(&name.to_string()).await {
            Ok(record) => Ok(record.entity),
            Err(DatabaseError::NotFound(name)) => Err(EngineError::TemplateNotFound(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a template. Re-putting an identical definition is a no-op;
    /// putting different steps under an existing name is a conflict.
    pub async fn put(&self, template: TelosTemplate) -> Result<TelosTemplate, EngineError> {
        match self.db.get(&template.name).await {
            Ok(existing) => {
                if existing.entity.steps == template.steps {
                    Ok(existing.entity)
                } else {
                    Err(EngineError::TemplateConflict(template.name))
                }
            }
            Err(DatabaseError::NotFound(_)) => {
                let record = self.db.insert(template).await?;
                Ok(record.entity)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> DbResult<Vec<Record<TelosTemplate>>> {
        self.db.get_all().await
    }

    /// Resolve an instance's source to its ordered step payloads.
    /// Custom missions carry their steps inline as plain strings.
    pub async fn steps_for(&self, source: &TelosSource) -> Result<Vec<JsonValue>, EngineError> {
        match source {
            TelosSource::Template { name, .. } => {
                let template = self.get(name).await?;
                Ok(template.steps)
            }
            TelosSource::Custom { steps } => Ok(steps
                .iter()
                .map(|s| JsonValue::String(s.clone()))
                .collect()),
        }
    }
}
