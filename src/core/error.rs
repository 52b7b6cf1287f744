use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::DatabaseError;

/// Custom error types for the Hive engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// No template exists under the given name
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// A template with this name already exists with different steps
    #[error("Template conflict: {0} already exists with different steps")]
    TemplateConflict(String),

    /// No telos instance exists under the given ID
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// No agent profile exists under the given ID
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The agent already holds an assignment for this mission
    #[error("Instance already exists: {0}")]
    DuplicateInstance(String),

    /// Another runner holds the execution lease for this instance.
    /// Not a failure condition: the scheduler skips and moves on.
    #[error("Lease held by {owner} until {expires_at}")]
    LeaseConflict {
        owner: String,
        expires_at: DateTime<Utc>,
    },

    /// A step payload could not be resolved to a known instruction kind
    #[error("Unsupported step: {0}")]
    UnsupportedStep(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl EngineError {
    /// Whether this error means the persistence layer is unreachable,
    /// in which case scheduling must pause until it responds again.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, EngineError::Storage(DatabaseError::Unavailable(_)))
    }
}

/// Normalized errors from the external collaborators (LLM backend,
/// governance platform). The mapping to retry policy is fixed here:
/// `Transient` is retryable, `Rejected` is fatal for the step.
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("Transient collaborator error: {message}")]
    Transient {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Collaborator rejected the request: {reason}")]
    Rejected { reason: String },
}

impl CollaboratorError {
    /// Convenience to construct a Transient error without a retry hint
    pub fn transient(message: impl Into<String>) -> Self {
        CollaboratorError::Transient {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Convenience to construct a Rejected error
    pub fn rejected(reason: impl Into<String>) -> Self {
        CollaboratorError::Rejected {
            reason: reason.into(),
        }
    }
}
