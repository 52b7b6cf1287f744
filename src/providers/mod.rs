//! Providers module: clients for the engine's external collaborators.
//!
//! The engine drives two boundary contracts — a decision collaborator (the
//! LLM persona backend) and an action collaborator (the governance platform
//! client). Both are narrow async traits so tests can script them; failures
//! are normalized into [`CollaboratorError`] and the retry policy is decided
//! entirely by the runner, never here.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::core::error::CollaboratorError;

pub mod ollama;
pub mod platform;

pub use ollama::OllamaProvider;
pub use platform::PlatformClient;

/// Decision collaborator: given a persona and a prompt, produce a text
/// decision. Timeouts and rate limits surface as Transient; input the
/// backend refuses to process surfaces as Rejected.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, persona: &str, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Result of submitting an action to the governance platform
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// The platform accepted the action; receipt is the transaction result
    Accepted { receipt: JsonValue },
    /// The platform rejected the action as semantically invalid
    Rejected { reason: String },
}

/// Action collaborator: submit one governance action on behalf of an agent.
/// Transport failures surface as `Err(Transient)`; a semantic rejection is
/// a successful call returning `ActionResult::Rejected`.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn submit_action(
        &self,
        principal: Option<&str>,
        action: &str,
        args: &JsonValue,
    ) -> Result<ActionResult, CollaboratorError>;
}
