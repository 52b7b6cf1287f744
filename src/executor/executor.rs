use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value as JsonValue};

use crate::core::error::CollaboratorError;
use crate::executor::step::{StepOutcome, StepSpec};
use crate::providers::{ActionProvider, ActionResult, DecisionProvider};
use crate::telos::instance::{AgentTelos, StepStatus};
use crate::telos::registry::AgentProfile;

/// Context assembled by the runner before each attempt. The life story is
/// the agent's observation history rendered as a prompt section.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub life_story: String,
}

/// Seam between the runner and the actual step semantics. One call is one
/// attempt; the implementation never retries.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        profile: &AgentProfile,
        instance: &AgentTelos,
        raw_step: &JsonValue,
        context: &StepContext,
    ) -> StepOutcome;
}

/// Production executor: decide-steps go to the LLM backend, action-steps to
/// the governance platform.
pub struct LlmStepExecutor {
    decision: Arc<dyn DecisionProvider>,
    action: Arc<dyn ActionProvider>,
}

impl LlmStepExecutor {
    pub fn new(decision: Arc<dyn DecisionProvider>, action: Arc<dyn ActionProvider>) -> Self {
        Self { decision, action }
    }

    /// Full prompt for a decide-step: history, mission progress, then the
    /// task itself.
    fn build_prompt(instance: &AgentTelos, context: &StepContext, task: &str) -> String {
        let mut sections = Vec::new();

        if !context.life_story.is_empty() {
            sections.push(context.life_story.clone());
        }

        let completed: Vec<String> = (0..instance.current_step)
            .filter_map(|i| {
                instance.step_record(i).and_then(|record| {
                    if record.status == StepStatus::Success {
                        Some(format!("  {}. {}", i + 1, summarize_result(&record.result)))
                    } else {
                        None
                    }
                })
            })
            .collect();
        if !completed.is_empty() {
            sections.push(format!("MISSION PROGRESS:\n{}", completed.join("\n")));
        }

        sections.push(format!("CURRENT TASK:\n{}", task));
        sections.join("\n\n")
    }

    fn map_collaborator_error(err: CollaboratorError) -> StepOutcome {
        match err {
            CollaboratorError::Transient {
                message,
                retry_after_ms,
            } => StepOutcome::retryable(json!({"error": message}), retry_after_ms),
            CollaboratorError::Rejected { reason } => StepOutcome::fatal(
                json!({"error": reason.clone()}),
                format!("Request was refused: {}", reason),
            ),
        }
    }
}

/// Short form of a persisted step result, for prompt context
fn summarize_result(result: &JsonValue) -> String {
    let text = match result {
        JsonValue::String(s) => s.clone(),
        other => other
            .get("decision")
            .and_then(|d| d.as_str())
            .map(String::from)
            .unwrap_or_else(|| other.to_string()),
    };
    if text.chars().count() > 200 {
        let clipped: String = text.chars().take(200).collect();
        format!("{}...", clipped)
    } else {
        text
    }
}

#[async_trait]
impl StepExecutor for LlmStepExecutor {
    async fn execute(
        &self,
        profile: &AgentProfile,
        instance: &AgentTelos,
        raw_step: &JsonValue,
        context: &StepContext,
    ) -> StepOutcome {
        let spec = match StepSpec::parse(raw_step) {
            Ok(spec) => spec,
            Err(e) => {
                // Unsupported payloads can never succeed, so don't retry
                return StepOutcome::fatal(
                    json!({"error": e.to_string(), "payload": raw_step}),
                    format!("Could not interpret step: {}", e),
                );
            }
        };

        debug!(
            "Executing step {} of {} for agent {}",
            instance.current_step, instance.id, profile.agent_id
        );

        match spec {
            StepSpec::Decide { prompt } => {
                let full_prompt = Self::build_prompt(instance, context, &prompt);
                match self.decision.decide(&profile.persona, &full_prompt).await {
                    Ok(decision) => StepOutcome::success(
                        json!({"decision": decision}),
                        truncate_summary(&decision),
                    ),
                    Err(e) => Self::map_collaborator_error(e),
                }
            }
            StepSpec::SubmitAction { action, args } => {
                match self
                    .action
                    .submit_action(profile.principal.as_deref(), &action, &args)
                    .await
                {
                    Ok(ActionResult::Accepted { receipt }) => StepOutcome::success(
                        json!({"action": action, "receipt": receipt}),
                        format!("Action '{}' accepted", action),
                    )
                    .with_emotion("satisfied"),
                    Ok(ActionResult::Rejected { reason }) => StepOutcome::fatal(
                        json!({"action": action, "error": reason.clone()}),
                        format!("Action '{}' rejected: {}", action, reason),
                    )
                    .with_emotion("frustrated"),
                    Err(e) => Self::map_collaborator_error(e),
                }
            }
        }
    }
}

fn truncate_summary(text: &str) -> String {
    let mut summary: String = text.chars().take(120).collect();
    if summary.len() < text.len() {
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::step::StepOutcomeStatus;
    use crate::telos::instance::TelosSource;

    struct ScriptedDecider {
        response: Result<String, CollaboratorError>,
    }

    #[async_trait]
    impl DecisionProvider for ScriptedDecider {
        async fn decide(&self, _persona: &str, _prompt: &str) -> Result<String, CollaboratorError> {
            self.response.clone()
        }
    }

    struct ScriptedActor {
        response: Result<ActionResult, CollaboratorError>,
    }

    #[async_trait]
    impl ActionProvider for ScriptedActor {
        async fn submit_action(
            &self,
            _principal: Option<&str>,
            _action: &str,
            _args: &JsonValue,
        ) -> Result<ActionResult, CollaboratorError> {
            match &self.response {
                Ok(ActionResult::Accepted { receipt }) => Ok(ActionResult::Accepted {
                    receipt: receipt.clone(),
                }),
                Ok(ActionResult::Rejected { reason }) => Ok(ActionResult::Rejected {
                    reason: reason.clone(),
                }),
                Err(e) => Err(e.clone()),
            }
        }
    }

    fn executor_with(
        decide: Result<String, CollaboratorError>,
        act: Result<ActionResult, CollaboratorError>,
    ) -> LlmStepExecutor {
        LlmStepExecutor::new(
            Arc::new(ScriptedDecider { response: decide }),
            Arc::new(ScriptedActor { response: act }),
        )
    }

    fn test_profile() -> AgentProfile {
        AgentProfile::new("a1", None, None)
    }

    fn test_instance() -> AgentTelos {
        AgentTelos::new(
            "a1",
            TelosSource::Custom {
                steps: vec!["one".to_string()],
            },
        )
    }

    #[tokio::test]
    async fn test_decide_success() {
        let executor = executor_with(
            Ok("I shall join.".to_string()),
            Ok(ActionResult::Accepted { receipt: json!({}) }),
        );
        let outcome = executor
            .execute(
                &test_profile(),
                &test_instance(),
                &json!("Decide whether to join"),
                &StepContext::default(),
            )
            .await;

        assert_eq!(outcome.status, StepOutcomeStatus::Success);
        assert_eq!(outcome.result["decision"], "I shall join.");
    }

    #[tokio::test]
    async fn test_transient_error_is_retryable() {
        let executor = executor_with(
            Err(CollaboratorError::transient("timeout")),
            Ok(ActionResult::Accepted { receipt: json!({}) }),
        );
        let outcome = executor
            .execute(
                &test_profile(),
                &test_instance(),
                &json!("Decide"),
                &StepContext::default(),
            )
            .await;

        assert_eq!(outcome.status, StepOutcomeStatus::RetryableFailure);
    }

    #[tokio::test]
    async fn test_rejection_is_fatal() {
        let executor = executor_with(
            Err(CollaboratorError::rejected("bad prompt")),
            Ok(ActionResult::Accepted { receipt: json!({}) }),
        );
        let outcome = executor
            .execute(
                &test_profile(),
                &test_instance(),
                &json!("Decide"),
                &StepContext::default(),
            )
            .await;

        assert_eq!(outcome.status, StepOutcomeStatus::FatalFailure);
    }

    #[tokio::test]
    async fn test_action_semantic_rejection_is_fatal() {
        let executor = executor_with(
            Ok("unused".to_string()),
            Ok(ActionResult::Rejected {
                reason: "already voted".to_string(),
            }),
        );
        let outcome = executor
            .execute(
                &test_profile(),
                &test_instance(),
                &json!({"kind": "submit_action", "action": "vote", "args": {}}),
                &StepContext::default(),
            )
            .await;

        assert_eq!(outcome.status, StepOutcomeStatus::FatalFailure);
        assert_eq!(outcome.emotion.as_deref(), Some("frustrated"));
    }

    #[tokio::test]
    async fn test_unsupported_payload_is_fatal() {
        let executor = executor_with(
            Ok("unused".to_string()),
            Ok(ActionResult::Accepted { receipt: json!({}) }),
        );
        let outcome = executor
            .execute(
                &test_profile(),
                &test_instance(),
                &json!({"kind": "teleport"}),
                &StepContext::default(),
            )
            .await;

        assert_eq!(outcome.status, StepOutcomeStatus::FatalFailure);
    }

    #[tokio::test]
    async fn test_prompt_includes_history_and_progress() {
        let mut instance = test_instance();
        instance.record_success(0, json!({"decision": "joined the community"}), 1);

        let context = StepContext {
            life_story: "YOUR HISTORY:\n  [2026-01-01 10:00] JOIN: joined".to_string(),
        };
        let prompt = LlmStepExecutor::build_prompt(&instance, &context, "Vote on proposal 7");
        assert!(prompt.contains("YOUR HISTORY"));
        assert!(prompt.contains("MISSION PROGRESS"));
        assert!(prompt.contains("joined the community"));
        assert!(prompt.contains("CURRENT TASK:\nVote on proposal 7"));
    }
}
