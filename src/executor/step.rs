use serde_json::Value as JsonValue;

use crate::core::error::EngineError;

/// Interpreted form of one opaque step payload.
///
/// Templates may use free-text steps (a bare JSON string), which are treated
/// as decision prompts, or tagged objects selecting a specific instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    /// Ask the decision collaborator to reason about a prompt
    Decide { prompt: String },
    /// Submit a governance action on the agent's behalf
    SubmitAction { action: String, args: JsonValue },
}

impl StepSpec {
    /// Parse a raw step payload. Anything that does not resolve to a known
    /// instruction kind is unsupported and fatal for the mission; the bad
    /// payload is preserved in the error for diagnosis.
    pub fn parse(raw: &JsonValue) -> Result<Self, EngineError> {
        match raw {
            JsonValue::String(prompt) => Ok(StepSpec::Decide {
                prompt: prompt.clone(),
            }),
            JsonValue::Object(map) => {
                let kind = map.get("kind").and_then(|k| k.as_str());
                match kind {
                    Some("decide") => {
                        let prompt = map
                            .get("prompt")
                            .and_then(|p| p.as_str())
                            .ok_or_else(|| {
                                EngineError::UnsupportedStep(
                                    "decide step missing 'prompt'".to_string(),
                                )
                            })?;
                        Ok(StepSpec::Decide {
                            prompt: prompt.to_string(),
                        })
                    }
                    Some("submit_action") => {
                        let action = map
                            .get("action")
                            .and_then(|a| a.as_str())
                            .ok_or_else(|| {
                                EngineError::UnsupportedStep(
                                    "submit_action step missing 'action'".to_string(),
                                )
                            })?;
                        let args = map.get("args").cloned().unwrap_or(JsonValue::Null);
                        Ok(StepSpec::SubmitAction {
                            action: action.to_string(),
                            args,
                        })
                    }
                    Some(other) => Err(EngineError::UnsupportedStep(format!(
                        "unknown step kind: {}",
                        other
                    ))),
                    None => Err(EngineError::UnsupportedStep(format!(
                        "step object has no 'kind': {}",
                        raw
                    ))),
                }
            }
            other => Err(EngineError::UnsupportedStep(format!(
                "step payload is neither string nor object: {}",
                other
            ))),
        }
    }
}

/// How one execution attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcomeStatus {
    /// The step did its job; the runner advances the cursor
    Success,
    /// Temporary collaborator trouble; the runner may retry with backoff
    RetryableFailure,
    /// The step can never succeed; the mission fails
    FatalFailure,
}

/// Result of executing a single step once
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepOutcomeStatus,
    /// Payload to persist into the instance's step record
    pub result: JsonValue,
    /// Human-readable summary for the observation journal
    pub observation: Option<String>,
    /// Optional qualitative annotation for the journal
    pub emotion: Option<String>,
    /// Collaborator's suggested retry delay, if it gave one
    pub retry_after_ms: Option<u64>,
}

impl StepOutcome {
    pub fn success(result: JsonValue, observation: impl Into<String>) -> Self {
        Self {
            status: StepOutcomeStatus::Success,
            result,
            observation: Some(observation.into()),
            emotion: None,
            retry_after_ms: None,
        }
    }

    pub fn retryable(result: JsonValue, retry_after_ms: Option<u64>) -> Self {
        Self {
            status: StepOutcomeStatus::RetryableFailure,
            result,
            observation: None,
            emotion: None,
            retry_after_ms,
        }
    }

    pub fn fatal(result: JsonValue, observation: impl Into<String>) -> Self {
        Self {
            status: StepOutcomeStatus::FatalFailure,
            result,
            observation: Some(observation.into()),
            emotion: None,
            retry_after_ms: None,
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_is_a_decide_prompt() {
        let spec = StepSpec::parse(&json!("Introduce yourself to the community")).unwrap();
        assert_eq!(
            spec,
            StepSpec::Decide {
                prompt: "Introduce yourself to the community".to_string()
            }
        );
    }

    #[test]
    fn test_tagged_decide() {
        let spec = StepSpec::parse(&json!({"kind": "decide", "prompt": "Vote?"})).unwrap();
        assert_eq!(
            spec,
            StepSpec::Decide {
                prompt: "Vote?".to_string()
            }
        );
    }

    #[test]
    fn test_tagged_submit_action() {
        let spec = StepSpec::parse(&json!({
            "kind": "submit_action",
            "action": "vote",
            "args": {"proposal": 7}
        }))
        .unwrap();
        assert_eq!(
            spec,
            StepSpec::SubmitAction {
                action: "vote".to_string(),
                args: json!({"proposal": 7})
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let err = StepSpec::parse(&json!({"kind": "teleport"})).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStep(_)));
    }

    #[test]
    fn test_non_string_non_object_is_unsupported() {
        let err = StepSpec::parse(&json!(42)).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStep(_)));

        let err = StepSpec::parse(&json!(["a", "b"])).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStep(_)));
    }

    #[test]
    fn test_decide_without_prompt_is_unsupported() {
        let err = StepSpec::parse(&json!({"kind": "decide"})).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStep(_)));
    }
}
