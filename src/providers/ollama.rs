use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::time::sleep;

use crate::core::config::LlmConfig;
use crate::core::error::CollaboratorError;
use crate::providers::DecisionProvider;

/// Ollama-backed decision provider.
/// Talks to the /api/chat endpoint, non-streaming.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    ready_timeout: Duration,
}

impl OllamaProvider {
    /// Create an Ollama provider from LlmConfig
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // Ollama can be slow on first model load
            .build()
            .map_err(|e| {
                CollaboratorError::transient(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            ready_timeout: Duration::from_secs(cfg.ready_timeout_secs),
        })
    }

    /// Block until the Ollama server answers on its base URL, or the
    /// configured timeout elapses. Used once before scheduling starts so
    /// the swarm does not burn retry budgets on a backend that is still
    /// booting.
    pub async fn wait_until_ready(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;

        while tokio::time::Instant::now() < deadline {
            match self.client.get(&self.base_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Ollama ready at {}", self.base_url);
                    return true;
                }
                _ => sleep(Duration::from_secs(2)).await,
            }
        }

        warn!(
            "Ollama at {} not ready after {:?}",
            self.base_url, self.ready_timeout
        );
        false
    }

    fn map_http_error(&self, status: u16, body: String) -> CollaboratorError {
        if status == 429 {
            CollaboratorError::Transient {
                message: "Ollama rate limited the request".to_string(),
                retry_after_ms: Some(2000),
            }
        } else if status >= 500 {
            CollaboratorError::transient(format!("Ollama server error (HTTP {}): {}", status, body))
        } else if status == 404 {
            CollaboratorError::rejected(format!(
                "Model '{}' not found in Ollama; try 'ollama pull {}' ({})",
                self.model, self.model, body
            ))
        } else {
            CollaboratorError::rejected(format!("Ollama refused the request (HTTP {}): {}", status, body))
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<JsonValue>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: i32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl DecisionProvider for OllamaProvider {
    async fn decide(&self, persona: &str, prompt: &str) -> Result<String, CollaboratorError> {
        let url = format!("{}/api/chat", self.base_url);

        let payload = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                json!({
                    "role": "system",
                    "content": format!("You are a {} AI agent.", persona),
                }),
                json!({
                    "role": "user",
                    "content": prompt,
                }),
            ],
            stream: false,
            options: OllamaOptions {
                num_predict: self.max_tokens as i32,
                temperature: self.temperature,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::transient(format!("Ollama timed out: {}", e))
                } else {
                    CollaboratorError::transient(format!("Ollama network error: {}", e))
                }
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            CollaboratorError::transient(format!("Failed reading Ollama response: {}", e))
        })?;

        if !(200..300).contains(&status) {
            return Err(self.map_http_error(status, text));
        }

        let ollama_response: OllamaChatResponse = serde_json::from_str(&text).map_err(|e| {
            CollaboratorError::transient(format!("Invalid JSON from Ollama: {}", e))
        })?;

        let content = ollama_response.message.content.trim().to_string();
        if content.is_empty() {
            return Err(CollaboratorError::rejected(
                "Ollama returned an empty response",
            ));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn provider_for(server: &MockServer) -> OllamaProvider {
        OllamaProvider::from_config(&LlmConfig {
            api_base: server.base_url(),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            ready_timeout_secs: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_decide_returns_content() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200)
                .json_body(json!({"message": {"content": "I will join."}, "done": true}));
        });

        let provider = provider_for(&server);
        let decision = provider.decide("compliant", "Decide now.").await.unwrap();
        assert_eq!(decision, "I will join.");
        mock.assert();
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(429).body("slow down");
        });

        let provider = provider_for(&server);
        let err = provider.decide("compliant", "Decide now.").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Transient { .. }));
    }

    #[tokio::test]
    async fn test_missing_model_names_the_configured_model() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(404).body("model \"test-model\" not found");
        });

        let provider = provider_for(&server);
        let err = provider.decide("compliant", "Decide now.").await.unwrap_err();
        match err {
            CollaboratorError::Rejected { reason } => {
                assert!(reason.contains("ollama pull test-model"));
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_request_maps_to_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(400).body("invalid request");
        });

        let provider = provider_for(&server);
        let err = provider.decide("compliant", "Decide now.").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected { .. }));
    }
}
