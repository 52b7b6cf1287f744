use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::config::PlatformConfig;
use crate::core::error::CollaboratorError;
use crate::providers::{ActionProvider, ActionResult};

/// HTTP client for the governance platform's action API.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    network: String,
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    principal: Option<&'a str>,
    network: &'a str,
    action: &'a str,
    args: &'a JsonValue,
}

#[derive(Deserialize)]
struct ActionResponse {
    status: String,
    #[serde(default)]
    receipt: JsonValue,
    #[serde(default)]
    reason: Option<String>,
}

impl PlatformClient {
    /// Create a platform client from PlatformConfig
    pub fn from_config(cfg: &PlatformConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| {
                CollaboratorError::transient(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            network: cfg.network.clone(),
        })
    }
}

#[async_trait]
impl ActionProvider for PlatformClient {
    async fn submit_action(
        &self,
        principal: Option<&str>,
        action: &str,
        args: &JsonValue,
    ) -> Result<ActionResult, CollaboratorError> {
        let url = format!("{}/api/actions", self.base_url);

        let payload = ActionRequest {
            principal,
            network: &self.network,
            action,
            args,
        };

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::transient(format!("Platform request timed out: {}", e))
                } else {
                    CollaboratorError::transient(format!("Platform network error: {}", e))
                }
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            CollaboratorError::transient(format!("Failed reading platform response: {}", e))
        })?;

        if status == 429 {
            return Err(CollaboratorError::Transient {
                message: "Platform rate limited the request".to_string(),
                retry_after_ms: Some(2000),
            });
        }
        if status >= 500 {
            return Err(CollaboratorError::transient(format!(
                "Platform server error (HTTP {}): {}",
                status, text
            )));
        }
        if status >= 400 {
            return Err(CollaboratorError::rejected(format!(
                "Platform refused action '{}' (HTTP {}): {}",
                action, status, text
            )));
        }

        let body: ActionResponse = serde_json::from_str(&text).map_err(|e| {
            CollaboratorError::transient(format!("Invalid JSON from platform: {}", e))
        })?;

        match body.status.as_str() {
            "accepted" => Ok(ActionResult::Accepted {
                receipt: body.receipt,
            }),
            "rejected" => Ok(ActionResult::Rejected {
                reason: body
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            }),
            other => Err(CollaboratorError::transient(format!(
                "Unknown platform action status: {}",
                other
            ))),
        }
    }
}
