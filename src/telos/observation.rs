use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::error::EngineError;
use crate::database::DatabaseInterface;

/// Append-only record of what one agent did or noticed during a step.
/// Written by the runner, read by dashboards and by later steps that want
/// the agent's history in their prompt context. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub agent_id: String,
    /// Mission name this happened under, if any
    pub mission: Option<String>,
    /// Kind of action (e.g. "telos_step", "join", "vote")
    pub action_type: String,
    /// Brief human-readable summary
    pub summary: String,
    /// Full details (step payload, collaborator results)
    pub detail: JsonValue,
    /// Optional qualitative annotation ("satisfied", "suspicious", ...)
    pub emotion: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        agent_id: &str,
        mission: Option<&str>,
        action_type: &str,
        summary: &str,
        detail: JsonValue,
        emotion: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            mission: mission.map(String::from),
            action_type: action_type.to_string(),
            summary: summary.to_string(),
            detail,
            emotion,
            created_at: Utc::now(),
        }
    }
}

/// Write-through sink and query surface for observations
pub struct ObservationSink {
    db: Arc<dyn DatabaseInterface<Observation>>,
}

impl ObservationSink {
    pub fn new(db: Arc<dyn DatabaseInterface<Observation>>) -> Self {
        Self { db }
    }

    /// Append an observation. Failures are logged and swallowed: a missed
    /// journal entry must never fail the step that produced it.
    pub async fn record(&self, observation: Observation) {
        if let Err(e) = self.db.insert(observation.clone()).await {
            warn!(
                "Could not record observation for agent {}: {}",
                observation.agent_id, e
            );
        }
    }

    /// Most recent observations for an agent, newest first
    pub async fn recent(&self, agent_id: &str, limit: usize) -> Result<Vec<Observation>, EngineError> {
        let mut observations: Vec<Observation> = self
            .db
            .get_all()
            .await?
            .into_iter()
            .map(|r| r.entity)
            .filter(|o| o.agent_id == agent_id)
            .collect();
        observations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        observations.truncate(limit);
        Ok(observations)
    }

    /// A prompt section summarizing the agent's history, oldest first,
    /// injected into decide-steps so the agent "remembers" past sessions.
    pub async fn life_story(&self, agent_id: &str, max_entries: usize) -> Result<String, EngineError> {
        let observations = self.recent(agent_id, max_entries).await?;

        let mut lines = vec!["YOUR HISTORY:".to_string()];
        if observations.is_empty() {
            lines.push("- This is your first session.".to_string());
        } else {
            for obs in observations.iter().rev() {
                let mut entry = format!(
                    "  [{}] {}: {}",
                    obs.created_at.format("%Y-%m-%d %H:%M"),
                    obs.action_type.to_uppercase(),
                    obs.summary
                );
                if let Some(emotion) = &obs.emotion {
                    entry.push_str(&format!(" (felt: {})", emotion));
                }
                lines.push(entry);
            }
        }

        Ok(lines.join("\n"))
    }
}
