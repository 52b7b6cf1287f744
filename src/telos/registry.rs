use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::EngineError;
use crate::database::{DatabaseError, DatabaseInterface};

/// One agent identity known to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable unique agent ID
    pub agent_id: String,
    /// External identity reference on the governance platform, if known
    pub principal: Option<String>,
    pub display_name: String,
    /// Default persona tag used when a step does not override it
    pub persona: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub total_sessions: u64,
}

impl AgentProfile {
    pub fn new(agent_id: &str, display_name: Option<&str>, persona: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.to_string(),
            principal: None,
            display_name: display_name.unwrap_or(agent_id).to_string(),
            persona: persona.unwrap_or("compliant").to_string(),
            created_at: now,
            last_active_at: now,
            total_sessions: 0,
        }
    }
}

/// Registry of agent profiles.
///
/// `touch` is called by every runner on every step, so it retries on
/// version conflicts rather than surfacing them: concurrent touches for
/// the same agent must both land.
pub struct AgentRegistry {
    db: Arc<dyn DatabaseInterface<AgentProfile>>,
}

impl AgentRegistry {
    pub fn new(db: Arc<dyn DatabaseInterface<AgentProfile>>) -> Self {
        Self { db }
    }

    /// Fetch an agent's profile, creating it when missing
    pub async fn get_or_create(
        &self,
        agent_id: &str,
        display_name: Option<&str>,
        persona: Option<&str>,
    ) -> Result<AgentProfile, EngineError> {
        match self.db.get(&agent_id.to_string()).await {
            Ok(record) => Ok(record.entity),
            Err(DatabaseError::NotFound(_)) => {
                let profile = AgentProfile::new(agent_id, display_name, persona);
                match self.db.insert(profile).await {
                    Ok(record) => Ok(record.entity),
                    // Raced another creator; theirs wins
                    Err(DatabaseError::DuplicateKey(_)) => {
                        Ok(self.db.get(&agent_id.to_string()).await?.entity)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark the agent active: bump last_active_at and the session counter,
    /// optionally overriding the persona. Single-row atomic update, retried
    /// on conflict.
    pub async fn touch(
        &self,
        agent_id: &str,
        persona: Option<&str>,
    ) -> Result<AgentProfile, EngineError> {
        loop {
            let record = match self.db.get(&agent_id.to_string()).await {
                Ok(record) => record,
                Err(DatabaseError::NotFound(id)) => {
                    return Err(EngineError::AgentNotFound(id))
                }
                Err(e) => return Err(e.into()),
            };

            let mut profile = record.entity.clone();
            profile.last_active_at = Utc::now();
            profile.total_sessions += 1;
            if let Some(p) = persona {
                profile.persona = p.to_string();
            }

            match self.db.update(profile, Some(record.version)).await {
                Ok(updated) => return Ok(updated.entity),
                Err(DatabaseError::VersionConflict { .. }) => {
                    debug!("Concurrent touch for agent {}, retrying", agent_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All profiles, most recently active first
    pub async fn list(&self) -> Result<Vec<AgentProfile>, EngineError> {
        let mut profiles: Vec<AgentProfile> = self
            .db
            .get_all()
            .await?
            .into_iter()
            .map(|r| r.entity)
            .collect();
        profiles.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(profiles)
    }

    /// Explicit operator removal; profiles are never auto-deleted
    pub async fn remove(&self, agent_id: &str) -> Result<(), EngineError> {
        match self.db.delete(&agent_id.to_string()).await {
            Ok(()) => Ok(()),
            Err(DatabaseError::NotFound(id)) => Err(EngineError::AgentNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FileDb;
    use tempfile::TempDir;

    async fn test_registry(dir: &TempDir) -> AgentRegistry {
        let db = FileDb::new(dir.path(), "agent_profiles").await.unwrap();
        AgentRegistry::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir).await;

        let first = registry
            .get_or_create("a1", Some("Agent One"), Some("watchful"))
            .await
            .unwrap();
        assert_eq!(first.display_name, "Agent One");
        assert_eq!(first.persona, "watchful");
        assert_eq!(first.total_sessions, 0);

        // Second call returns the existing profile untouched
        let second = registry
            .get_or_create("a1", Some("Other Name"), None)
            .await
            .unwrap();
        assert_eq!(second.display_name, "Agent One");
    }

    #[tokio::test]
    async fn test_touch_bumps_counters() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir).await;

        registry.get_or_create("a1", None, None).await.unwrap();

        let touched = registry.touch("a1", None).await.unwrap();
        assert_eq!(touched.total_sessions, 1);

        let touched = registry.touch("a1", Some("exploiter")).await.unwrap();
        assert_eq!(touched.total_sessions, 2);
        assert_eq!(touched.persona, "exploiter");
    }

    #[tokio::test]
    async fn test_missing_agent_is_reported_as_agent_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir).await;

        let err = registry.touch("ghost", None).await.unwrap_err();
        assert!(matches!(err, EngineError::AgentNotFound(ref id) if id == "ghost"));

        let err = registry.remove("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_touches_all_land() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(test_registry(&dir).await);

        registry.get_or_create("a1", None, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.touch("a1", None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let profile = registry.get_or_create("a1", None, None).await.unwrap();
        assert_eq!(profile.total_sessions, 8);
    }
}
