use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::error::EngineError;
use crate::database::{DatabaseError, DatabaseInterface, DbResult, Record};

/// Overall state of a telos instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelosState {
    /// Assigned but not currently being stepped
    Idle,
    /// A runner is (or was, before a crash) working through the steps
    Active,
    /// All steps finished successfully
    Completed,
    /// A step failed fatally or exhausted its retry budget
    Failed,
}

impl TelosState {
    /// Terminal states are never picked up by the scheduler
    pub fn is_terminal(&self) -> bool {
        matches!(self, TelosState::Completed | TelosState::Failed)
    }
}

impl std::fmt::Display for TelosState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TelosState::Idle => "idle",
            TelosState::Active => "active",
            TelosState::Completed => "completed",
            TelosState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TelosState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TelosState::Idle),
            "active" => Ok(TelosState::Active),
            "completed" => Ok(TelosState::Completed),
            "failed" => Ok(TelosState::Failed),
            other => Err(EngineError::ConfigError(format!(
                "unknown telos state: {}",
                other
            ))),
        }
    }
}

/// Terminal status of one persisted step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Persisted result of one step, including the retry counter for that step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub result: JsonValue,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

/// Where an instance's steps come from: a shared named template (with the
/// step count snapshotted at assignment time) or an inline custom mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelosSource {
    Template { name: String, step_count: usize },
    Custom { steps: Vec<String> },
}

impl TelosSource {
    /// Mission name used in the instance ID and in observations
    pub fn mission_name(&self) -> &str {
        match self {
            TelosSource::Template { name, .. } => name,
            TelosSource::Custom { .. } => "custom",
        }
    }

    /// Number of steps as known at assignment time
    pub fn step_count(&self) -> usize {
        match self {
            TelosSource::Template { step_count, .. } => *step_count,
            TelosSource::Custom { steps } => steps.len(),
        }
    }
}

/// A time-bounded execution lease. The holder named by `owner` is the only
/// runner allowed to step the instance until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: &str, ttl: chrono::Duration) -> Self {
        Self {
            owner: owner.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    /// An expired lease is reclaimable by any scheduler (crash recovery)
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// One agent's assignment of a telos: the persisted state machine row.
///
/// Step results are keyed by the decimal step index, matching the 0-based
/// `current_step` cursor. The standing invariant is that `current_step`
/// equals the number of success entries; a failed entry may exist at
/// `current_step` itself (the step being retried or the one that killed
/// the mission) but never below it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTelos {
    /// `"{agent_id}::{mission}"` — one row per (agent, mission) assignment
    pub id: String,
    pub agent_id: String,
    pub source: TelosSource,
    /// Index of the next step to attempt (0-based)
    pub current_step: usize,
    /// Step index (as decimal string) -> persisted outcome
    pub step_results: BTreeMap<String, StepRecord>,
    pub state: TelosState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution lease; None when no runner owns the instance
    pub lease: Option<Lease>,
}

impl AgentTelos {
    /// Create a fresh idle assignment
    pub fn new(agent_id: &str, source: TelosSource) -> Self {
        Self {
            id: format!("{}::{}", agent_id, source.mission_name()),
            agent_id: agent_id.to_string(),
            source,
            current_step: 0,
            step_results: BTreeMap::new(),
            state: TelosState::Idle,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            lease: None,
        }
    }

    /// Number of steps recorded as successful
    pub fn success_count(&self) -> usize {
        self.step_results
            .values()
            .filter(|r| r.status == StepStatus::Success)
            .count()
    }

    /// The persisted record for a step, if any
    pub fn step_record(&self, step: usize) -> Option<&StepRecord> {
        self.step_results.get(&step.to_string())
    }

    /// Attempts already spent on a step (survives reset and crash)
    pub fn attempts_for(&self, step: usize) -> u32 {
        self.step_record(step).map(|r| r.attempts).unwrap_or(0)
    }

    fn set_step_record(&mut self, step: usize, record: StepRecord) {
        self.step_results.insert(step.to_string(), record);
    }

    /// Record a successful step and advance the cursor
    pub fn record_success(&mut self, step: usize, result: JsonValue, attempts: u32) {
        self.set_step_record(
            step,
            StepRecord {
                status: StepStatus::Success,
                result,
                timestamp: Utc::now(),
                attempts,
            },
        );
        self.current_step = step + 1;
    }

    /// Record a failed attempt at a step without advancing the cursor
    pub fn record_failure(&mut self, step: usize, result: JsonValue, attempts: u32) {
        self.set_step_record(
            step,
            StepRecord {
                status: StepStatus::Failed,
                result,
                timestamp: Utc::now(),
                attempts,
            },
        );
    }

    /// Enter the active state, stamping started_at on first activation
    pub fn mark_active(&mut self) {
        self.state = TelosState::Active;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self) {
        self.state = TelosState::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.state = TelosState::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Operator reset: re-arm at current_step without clearing history.
    /// Also clears completed_at and any stale lease.
    pub fn re_arm(&mut self) {
        self.state = TelosState::Idle;
        self.completed_at = None;
        self.lease = None;
    }

    /// Whether the scheduler may hand this instance to a runner:
    /// idle, or active with no live lease (crashed owner).
    pub fn is_schedulable(&self) -> bool {
        match self.state {
            TelosState::Idle => true,
            TelosState::Active => match &self.lease {
                Some(lease) => lease.is_expired(),
                None => true,
            },
            _ => false,
        }
    }

    /// Fairness key for scheduling order: oldest started first, with
    /// never-started instances ordered by assignment time.
    pub fn scheduling_key(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }
}

/// Store wrapper for telos instances
pub struct InstanceStore {
    db: Arc<dyn DatabaseInterface<AgentTelos>>,
}

impl InstanceStore {
    pub fn new(db: Arc<dyn DatabaseInterface<AgentTelos>>) -> Self {
        Self { db }
    }

    /// Assign a mission to an agent, creating an idle instance.
    /// Re-assigning the same mission to the same agent is a conflict.
    pub async fn assign(&self, agent_id: &str, source: TelosSource) -> Result<AgentTelos, EngineError> {
        let instance = AgentTelos::new(agent_id, source);
        match self.db.insert(instance.clone()).await {
            Ok(record) => Ok(record.entity),
            Err(DatabaseError::DuplicateKey(id)) => Err(EngineError::DuplicateInstance(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Record<AgentTelos>, EngineError> {
        match self.db.get(&id.to_string()).await {
            Ok(record) => Ok(record),
            Err(DatabaseError::NotFound(id)) => Err(EngineError::InstanceNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> DbResult<Vec<Record<AgentTelos>>> {
        self.db.get_all().await
    }

    /// Versioned write-through; the caller's expected version makes the
    /// step-persist and lease writes conditional.
    pub async fn update(
        &self,
        entity: AgentTelos,
        expected_version: u64,
    ) -> DbResult<Record<AgentTelos>> {
        self.db.update(entity, Some(expected_version)).await
    }

    /// Operator reset: re-arm a terminal or stuck instance to idle so the
    /// scheduler resumes it from current_step.
    pub async fn reset(&self, id: &str) -> Result<AgentTelos, EngineError> {
        loop {
            let record = self.get(id).await?;
            let mut instance = record.entity.clone();
            instance.re_arm();
            match self.db.update(instance, Some(record.version)).await {
                Ok(updated) => return Ok(updated.entity),
                Err(DatabaseError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Tear down all of an agent's instances. Returns how many were removed.
    pub async fn remove_for_agent(&self, agent_id: &str) -> Result<usize, EngineError> {
        let records = self.db.get_all().await?;
        let mut removed = 0;
        for record in records {
            if record.entity.agent_id == agent_id {
                self.db.delete(&record.entity.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
