use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::database::{DatabaseError, Record};
use crate::executor::{StepContext, StepExecutor, StepOutcomeStatus};
use crate::runner::backoff::Backoff;
use crate::runner::lease::LeaseKeeper;
use crate::telos::instance::{AgentTelos, InstanceStore};
use crate::telos::observation::{Observation, ObservationSink};
use crate::telos::registry::AgentRegistry;
use crate::telos::template::TemplateStore;

/// How many history entries go into the prompt context
const LIFE_STORY_LIMIT: usize = 20;

/// Drives one telos instance at a time: acquires the execution lease, steps
/// the mission under it, and persists every transition through a
/// version-checked update. One runner is shared by all in-process runs; the
/// lease owner string identifies this process.
pub struct TelosRunner {
    instances: Arc<InstanceStore>,
    templates: Arc<TemplateStore>,
    registry: Arc<AgentRegistry>,
    observations: Arc<ObservationSink>,
    executor: Arc<dyn StepExecutor>,
    lease: LeaseKeeper,
    backoff: Backoff,
    retry_limit: u32,
    shutdown: watch::Receiver<bool>,
}

impl TelosRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instances: Arc<InstanceStore>,
        templates: Arc<TemplateStore>,
        registry: Arc<AgentRegistry>,
        observations: Arc<ObservationSink>,
        executor: Arc<dyn StepExecutor>,
        owner: &str,
        engine: &EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            lease: LeaseKeeper::new(instances.clone(), owner, engine.lease_ttl_secs),
            instances,
            templates,
            registry,
            observations,
            executor,
            backoff: Backoff::new(engine.backoff_base_ms, engine.backoff_max_ms),
            retry_limit: engine.step_retry_limit,
            shutdown,
        }
    }

    pub fn owner(&self) -> &str {
        self.lease.owner()
    }

    /// Run one instance until it reaches a terminal state, the retry budget
    /// runs out, shutdown is requested, or the lease is lost.
    ///
    /// A [`EngineError::LeaseConflict`] from acquisition is the normal
    /// "someone else has it" signal; the scheduler treats it as a skip.
    pub async fn run(&self, instance_id: &str) -> Result<(), EngineError> {
        let mut shutdown = self.shutdown.clone();
        let mut record = self.lease.acquire(instance_id).await?;

        let agent_id = record.entity.agent_id.clone();
        let mission = record.entity.source.mission_name().to_string();

        let steps = match self.templates.steps_for(&record.entity.source).await {
            Ok(steps) => steps,
            Err(EngineError::TemplateNotFound(name)) => {
                // The mission definition is gone; nothing can ever run
                warn!("Template '{}' missing for {}", name, instance_id);
                let mut updated = record.entity.clone();
                updated.record_failure(
                    updated.current_step,
                    json!({"error": format!("template '{}' not found", name)}),
                    updated.attempts_for(updated.current_step) + 1,
                );
                updated.mark_failed();
                updated.lease = None;
                self.persist(updated, record.version).await?;
                return Ok(());
            }
            Err(e) => {
                self.lease.release(&record).await;
                return Err(e);
            }
        };

        let profile = match self.registry.get_or_create(&agent_id, None, None).await {
            Ok(profile) => profile,
            Err(e) => {
                self.lease.release(&record).await;
                return Err(e);
            }
        };

        // One lease acquisition is one agent session
        if let Err(e) = self.registry.touch(&agent_id, None).await {
            warn!("Could not touch registry for {}: {}", agent_id, e);
        }

        info!(
            "Running {} for agent {} from step {}/{}",
            mission,
            agent_id,
            record.entity.current_step,
            steps.len()
        );

        loop {
            let step_index = record.entity.current_step;

            if step_index >= steps.len() {
                let mut updated = record.entity.clone();
                updated.mark_completed();
                updated.lease = None;
                if self.persist(updated, record.version).await?.is_none() {
                    return Ok(());
                }
                info!("Mission {} completed for agent {}", mission, agent_id);
                self.observations
                    .record(Observation::new(
                        &agent_id,
                        Some(&mission),
                        "telos_completed",
                        &format!("Completed mission '{}'", mission),
                        json!({"steps": steps.len()}),
                        None,
                    ))
                    .await;
                return Ok(());
            }

            if *shutdown.borrow() {
                debug!("Shutdown requested, releasing {}", instance_id);
                self.lease.release(&record).await;
                return Ok(());
            }

            let attempt = record.entity.attempts_for(step_index) + 1;
            let context = StepContext {
                life_story: self
                    .observations
                    .life_story(&agent_id, LIFE_STORY_LIMIT)
                    .await
                    .unwrap_or_default(),
            };

            let outcome = self
                .executor
                .execute(&profile, &record.entity, &steps[step_index], &context)
                .await;

            match outcome.status {
                StepOutcomeStatus::Success => {
                    let mut updated = record.entity.clone();
                    updated.record_success(step_index, outcome.result.clone(), attempt);
                    if updated.current_step >= steps.len() {
                        updated.mark_completed();
                        updated.lease = None;
                    } else {
                        updated.lease = Some(self.lease.renewed());
                    }

                    match self.persist(updated, record.version).await? {
                        Some(new_record) => record = new_record,
                        None => return Ok(()),
                    }

                    self.observations
                        .record(Observation::new(
                            &agent_id,
                            Some(&mission),
                            "telos_step",
                            outcome
                                .observation
                                .as_deref()
                                .unwrap_or("Step completed"),
                            json!({"step": step_index, "result": outcome.result}),
                            outcome.emotion.clone(),
                        ))
                        .await;

                    if record.entity.state.is_terminal() {
                        info!("Mission {} completed for agent {}", mission, agent_id);
                        return Ok(());
                    }
                }

                StepOutcomeStatus::RetryableFailure => {
                    if attempt >= self.retry_limit {
                        warn!(
                            "Step {} of {} failed {} times, giving up",
                            step_index, instance_id, attempt
                        );
                        let mut updated = record.entity.clone();
                        updated.record_failure(step_index, outcome.result.clone(), attempt);
                        updated.mark_failed();
                        updated.lease = None;
                        self.persist(updated, record.version).await?;

                        self.observations
                            .record(Observation::new(
                                &agent_id,
                                Some(&mission),
                                "telos_failed",
                                &format!(
                                    "Mission '{}' failed at step {} after {} attempts",
                                    mission, step_index, attempt
                                ),
                                json!({"step": step_index, "result": outcome.result}),
                                None,
                            ))
                            .await;
                        return Ok(());
                    }

                    debug!(
                        "Step {} of {} failed (attempt {}), backing off",
                        step_index, instance_id, attempt
                    );
                    let mut updated = record.entity.clone();
                    updated.record_failure(step_index, outcome.result.clone(), attempt);
                    updated.lease = Some(self.lease.renewed());

                    match self.persist(updated, record.version).await? {
                        Some(new_record) => record = new_record,
                        None => return Ok(()),
                    }

                    let delay = self.backoff.delay_for(attempt, outcome.retry_after_ms);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                self.lease.release(&record).await;
                                return Ok(());
                            }
                        }
                    }
                }

                StepOutcomeStatus::FatalFailure => {
                    warn!(
                        "Step {} of {} failed fatally: {}",
                        step_index,
                        instance_id,
                        outcome
                            .observation
                            .as_deref()
                            .unwrap_or("no details")
                    );
                    let mut updated = record.entity.clone();
                    updated.record_failure(step_index, outcome.result.clone(), attempt);
                    updated.mark_failed();
                    updated.lease = None;
                    self.persist(updated, record.version).await?;

                    self.observations
                        .record(Observation::new(
                            &agent_id,
                            Some(&mission),
                            "telos_failed",
                            outcome
                                .observation
                                .as_deref()
                                .unwrap_or("Step failed fatally"),
                            json!({"step": step_index, "result": outcome.result}),
                            outcome.emotion.clone(),
                        ))
                        .await;
                    return Ok(());
                }
            }
        }
    }

    /// Version-checked write of the whole instance row. `None` means the
    /// write lost to a concurrent owner: our lease is gone, so the run must
    /// abort without further writes.
    async fn persist(
        &self,
        updated: AgentTelos,
        expected_version: u64,
    ) -> Result<Option<Record<AgentTelos>>, EngineError> {
        match self.instances.update(updated, expected_version).await {
            Ok(record) => Ok(Some(record)),
            Err(DatabaseError::VersionConflict { .. }) => {
                warn!("Lost the execution lease mid-run, aborting");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
