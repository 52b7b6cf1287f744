//! End-to-end scenarios against the file-backed store with scripted
//! collaborators: mission progress, retries, fatal failures, crash
//! recovery and lease behavior.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tokio::sync::watch;

use hive::core::config::Config;
use hive::core::error::{CollaboratorError, EngineError};
use hive::database::DatabaseManager;
use hive::executor::LlmStepExecutor;
use hive::providers::{ActionProvider, ActionResult, DecisionProvider};
use hive::runner::TelosRunner;
use hive::telos::instance::{
    AgentTelos, InstanceStore, Lease, StepStatus, TelosSource, TelosState,
};
use hive::telos::observation::ObservationSink;
use hive::telos::registry::AgentRegistry;
use hive::telos::template::TemplateStore;

/// Decision collaborator that replays a fixed script of responses
struct ScriptedDecider {
    script: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    calls: Mutex<u32>,
}

impl ScriptedDecider {
    fn new(script: Vec<Result<String, CollaboratorError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedDecider {
    async fn decide(&self, _persona: &str, _prompt: &str) -> Result<String, CollaboratorError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("default decision".to_string()))
    }
}

/// Action collaborator that accepts everything
struct AcceptingActor;

#[async_trait]
impl ActionProvider for AcceptingActor {
    async fn submit_action(
        &self,
        _principal: Option<&str>,
        _action: &str,
        _args: &JsonValue,
    ) -> Result<ActionResult, CollaboratorError> {
        Ok(ActionResult::Accepted {
            receipt: json!({"tx": "ok"}),
        })
    }
}

struct Harness {
    instances: Arc<InstanceStore>,
    runner: Arc<TelosRunner>,
    shutdown_tx: watch::Sender<bool>,
}

async fn harness(dir: &TempDir, decider: Arc<ScriptedDecider>) -> Harness {
    let config = Config::for_testing(dir.path().to_str().unwrap());
    let db = DatabaseManager::new(&config).await.unwrap();

    let templates = Arc::new(TemplateStore::new(db.templates()));
    let registry = Arc::new(AgentRegistry::new(db.profiles()));
    let instances = Arc::new(InstanceStore::new(db.instances()));
    let observations = Arc::new(ObservationSink::new(db.observations()));

    let executor = Arc::new(LlmStepExecutor::new(decider, Arc::new(AcceptingActor)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = Arc::new(TelosRunner::new(
        instances.clone(),
        templates,
        registry,
        observations,
        executor,
        "test-runner",
        &config.engine,
        shutdown_rx,
    ));

    Harness {
        instances,
        runner,
        shutdown_tx,
    }
}

fn three_step_source() -> TelosSource {
    TelosSource::Custom {
        steps: vec![
            "introduce yourself".to_string(),
            "review the open proposals".to_string(),
            "cast your vote".to_string(),
        ],
    }
}

fn assert_invariant(instance: &AgentTelos) {
    assert_eq!(
        instance.current_step,
        instance.success_count(),
        "current_step must equal the number of successful steps"
    );
}

#[tokio::test]
async fn test_happy_path_with_flaky_middle_step() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![
        Ok("done with step one".to_string()),
        Err(CollaboratorError::transient("backend hiccup")),
        Err(CollaboratorError::transient("backend hiccup")),
        Ok("done with step two".to_string()),
        Ok("done with step three".to_string()),
    ]);
    let h = harness(&dir, decider.clone()).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();
    h.runner.run("a1::custom").await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    let instance = &record.entity;

    assert_eq!(instance.state, TelosState::Completed);
    assert_eq!(instance.current_step, 3);
    assert_invariant(instance);
    assert!(instance.lease.is_none());
    assert!(instance.completed_at.is_some());

    // The flaky step took three attempts, all persisted on its record
    assert_eq!(instance.step_record(1).unwrap().attempts, 3);
    assert_eq!(instance.step_record(1).unwrap().status, StepStatus::Success);
    assert_eq!(decider.call_count(), 5);

    // Terminal instances are scheduler no-ops
    assert!(!instance.is_schedulable());
}

#[tokio::test]
async fn test_fatal_failure_halts_and_reset_resumes() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![
        Ok("done with step one".to_string()),
        Err(CollaboratorError::rejected("that prompt is not allowed")),
        // Replayed after the reset
        Ok("done with step two".to_string()),
        Ok("done with step three".to_string()),
    ]);
    let h = harness(&dir, decider.clone()).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();
    h.runner.run("a1::custom").await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    let instance = &record.entity;

    assert_eq!(instance.state, TelosState::Failed);
    assert_eq!(instance.current_step, 1);
    assert_invariant(instance);

    // The failing step's record carries the reason
    let failed = instance.step_record(1).unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert!(failed.result["error"]
        .as_str()
        .unwrap()
        .contains("not allowed"));

    // A failed instance is never picked up again until reset
    assert!(!instance.is_schedulable());
    let err = h.runner.run("a1::custom").await.unwrap_err();
    assert!(matches!(err, EngineError::LeaseConflict { .. }));
    assert_eq!(decider.call_count(), 2);

    // Reset re-arms at the failed step; history survives
    let reset = h.instances.reset("a1::custom").await.unwrap();
    assert_eq!(reset.state, TelosState::Idle);
    assert_eq!(reset.current_step, 1);
    assert!(reset.step_record(0).is_some());

    h.runner.run("a1::custom").await.unwrap();
    let record = h.instances.get("a1::custom").await.unwrap();
    assert_eq!(record.entity.state, TelosState::Completed);
    assert_invariant(&record.entity);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_after_exact_attempts() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![
        Err(CollaboratorError::transient("down")),
        Err(CollaboratorError::transient("down")),
        Err(CollaboratorError::transient("down")),
        // Never reached: the budget is three attempts
        Ok("too late".to_string()),
    ]);
    let h = harness(&dir, decider.clone()).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();
    h.runner.run("a1::custom").await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    let instance = &record.entity;

    assert_eq!(instance.state, TelosState::Failed);
    assert_eq!(instance.current_step, 0);
    assert_eq!(instance.step_record(0).unwrap().attempts, 3);
    assert_eq!(decider.call_count(), 3);
    assert_invariant(instance);
}

#[tokio::test]
async fn test_crash_resume_from_expired_lease() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![
        Ok("done with step two".to_string()),
        Ok("done with step three".to_string()),
    ]);
    let h = harness(&dir, decider.clone()).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();

    // Simulate a previous owner that died mid-mission: step 0 done, row
    // still active, lease long expired.
    let record = h.instances.get("a1::custom").await.unwrap();
    let mut crashed = record.entity.clone();
    crashed.mark_active();
    crashed.record_success(0, json!({"decision": "done with step one"}), 1);
    crashed.lease = Some(Lease {
        owner: "dead-runner".to_string(),
        expires_at: chrono::Utc::now() - chrono::Duration::seconds(60),
    });
    h.instances.update(crashed, record.version).await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    assert!(record.entity.is_schedulable());

    h.runner.run("a1::custom").await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    let instance = &record.entity;
    assert_eq!(instance.state, TelosState::Completed);
    assert_eq!(instance.current_step, 3);
    assert_invariant(instance);

    // Only the remaining two steps were executed
    assert_eq!(decider.call_count(), 2);
    assert_eq!(instance.step_record(0).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_live_lease_blocks_other_runners() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![]);
    let h = harness(&dir, decider).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();

    // A live foreign lease
    let record = h.instances.get("a1::custom").await.unwrap();
    let mut held = record.entity.clone();
    held.mark_active();
    held.lease = Some(Lease::new("other-runner", chrono::Duration::seconds(300)));
    h.instances.update(held, record.version).await.unwrap();

    let err = h.runner.run("a1::custom").await.unwrap_err();
    assert!(
        matches!(err, EngineError::LeaseConflict { ref owner, .. } if owner == "other-runner")
    );

    // Nothing was written
    let record = h.instances.get("a1::custom").await.unwrap();
    assert_eq!(record.entity.current_step, 0);
    assert!(record.entity.step_results.is_empty());
}

#[tokio::test]
async fn test_shutdown_releases_lease_between_steps() {
    let dir = TempDir::new().unwrap();
    let decider = ScriptedDecider::new(vec![Ok("done with step one".to_string())]);
    let h = harness(&dir, decider.clone()).await;

    h.instances.assign("a1", three_step_source()).await.unwrap();

    // Shutdown already signalled: the runner acquires, sees the flag
    // before the first step, and releases cleanly.
    h.shutdown_tx.send(true).unwrap();
    h.runner.run("a1::custom").await.unwrap();

    let record = h.instances.get("a1::custom").await.unwrap();
    assert!(record.entity.lease.is_none());
    assert_eq!(record.entity.current_step, 0);
    assert_eq!(decider.call_count(), 0);
    // Active with no lease: eligible again on the next pass
    assert!(record.entity.is_schedulable());
}
