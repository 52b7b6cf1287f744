use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::runner::TelosRunner;
use crate::telos::instance::InstanceStore;

/// Periodically scans the instance store and dispatches every schedulable
/// instance to a runner task, at most `max_concurrency` at a time.
///
/// The scheduler itself holds no state about missions. Eligibility comes
/// from the persisted rows (idle, or active with a dead lease), so a
/// restarted process resumes interrupted work with no recovery pass. The
/// only in-memory bookkeeping is the set of instances a local runner is
/// already working on, which keeps one process from racing itself between
/// dispatch and lease acquisition.
pub struct SwarmScheduler {
    instances: Arc<InstanceStore>,
    runner: Arc<TelosRunner>,
    tick: Duration,
    storage_retry: Duration,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
}

impl SwarmScheduler {
    pub fn new(
        instances: Arc<InstanceStore>,
        runner: Arc<TelosRunner>,
        engine: &EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            instances,
            runner,
            tick: Duration::from_millis(engine.tick_ms),
            storage_retry: Duration::from_millis(engine.storage_retry_ms),
            permits: Arc::new(Semaphore::new(engine.max_concurrency)),
            running: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Main loop. Returns once shutdown is signalled and every in-flight
    /// runner has finished its current step and released its lease.
    pub async fn run(&self) {
        info!("Swarm scheduler started (owner {})", self.runner.owner());
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.dispatch_eligible(&mut handles).await {
                Ok(dispatched) => {
                    if dispatched > 0 {
                        debug!("Dispatched {} instance(s)", dispatched);
                    }
                    sleep(self.tick).await;
                }
                Err(e) if e.is_storage_unavailable() => {
                    warn!("Storage unavailable, pausing scheduling: {}", e);
                    sleep(self.storage_retry).await;
                }
                Err(e) => {
                    warn!("Scheduling pass failed: {}", e);
                    sleep(self.storage_retry).await;
                }
            }

            handles.retain(|h| !h.is_finished());
        }

        info!("Scheduler stopping, waiting for {} runner(s)", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Runner task panicked: {}", e);
            }
        }
        info!("Swarm scheduler stopped");
    }

    /// One scan: pick every schedulable instance no local runner owns,
    /// oldest first, and spawn a runner for each permit we can get.
    async fn dispatch_eligible(&self, handles: &mut Vec<JoinHandle<()>>) -> Result<usize, EngineError> {
        let mut eligible: Vec<_> = self
            .instances
            .list()
            .await?
            .into_iter()
            .map(|r| r.entity)
            .filter(|i| i.is_schedulable())
            .collect();
        eligible.sort_by_key(|i| i.scheduling_key());

        let mut dispatched = 0;
        for instance in eligible {
            if *self.shutdown.borrow() {
                break;
            }

            let id = instance.id.clone();
            {
                let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
                if !running.insert(id.clone()) {
                    continue;
                }
            }

            // Without a free permit the instance stays in the store and is
            // picked up on a later tick; nothing is ever dropped.
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
                    running.remove(&id);
                    break;
                }
            };

            let runner = self.runner.clone();
            let running = self.running.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match runner.run(&id).await {
                    Ok(()) => {}
                    Err(EngineError::LeaseConflict { owner, .. }) => {
                        debug!("Skipped {}: lease held by {}", id, owner);
                    }
                    Err(e) => warn!("Runner for {} failed: {}", id, e),
                }
                let mut running = running.lock().unwrap_or_else(|e| e.into_inner());
                running.remove(&id);
            }));
            dispatched += 1;
        }

        Ok(dispatched)
    }
}
