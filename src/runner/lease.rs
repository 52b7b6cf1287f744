use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

use crate::core::error::EngineError;
use crate::database::{DatabaseError, Record};
use crate::telos::instance::{AgentTelos, InstanceStore, Lease};

/// Acquires, refreshes and releases execution leases for one runner
/// identity. All writes go through the store's version-checked update, so
/// two keepers racing for the same instance can never both win.
pub struct LeaseKeeper {
    store: Arc<InstanceStore>,
    owner: String,
    ttl: chrono::Duration,
}

impl LeaseKeeper {
    pub fn new(store: Arc<InstanceStore>, owner: &str, ttl_secs: u64) -> Self {
        Self {
            store,
            owner: owner.to_string(),
            ttl: chrono::Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try to take the lease on an instance and mark it active.
    ///
    /// Succeeds when the instance is idle, carries our own lease, or
    /// carries an expired one (crashed owner). A live foreign lease, or
    /// losing the conditional write to a concurrent acquirer, is a
    /// [`EngineError::LeaseConflict`].
    pub async fn acquire(&self, id: &str) -> Result<Record<AgentTelos>, EngineError> {
        let record = self.store.get(id).await?;
        let instance = &record.entity;

        if instance.state.is_terminal() {
            return Err(EngineError::LeaseConflict {
                owner: format!("terminal:{}", instance.state),
                expires_at: Utc::now(),
            });
        }

        if let Some(lease) = &instance.lease {
            if !lease.is_expired() && lease.owner != self.owner {
                return Err(EngineError::LeaseConflict {
                    owner: lease.owner.clone(),
                    expires_at: lease.expires_at,
                });
            }
            if lease.is_expired() {
                debug!(
                    "Reclaiming expired lease on {} from {}",
                    id, lease.owner
                );
            }
        }

        let mut updated = instance.clone();
        updated.lease = Some(Lease::new(&self.owner, self.ttl));
        updated.mark_active();

        match self.store.update(updated, record.version).await {
            Ok(record) => Ok(record),
            Err(DatabaseError::VersionConflict { .. }) => {
                // Lost the race; report whoever holds it now
                let current = self.store.get(id).await?;
                let (owner, expires_at) = match &current.entity.lease {
                    Some(lease) => (lease.owner.clone(), lease.expires_at),
                    None => ("unknown".to_string(), Utc::now()),
                };
                Err(EngineError::LeaseConflict { owner, expires_at })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A fresh lease for the next write. The runner folds this into the
    /// same versioned update that persists a step, so the renewal and the
    /// progress land atomically.
    pub fn renewed(&self) -> Lease {
        Lease::new(&self.owner, self.ttl)
    }

    /// Drop the lease without touching any other field. A version conflict
    /// here means someone reclaimed the row after our lease expired; that
    /// is fine, their lease is not ours to clear.
    pub async fn release(&self, record: &Record<AgentTelos>) {
        let mut updated = record.entity.clone();
        if !matches!(&updated.lease, Some(lease) if lease.owner == self.owner) {
            return;
        }
        updated.lease = None;

        match self.store.update(updated, record.version).await {
            Ok(_) => debug!("Released lease on {}", record.entity.id),
            Err(DatabaseError::VersionConflict { .. }) => {
                debug!("Lease on {} already superseded", record.entity.id)
            }
            Err(e) => warn!("Could not release lease on {}: {}", record.entity.id, e),
        }
    }
}
