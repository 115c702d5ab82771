//! LeaseManager - lease の発行・更新・解放・期限切れ回収
//!
//! 期限切れ回収（`tick`）は reaper loop から定期的に呼ばれる。
//! 同時に 2 回走らないよう `reaping` で自分自身をガードする。

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::audit::Auditor;
use crate::domain::lease::{ensure_terminal, validate_ttl};
use crate::domain::{
    AuditAction, AuditEntry, DEFAULT_LEASE_TTL_SECS, EntityType, Lease, LeaseId, LeaseStatus,
    SchedulerError, Task, TaskId, TaskStatus, WorkerId,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

/// Lease behavior tuning knobs.
#[derive(Clone, Debug)]
pub struct LeaseConfig {
    /// TTL used when a lease request does not name one.
    pub default_ttl_secs: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

/// Result of one reaper tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseTickResult {
    pub expired: usize,
    pub requeued: usize,
    pub dead: usize,
    /// Another tick was still running, nothing was done.
    pub skipped: bool,
}

pub struct LeaseManager {
    store: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
    config: LeaseConfig,
    reaping: Mutex<()>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        auditor: Auditor,
        config: LeaseConfig,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            auditor,
            config,
            reaping: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Validate `ttl_seconds` (or fall back to the default).
    pub fn resolve_ttl(&self, ttl_seconds: Option<u32>) -> Result<u32, SchedulerError> {
        validate_ttl(ttl_seconds.unwrap_or(self.config.default_ttl_secs))
    }

    /// Create an active lease and bind it to the queued task.
    ///
    /// `max_active` caps the worker's active leases at grant time.
    pub async fn create_lease(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        ttl_seconds: Option<u32>,
        context_id: Option<String>,
        max_active: Option<u32>,
    ) -> Result<(Task, Lease), SchedulerError> {
        let ttl = self.resolve_ttl(ttl_seconds)?;
        let now = self.clock.now();
        let lease = Lease::new(self.ids.lease_id(), task_id, worker_id, ttl, context_id, now);
        let (task, lease) = self.store.grant_lease(lease, max_active, now).await?;
        debug!(task_id = %task.id, lease_id = %lease.id, worker_id = %lease.worker_id, ttl, "lease granted");
        Ok((task, lease))
    }

    pub async fn renew_lease(&self, id: LeaseId) -> Result<Lease, SchedulerError> {
        self.store
            .renew_lease(id, self.clock.now())
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Lease {id} not found or not active")))
    }

    pub async fn release_lease(
        &self,
        id: LeaseId,
        status: LeaseStatus,
    ) -> Result<Lease, SchedulerError> {
        ensure_terminal(status)?;
        self.store
            .release_lease(id, status)
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Lease {id} not found")))
    }

    /// Renew the task's lease and move it to running. The status is the one the
    /// task left.
    pub async fn heartbeat(
        &self,
        task_id: TaskId,
    ) -> Result<(Task, Lease, TaskStatus), SchedulerError> {
        self.store.heartbeat(task_id, self.clock.now()).await
    }

    pub async fn get_lease(&self, id: LeaseId) -> Result<Lease, SchedulerError> {
        self.store
            .get_lease(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Lease {id} not found")))
    }

    pub async fn list_leases(
        &self,
        status: Option<LeaseStatus>,
    ) -> Result<Vec<Lease>, SchedulerError> {
        self.store.list_leases(status).await
    }

    /// Expire stale leases, apply retry-or-die, record audit events. Returns the count.
    pub async fn expire_stale_leases(&self) -> Result<usize, SchedulerError> {
        Ok(self.tick().await?.expired)
    }

    pub async fn tick(&self) -> Result<LeaseTickResult, SchedulerError> {
        let Ok(_guard) = self.reaping.try_lock() else {
            debug!("previous reaper tick still running, skipping");
            return Ok(LeaseTickResult {
                skipped: true,
                ..LeaseTickResult::default()
            });
        };

        let now = self.clock.now();
        let expired = self.store.expire_stale_leases(now).await?;

        let mut result = LeaseTickResult {
            expired: expired.len(),
            ..LeaseTickResult::default()
        };
        for item in expired {
            let lease = &item.lease;
            self.auditor
                .record(
                    AuditEntry::new(AuditAction::LeaseExpired, EntityType::Lease, lease.id).detail(
                        json!({
                            "task_id": lease.task_id.to_string(),
                            "worker_id": lease.worker_id.to_string(),
                            "expires_at": lease.expires_at.timestamp_millis(),
                        }),
                    ),
                )
                .await;

            match item.task_status {
                Some(TaskStatus::Queued) => {
                    result.requeued += 1;
                    self.auditor
                        .record(
                            AuditEntry::new(
                                AuditAction::TaskRequeued,
                                EntityType::Task,
                                lease.task_id,
                            )
                            .detail(json!({ "reason": "lease_expired", "lease_id": lease.id.to_string() })),
                        )
                        .await;
                }
                Some(TaskStatus::Dead) => {
                    result.dead += 1;
                    self.auditor
                        .record(
                            AuditEntry::new(AuditAction::TaskDead, EntityType::Task, lease.task_id)
                                .detail(json!({ "lease_id": lease.id.to_string() })),
                        )
                        .await;
                }
                _ => {}
            }
        }

        if result.expired > 0 {
            info!(
                expired = result.expired,
                requeued = result.requeued,
                dead = result.dead,
                "expired stale leases"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskStatus};
    use crate::impls::{InMemoryAuditLog, InMemoryTaskStore};
    use crate::ports::{AuditSink, FixedClock, UlidGenerator};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        manager: LeaseManager,
        store: Arc<InMemoryTaskStore>,
        clock: FixedClock,
        audit: Arc<InMemoryAuditLog>,
        ids: Arc<dyn IdGenerator>,
    }

    fn fixture() -> Fixture {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(InMemoryTaskStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let auditor = Auditor::new(audit.clone(), ids.clone(), clock_dyn.clone());
        let manager = LeaseManager::new(
            store.clone(),
            ids.clone(),
            clock_dyn,
            auditor,
            LeaseConfig::default(),
        );
        Fixture {
            manager,
            store,
            clock,
            audit,
            ids,
        }
    }

    async fn queued(f: &Fixture, max_attempts: u32) -> Task {
        let task = Task::new(
            f.ids.task_id(),
            NewTask::new("ctx", "writer", "p").with_max_attempts(max_attempts),
            f.clock.now(),
        );
        f.store.create_task(task).await.unwrap()
    }

    #[tokio::test]
    async fn create_lease_uses_default_ttl() {
        let f = fixture();
        let task = queued(&f, 3).await;

        let (task, lease) = f
            .manager
            .create_lease(task.id, WorkerId::new("w1"), None, Some("ctx".into()), None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Leased);
        assert_eq!(lease.ttl_seconds, 300);
        assert_eq!(lease.expires_at, f.clock.now() + Duration::seconds(300));
    }

    #[tokio::test]
    async fn create_lease_rejects_out_of_range_ttl() {
        let f = fixture();
        let task = queued(&f, 3).await;

        let err = f
            .manager
            .create_lease(task.id, WorkerId::new("w1"), Some(5), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        let task = f.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn renew_strictly_extends_active_lease() {
        let f = fixture();
        let task = queued(&f, 3).await;
        let (_, lease) = f
            .manager
            .create_lease(task.id, WorkerId::new("w1"), Some(60), None, None)
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(10));
        let renewed = f.manager.renew_lease(lease.id).await.unwrap();
        assert!(renewed.expires_at > lease.expires_at);

        f.manager
            .release_lease(lease.id, LeaseStatus::Released)
            .await
            .unwrap();
        let err = f.manager.renew_lease(lease.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn released_lease_cannot_be_reactivated() {
        let f = fixture();
        let task = queued(&f, 3).await;
        let (_, lease) = f
            .manager
            .create_lease(task.id, WorkerId::new("w1"), Some(60), None, None)
            .await
            .unwrap();
        f.manager
            .release_lease(lease.id, LeaseStatus::Released)
            .await
            .unwrap();

        let err = f
            .manager
            .release_lease(lease.id, LeaseStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert_eq!(
            f.manager.get_lease(lease.id).await.unwrap().status,
            LeaseStatus::Released
        );
        let err = f.manager.renew_lease(lease.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn grant_is_capped_by_worker_capacity() {
        let f = fixture();
        let first = queued(&f, 3).await;
        let second = queued(&f, 3).await;

        f.manager
            .create_lease(first.id, WorkerId::new("w1"), None, None, Some(1))
            .await
            .unwrap();
        let err = f
            .manager
            .create_lease(second.id, WorkerId::new("w1"), None, None, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity));

        let second = f.store.get_task(second.id).await.unwrap().unwrap();
        assert_eq!(second.status, TaskStatus::Queued);
        assert_eq!(f.manager.list_leases(Some(LeaseStatus::Active)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_attempt_task_dies_after_ttl() {
        let f = fixture();
        let task = queued(&f, 1).await;
        let (_, lease) = f
            .manager
            .create_lease(task.id, WorkerId::new("w1"), Some(60), None, None)
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(61));
        let tick = f.manager.tick().await.unwrap();

        assert_eq!(
            tick,
            LeaseTickResult {
                expired: 1,
                requeued: 0,
                dead: 1,
                skipped: false
            }
        );
        let task = f.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Dead);
        let lease = f.manager.get_lease(lease.id).await.unwrap();
        assert_eq!(lease.status, LeaseStatus::Expired);

        let actions: Vec<AuditAction> = f.audit.recent(10).await.into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::TaskDead, AuditAction::LeaseExpired]);
    }

    #[tokio::test]
    async fn second_tick_is_a_no_op() {
        let f = fixture();
        let task = queued(&f, 3).await;
        f.manager
            .create_lease(task.id, WorkerId::new("w1"), Some(60), None, None)
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(61));
        assert_eq!(f.manager.expire_stale_leases().await.unwrap(), 1);
        assert_eq!(f.manager.expire_stale_leases().await.unwrap(), 0);

        let task = f.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.lease_id, None);
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped() {
        let f = fixture();
        let _held = f.manager.reaping.lock().await;

        let tick = f.manager.tick().await.unwrap();
        assert!(tick.skipped);
    }
}
