//! Runtime - scheduler の操作面
//!
//! HTTP 層はこの型のメソッドを 1 対 1 で呼ぶだけ。
//! ワイヤリングは `RuntimeBuilder` が行う。
//!
//! # lease 発行の流れ
//! 1. task が `queued` か確認（違えば Conflict）
//! 2. TTL を検証
//! 3. worker snapshot を 1 回だけ読む（active_leases と sticky 判定に共用）
//! 4. 明示 worker_id があればそれ、無ければ `pick_worker`
//! 5. `TaskStore::grant_lease` で task と lease を同時に確定。
//!    `pick_worker` で選んだ場合は同じ step で worker の空きを数え直し、
//!    埋まっていれば NoCapacity

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::audit::Auditor;
use super::background::BackgroundLoops;
use super::lease_manager::LeaseManager;
use super::liveness::{LivenessSync, liveness_loop};
use super::reaper_loop::ReaperLoop;
use super::registry::{WorkerDetail, WorkerRegistry};
use super::scheduler::pick_worker;
use super::status::RuntimeStats;
use crate::domain::{
    AuditAction, AuditEntry, AuditEvent, CompletionReport, EntityType, Lease, LeaseStatus,
    NewTask, SchedulerError, Task, TaskId, TaskResult, TaskStatus, WorkerId, WorkerNode,
    WorkerPatch,
};
use crate::ports::{Clock, IdGenerator, TaskStore};
use crate::upstream::{
    ConnectivitySnapshot, RuntimeConfigView, UpstreamClient, UpstreamSettings, mask_key,
};

/// Body of `POST /tasks/{id}/lease`. Both fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaseRequest {
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    #[serde(default)]
    pub ttl_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaseGrant {
    pub lease: Lease,
    pub worker: WorkerNode,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub lease: Lease,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionAck {
    pub task: Task,
    pub result: TaskResult,
}

/// Body of `POST /runtime/config`. A missing `admin_key` keeps the current one.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigUpdate {
    pub membridge_server_url: String,
    #[serde(default)]
    pub admin_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionTest {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopIntervals {
    pub reaper: Duration,
    pub sync: Duration,
}

pub struct Runtime {
    store: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
    leases: Arc<LeaseManager>,
    workers: Arc<WorkerRegistry>,
    liveness: Arc<LivenessSync>,
    upstream: Arc<UpstreamClient>,
    intervals: LoopIntervals,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        store: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        auditor: Auditor,
        leases: Arc<LeaseManager>,
        workers: Arc<WorkerRegistry>,
        liveness: Arc<LivenessSync>,
        upstream: Arc<UpstreamClient>,
        intervals: LoopIntervals,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            auditor,
            leases,
            workers,
            liveness,
            upstream,
            intervals,
        }
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn liveness(&self) -> &Arc<LivenessSync> {
        &self.liveness
    }

    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    // ---- tasks ----

    pub async fn submit(&self, input: NewTask) -> Result<Task, SchedulerError> {
        input.validate()?;
        let task = Task::new(self.ids.task_id(), input, self.clock.now());
        let task = self.store.create_task(task).await?;
        info!(task_id = %task.id, agent_slug = %task.agent_slug, "task created");
        self.auditor
            .record(
                AuditEntry::new(AuditAction::TaskCreated, EntityType::Task, task.id)
                    .actor("api")
                    .detail(json!({
                        "context_id": task.context_id,
                        "agent_slug": task.agent_slug,
                        "max_attempts": task.max_attempts,
                    })),
            )
            .await;
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Task {id} not found")))
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, SchedulerError> {
        self.store.list_tasks(status).await
    }

    pub async fn list_results(&self, id: TaskId) -> Result<Vec<TaskResult>, SchedulerError> {
        self.get_task(id).await?;
        self.store.list_results(id).await
    }

    // ---- leasing ----

    pub async fn lease_task(
        &self,
        task_id: TaskId,
        request: LeaseRequest,
    ) -> Result<LeaseGrant, SchedulerError> {
        let task = self.get_task(task_id).await?;
        if !task.status.is_leasable() {
            return Err(SchedulerError::conflict(format!(
                "Task status is '{}', expected 'queued'",
                task.status
            )));
        }
        let ttl = self.leases.resolve_ttl(request.ttl_seconds)?;

        let snapshot = self.workers.snapshot().await?;
        let (mut worker, max_active) = match &request.worker_id {
            Some(id) => {
                let worker = snapshot
                    .find(id)
                    .cloned()
                    .ok_or_else(|| SchedulerError::not_found(format!("Worker {id} not found")))?;
                (worker, None)
            }
            None => {
                let worker = pick_worker(
                    &snapshot.workers,
                    Some(&task.context_id),
                    &snapshot.active_leases,
                )
                .cloned()
                .ok_or(SchedulerError::NoCapacity)?;
                let limit = worker.capabilities.max_concurrency;
                (worker, Some(limit))
            }
        };

        let (task, lease) = self
            .leases
            .create_lease(
                task.id,
                worker.id.clone(),
                Some(ttl),
                Some(task.context_id.clone()),
                max_active,
            )
            .await?;
        worker.active_leases += 1;

        info!(task_id = %task.id, lease_id = %lease.id, worker_id = %worker.id, "task leased");
        self.auditor
            .record(
                AuditEntry::new(AuditAction::TaskLeased, EntityType::Task, task.id).detail(json!({
                    "lease_id": lease.id.to_string(),
                    "worker_id": worker.id.to_string(),
                    "ttl_seconds": lease.ttl_seconds,
                    "attempt": task.attempts,
                })),
            )
            .await;
        Ok(LeaseGrant { lease, worker })
    }

    pub async fn heartbeat(&self, task_id: TaskId) -> Result<HeartbeatAck, SchedulerError> {
        let (task, lease, previous) = self.leases.heartbeat(task_id).await?;

        if previous == TaskStatus::Leased && task.status == TaskStatus::Running {
            self.auditor
                .record(
                    AuditEntry::new(AuditAction::TaskRunning, EntityType::Task, task.id)
                        .actor(lease.worker_id.as_str())
                        .detail(json!({ "lease_id": lease.id.to_string() })),
                )
                .await;
        }
        Ok(HeartbeatAck {
            expires_at: lease.expires_at,
            lease,
        })
    }

    /// Record the result and release the lease. The task ends `completed` or `failed`.
    pub async fn complete(
        &self,
        task_id: TaskId,
        report: CompletionReport,
    ) -> Result<CompletionAck, SchedulerError> {
        report.validate()?;
        let task = self.get_task(task_id).await?;
        if !task.status.is_completable() {
            return Err(SchedulerError::conflict(format!(
                "Task status is '{}', expected 'leased' or 'running'",
                task.status
            )));
        }

        let now = self.clock.now();
        let result = TaskResult::from_report(
            self.ids.result_id(),
            task.id,
            task.worker_id.clone(),
            report,
            now,
        );
        let task = self.store.complete_task(result.clone(), now).await?;

        info!(task_id = %task.id, status = %task.status, "task completed");
        let actor = task
            .worker_id
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "system".to_string());
        self.auditor
            .record(
                AuditEntry::new(AuditAction::TaskCompleted, EntityType::Task, task.id)
                    .actor(actor)
                    .detail(json!({
                        "status": task.status.as_str(),
                        "result_id": result.id.to_string(),
                        "duration_ms": result.metrics.duration_ms,
                    })),
            )
            .await;
        Ok(CompletionAck { task, result })
    }

    /// Manual retry from `failed` / `dead`. Attempts start over.
    pub async fn requeue(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        let (task, previous) = self.store.requeue_task(task_id, self.clock.now()).await?;
        info!(task_id = %task.id, previous = %previous, "task requeued");
        self.auditor
            .record(
                AuditEntry::new(AuditAction::TaskRequeued, EntityType::Task, task.id)
                    .actor("admin")
                    .detail(json!({ "reason": "manual", "previous_status": previous.as_str() })),
            )
            .await;
        Ok(task)
    }

    pub async fn list_leases(
        &self,
        status: Option<LeaseStatus>,
    ) -> Result<Vec<Lease>, SchedulerError> {
        self.leases.list_leases(status).await
    }

    // ---- workers ----

    pub async fn list_workers(&self) -> Result<Vec<WorkerNode>, SchedulerError> {
        self.workers.list().await
    }

    pub async fn get_worker(&self, id: &WorkerId) -> Result<WorkerDetail, SchedulerError> {
        self.workers.get(id).await
    }

    pub async fn upsert_worker(&self, patch: WorkerPatch) -> Result<WorkerNode, SchedulerError> {
        self.workers.upsert(patch).await
    }

    pub async fn remove_worker(&self, id: &WorkerId) -> Result<(), SchedulerError> {
        self.workers.remove(id).await
    }

    // ---- observability ----

    pub async fn stats(&self) -> Result<RuntimeStats, SchedulerError> {
        let tasks = self.store.list_tasks(None).await?;
        let leases = self.store.list_leases(None).await?;
        let workers = self.store.list_workers().await?;
        Ok(RuntimeStats::collect(&tasks, &leases, &workers))
    }

    /// Newest first.
    pub async fn audit(&self, limit: usize) -> Vec<AuditEvent> {
        self.auditor.sink().recent(limit).await
    }

    // ---- upstream config ----

    pub async fn config_view(&self) -> RuntimeConfigView {
        self.upstream.config_view().await
    }

    pub async fn update_config(
        &self,
        update: ConfigUpdate,
    ) -> Result<RuntimeConfigView, SchedulerError> {
        let current = self.upstream.settings().await;
        let settings = UpstreamSettings::new(
            update.membridge_server_url.trim(),
            update.admin_key.unwrap_or(current.admin_key),
        );
        self.upstream.update_settings(settings.clone()).await?;

        info!(url = %settings.base_url, admin_key = %mask_key(&settings.admin_key), "upstream config updated");
        self.auditor
            .record(
                AuditEntry::new(AuditAction::ConfigUpdated, EntityType::Config, "singleton")
                    .actor("admin")
                    .detail(json!({
                        "membridge_server_url": settings.base_url,
                        "admin_key_masked": mask_key(&settings.admin_key),
                    })),
            )
            .await;
        Ok(self.upstream.config_view().await)
    }

    /// Probe `GET /health`. Failures are part of the answer, not an `Err`.
    pub async fn test_connection(&self) -> ConnectionTest {
        let outcome = match self.upstream.test_connection().await {
            Ok(health) => ConnectionTest {
                connected: true,
                health: Some(health),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "upstream connection test failed");
                ConnectionTest {
                    connected: false,
                    health: None,
                    error: Some(e.to_string()),
                }
            }
        };
        self.auditor
            .record(
                AuditEntry::new(AuditAction::ConnectionTest, EntityType::Config, "singleton")
                    .actor("admin")
                    .detail(json!({ "connected": outcome.connected, "error": outcome.error })),
            )
            .await;
        outcome
    }

    pub async fn connectivity(&self) -> ConnectivitySnapshot {
        self.upstream.connectivity().await
    }

    // ---- background ----

    /// Start the lease reaper and the liveness sync. Call once.
    pub fn spawn_background(&self) -> BackgroundLoops {
        let mut loops = BackgroundLoops::new();

        let reaper = ReaperLoop::new(self.leases.clone(), self.intervals.reaper);
        loops.spawn(move |rx| reaper.run(rx));

        let liveness = self.liveness.clone();
        let interval = self.intervals.sync;
        loops.spawn(move |rx| liveness_loop(liveness, interval, rx));

        info!(
            reaper_interval_secs = self.intervals.reaper.as_secs(),
            sync_interval_secs = self.intervals.sync.as_secs(),
            "background loops started"
        );
        loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::RuntimeBuilder;
    use crate::domain::{LeaseId, ReportStatus, WorkerCapabilities, WorkerStatus};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{AgentSource, ExpiredLease, FixedClock, RemoteAgent};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct NoAgents;

    #[async_trait]
    impl AgentSource for NoAgents {
        async fn list_agents(&self) -> Result<Vec<RemoteAgent>, SchedulerError> {
            Ok(Vec::new())
        }
    }

    fn offline_upstream() -> Arc<UpstreamClient> {
        Arc::new(
            UpstreamClient::new(UpstreamSettings::new("http://127.0.0.1:9", "secret-admin-key"))
                .with_defaults(0, Duration::from_millis(200)),
        )
    }

    /// Yields before every call so concurrent requests interleave between
    /// store accesses.
    #[derive(Default)]
    struct YieldingStore(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for YieldingStore {
        async fn create_task(&self, task: Task) -> Result<Task, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.create_task(task).await
        }

        async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.get_task(id).await
        }

        async fn list_tasks(
            &self,
            status: Option<TaskStatus>,
        ) -> Result<Vec<Task>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.list_tasks(status).await
        }

        async fn requeue_task(
            &self,
            id: TaskId,
            now: DateTime<Utc>,
        ) -> Result<(Task, TaskStatus), SchedulerError> {
            tokio::task::yield_now().await;
            self.0.requeue_task(id, now).await
        }

        async fn grant_lease(
            &self,
            lease: Lease,
            max_active: Option<u32>,
            now: DateTime<Utc>,
        ) -> Result<(Task, Lease), SchedulerError> {
            tokio::task::yield_now().await;
            self.0.grant_lease(lease, max_active, now).await
        }

        async fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.get_lease(id).await
        }

        async fn list_leases(
            &self,
            status: Option<LeaseStatus>,
        ) -> Result<Vec<Lease>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.list_leases(status).await
        }

        async fn renew_lease(
            &self,
            id: LeaseId,
            now: DateTime<Utc>,
        ) -> Result<Option<Lease>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.renew_lease(id, now).await
        }

        async fn release_lease(
            &self,
            id: LeaseId,
            status: LeaseStatus,
        ) -> Result<Option<Lease>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.release_lease(id, status).await
        }

        async fn heartbeat(
            &self,
            task_id: TaskId,
            now: DateTime<Utc>,
        ) -> Result<(Task, Lease, TaskStatus), SchedulerError> {
            tokio::task::yield_now().await;
            self.0.heartbeat(task_id, now).await
        }

        async fn complete_task(
            &self,
            result: TaskResult,
            now: DateTime<Utc>,
        ) -> Result<Task, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.complete_task(result, now).await
        }

        async fn expire_stale_leases(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<ExpiredLease>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.expire_stale_leases(now).await
        }

        async fn upsert_worker(
            &self,
            patch: WorkerPatch,
            now: DateTime<Utc>,
        ) -> Result<WorkerNode, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.upsert_worker(patch, now).await
        }

        async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerNode>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.get_worker(id).await
        }

        async fn list_workers(&self) -> Result<Vec<WorkerNode>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.list_workers().await
        }

        async fn remove_worker(&self, id: &WorkerId) -> Result<bool, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.remove_worker(id).await
        }

        async fn list_results(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SchedulerError> {
            tokio::task::yield_now().await;
            self.0.list_results(task_id).await
        }
    }

    fn interleaving_runtime() -> Runtime {
        RuntimeBuilder::new()
            .store(Arc::new(YieldingStore::default()))
            .upstream(offline_upstream())
            .agent_source(Arc::new(NoAgents))
            .build()
            .unwrap()
    }

    fn runtime() -> (Runtime, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let runtime = RuntimeBuilder::new()
            .clock(Arc::new(clock.clone()))
            .upstream(offline_upstream())
            .agent_source(Arc::new(NoAgents))
            .build()
            .unwrap();
        (runtime, clock)
    }

    async fn online(rt: &Runtime, id: &str, max: u32) {
        rt.upsert_worker(
            WorkerPatch::new(id)
                .with_status(WorkerStatus::Online)
                .with_capabilities(WorkerCapabilities {
                    max_concurrency: max,
                    ..WorkerCapabilities::default()
                }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn full_lifecycle_records_audit_trail() {
        let (rt, clock) = runtime();
        online(&rt, "w1", 2).await;

        let task = rt.submit(NewTask::new("ctx", "writer", "hello")).await.unwrap();
        let grant = rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();
        assert_eq!(grant.worker.id.as_str(), "w1");
        assert_eq!(grant.worker.active_leases, 1);
        assert_eq!(grant.lease.context_id.as_deref(), Some("ctx"));

        clock.advance(chrono::Duration::seconds(5));
        let ack = rt.heartbeat(task.id).await.unwrap();
        assert_eq!(ack.expires_at, clock.now() + chrono::Duration::seconds(300));

        let done = rt
            .complete(task.id, CompletionReport::success("ok", 1200))
            .await
            .unwrap();
        assert_eq!(done.task.status, TaskStatus::Completed);
        assert_eq!(done.result.status, ReportStatus::Success);
        assert_eq!(done.result.worker_id, Some(WorkerId::new("w1")));

        let lease = rt.leases().get_lease(grant.lease.id).await.unwrap();
        assert_eq!(lease.status, LeaseStatus::Released);
        assert_eq!(rt.list_results(task.id).await.unwrap().len(), 1);

        let actions: Vec<AuditAction> = rt.audit(10).await.into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::TaskCompleted,
                AuditAction::TaskRunning,
                AuditAction::TaskLeased,
                AuditAction::TaskCreated,
                AuditAction::WorkerUpserted,
            ]
        );
    }

    #[tokio::test]
    async fn second_heartbeat_does_not_repeat_running_event() {
        let (rt, _) = runtime();
        online(&rt, "w1", 1).await;
        let task = rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();
        rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();

        rt.heartbeat(task.id).await.unwrap();
        rt.heartbeat(task.id).await.unwrap();

        let running = rt
            .audit(50)
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::TaskRunning)
            .count();
        assert_eq!(running, 1);
    }

    #[tokio::test]
    async fn concurrent_leases_never_oversubscribe_a_worker() {
        let rt = interleaving_runtime();
        online(&rt, "w1", 1).await;
        let a = rt.submit(NewTask::new("ctx-a", "x", "p")).await.unwrap();
        let b = rt.submit(NewTask::new("ctx-b", "x", "p")).await.unwrap();

        let (ra, rb) = tokio::join!(
            rt.lease_task(a.id, LeaseRequest::default()),
            rt.lease_task(b.id, LeaseRequest::default()),
        );

        let granted = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(granted, 1);
        let refused = [ra, rb]
            .into_iter()
            .find_map(Result::err)
            .unwrap();
        assert!(matches!(refused, SchedulerError::NoCapacity));

        let w1 = rt.get_worker(&WorkerId::new("w1")).await.unwrap();
        assert_eq!(w1.worker.active_leases, 1);
        assert_eq!(w1.leases.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_heartbeats_record_running_once() {
        let rt = interleaving_runtime();
        online(&rt, "w1", 1).await;
        let task = rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();
        rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();

        let (first, second) = tokio::join!(rt.heartbeat(task.id), rt.heartbeat(task.id));
        first.unwrap();
        second.unwrap();

        let running = rt
            .audit(50)
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::TaskRunning)
            .count();
        assert_eq!(running, 1);
    }

    #[tokio::test]
    async fn tie_break_prefers_lower_worker_id() {
        let (rt, _) = runtime();
        online(&rt, "B", 1).await;
        online(&rt, "A", 2).await;

        // A already holds one lease: free capacity A=1, B=1
        let first = rt.submit(NewTask::new("other", "a", "p")).await.unwrap();
        rt.lease_task(
            first.id,
            LeaseRequest {
                worker_id: Some(WorkerId::new("A")),
                ttl_seconds: None,
            },
        )
        .await
        .unwrap();

        let task = rt.submit(NewTask::new("fresh", "a", "p")).await.unwrap();
        let grant = rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();
        assert_eq!(grant.worker.id.as_str(), "A");
        assert_eq!(grant.worker.active_leases, 2);
    }

    #[tokio::test]
    async fn lease_errors_map_to_taxonomy() {
        let (rt, _) = runtime();
        let task = rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();

        let err = rt.lease_task(task.id, LeaseRequest::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity));

        let err = rt
            .lease_task(
                task.id,
                LeaseRequest {
                    worker_id: Some(WorkerId::new("ghost")),
                    ttl_seconds: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));

        online(&rt, "w1", 1).await;
        let err = rt
            .lease_task(
                task.id,
                LeaseRequest {
                    worker_id: None,
                    ttl_seconds: Some(10),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();
        let err = rt.lease_task(task.id, LeaseRequest::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));

        let unknown = TaskId::from_ulid(ulid::Ulid::new());
        let err = rt.lease_task(unknown, LeaseRequest::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_single_attempt_task_can_be_requeued() {
        let (rt, clock) = runtime();
        online(&rt, "w1", 1).await;
        let task = rt
            .submit(NewTask::new("ctx", "a", "p").with_max_attempts(1))
            .await
            .unwrap();
        rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();

        // requeue is only legal from failed/dead
        let err = rt.requeue(task.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(rt.leases().expire_stale_leases().await.unwrap(), 1);
        assert_eq!(rt.get_task(task.id).await.unwrap().status, TaskStatus::Dead);

        let task = rt.requeue(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.worker_id, None);
    }

    #[tokio::test]
    async fn complete_rejects_queued_task_and_blank_error() {
        let (rt, _) = runtime();
        let task = rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();

        let err = rt
            .complete(task.id, CompletionReport::success("ok", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));

        let err = rt
            .complete(task.id, CompletionReport::error("  ", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn stats_reflect_store() {
        let (rt, _) = runtime();
        online(&rt, "w1", 1).await;
        let task = rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();
        rt.submit(NewTask::new("ctx", "a", "p")).await.unwrap();
        rt.lease_task(task.id, LeaseRequest::default()).await.unwrap();

        let stats = rt.stats().await.unwrap();
        assert_eq!(stats.tasks.total, 2);
        assert_eq!(stats.tasks.by_status["leased"], 1);
        assert_eq!(stats.tasks.by_status["queued"], 1);
        assert_eq!(stats.leases.active, 1);
        assert_eq!(stats.workers.online, 1);
    }

    #[tokio::test]
    async fn config_update_masks_key_and_is_audited() {
        let (rt, _) = runtime();

        let view = rt
            .update_config(ConfigUpdate {
                membridge_server_url: "http://membridge:8000".into(),
                admin_key: None,
            })
            .await
            .unwrap();
        assert_eq!(view.membridge_server_url, "http://membridge:8000");
        assert_eq!(view.admin_key_masked, "secr****-key");
        assert!(!view.connected);

        let err = rt
            .update_config(ConfigUpdate {
                membridge_server_url: "ftp://nope".into(),
                admin_key: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        let events = rt.audit(10).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::ConfigUpdated);
        assert_eq!(events[0].detail["admin_key_masked"], "secr****-key");
    }

    #[tokio::test]
    async fn failed_connection_test_is_reported_not_raised() {
        let (rt, _) = runtime();

        let outcome = rt.test_connection().await;
        assert!(!outcome.connected);
        assert!(outcome.error.is_some());

        let snapshot = rt.connectivity().await;
        assert!(!snapshot.connected);
        assert_eq!(snapshot.state.consecutive_failures, 1);
        assert!(rt.config_view().await.last_test.is_some());
    }

    #[tokio::test]
    async fn background_loops_start_and_stop() {
        let (rt, _) = runtime();
        let loops = rt.spawn_background();
        assert_eq!(loops.len(), 2);
        tokio::time::timeout(Duration::from_secs(2), loops.shutdown_and_join())
            .await
            .unwrap();
    }
}
