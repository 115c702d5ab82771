//! TaskStore port - tasks / leases / workers / results の正本（source of truth）
//!
//! # 設計原則
//! - 同じ task に触る遷移は store が直列化する
//!   （InMemory は単一 Mutex、Postgres はトランザクション内の条件付き UPDATE）
//! - 遷移ルールそのものは `domain` にあり、store はそれを原子的に適用するだけ
//! - `WorkerNode::active_leases` は store に保存しない。読み出し側が数え直す
//!
//! 実装は `impls::memory_store` と `impls::pg_store`。両者は `impls::conformance`
//! の同じテスト群を通る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Lease, LeaseId, LeaseStatus, SchedulerError, Task, TaskId, TaskResult, TaskStatus, WorkerId,
    WorkerNode, WorkerPatch,
};

/// Outcome of expiring one stale lease.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredLease {
    pub lease: Lease,

    /// New status of the bound task, `None` if the task had already moved on.
    pub task_status: Option<TaskStatus>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    // ---- tasks ----

    async fn create_task(&self, task: Task) -> Result<Task, SchedulerError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SchedulerError>;

    /// Oldest first.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, SchedulerError>;

    /// failed | dead → queued. Returns the task and the status it left.
    async fn requeue_task(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, TaskStatus), SchedulerError>;

    // ---- leases ----

    /// Insert an active lease and move its task queued → leased in one step.
    ///
    /// `Conflict` if the task is not queued, `NotFound` if it does not exist.
    /// With `max_active`, the worker's active leases are counted in the same
    /// step and `NoCapacity` is returned when it already holds that many.
    async fn grant_lease(
        &self,
        lease: Lease,
        max_active: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease), SchedulerError>;

    async fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>, SchedulerError>;

    /// Oldest first.
    async fn list_leases(&self, status: Option<LeaseStatus>) -> Result<Vec<Lease>, SchedulerError>;

    /// Sliding renewal, only while `active`. `None` when not active or unknown.
    async fn renew_lease(
        &self,
        id: LeaseId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, SchedulerError>;

    /// Move the lease to a terminal status from any status. `None` when unknown,
    /// `Validation` when `status` is `active`.
    async fn release_lease(
        &self,
        id: LeaseId,
        status: LeaseStatus,
    ) -> Result<Option<Lease>, SchedulerError>;

    /// Renew the task's lease and mark it running. Also returns the status the
    /// task had before, read under the same lock.
    ///
    /// `NotFound` when the task has no active lease.
    async fn heartbeat(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease, TaskStatus), SchedulerError>;

    /// leased | running → completed | failed, release the lease, store `result`.
    async fn complete_task(
        &self,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Result<Task, SchedulerError>;

    /// Expire every lease with `status = active AND expires_at < now` and apply
    /// retry-or-die to its task. Re-checks both conditions at write time.
    async fn expire_stale_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredLease>, SchedulerError>;

    // ---- workers ----

    /// Insert or merge. Absent fields keep their stored value.
    async fn upsert_worker(
        &self,
        patch: WorkerPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkerNode, SchedulerError>;

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerNode>, SchedulerError>;

    /// Ordered by id. `active_leases` is left at 0.
    async fn list_workers(&self) -> Result<Vec<WorkerNode>, SchedulerError>;

    /// Hard delete. Returns whether the worker existed. Leases are untouched.
    async fn remove_worker(&self, id: &WorkerId) -> Result<bool, SchedulerError>;

    // ---- results ----

    async fn list_results(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SchedulerError>;
}
