//! In-memory TaskStore implementation.
//!
//! すべての状態を 1 つの `tokio::sync::Mutex` の内側に置く。
//! 遷移は lock を取ったまま domain のメソッドを呼ぶだけなので、同じ task への
//! 操作は自然に直列化される。lock を持ったまま await はしない。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Lease, LeaseId, LeaseStatus, SchedulerError, Task, TaskId, TaskResult, TaskStatus, WorkerId,
    WorkerNode, WorkerPatch,
};
use crate::ports::{ExpiredLease, TaskStore};

#[derive(Default)]
struct InMemoryState {
    tasks: HashMap<TaskId, Task>,
    leases: HashMap<LeaseId, Lease>,
    workers: HashMap<WorkerId, WorkerNode>,
    results: Vec<TaskResult>,
}

impl InMemoryState {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, SchedulerError> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::not_found(format!("Task {id} not found")))
    }

    /// The active lease currently bound to `task`, if any.
    fn active_lease_of(&self, task: &Task) -> Option<LeaseId> {
        let lease_id = task.lease_id?;
        self.leases
            .get(&lease_id)
            .filter(|l| l.status.is_active())
            .map(|l| l.id)
    }

    fn active_lease_count(&self, worker: &WorkerId) -> usize {
        self.leases
            .values()
            .filter(|l| l.status.is_active() && &l.worker_id == worker)
            .count()
    }
}

/// In-memory store for tests and single-process deployments without a database.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<Task, SchedulerError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(SchedulerError::conflict(format!(
                "Task {} already exists",
                task.id
            )));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, SchedulerError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, TaskStatus), SchedulerError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        let previous = task.requeue(now)?;
        Ok((task.clone(), previous))
    }

    async fn grant_lease(
        &self,
        lease: Lease,
        max_active: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease), SchedulerError> {
        let mut state = self.state.lock().await;
        let held = state.active_lease_count(&lease.worker_id);
        let task = state.task_mut(lease.task_id)?;
        if max_active.is_some_and(|limit| held >= limit as usize) {
            return Err(SchedulerError::NoCapacity);
        }
        task.grant(lease.id, lease.worker_id.clone(), now)?;
        let task = task.clone();
        state.leases.insert(lease.id, lease.clone());
        Ok((task, lease))
    }

    async fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state.leases.get(&id).cloned())
    }

    async fn list_leases(&self, status: Option<LeaseStatus>) -> Result<Vec<Lease>, SchedulerError> {
        let state = self.state.lock().await;
        let mut leases: Vec<Lease> = state
            .leases
            .values()
            .filter(|l| status.is_none_or(|s| l.status == s))
            .cloned()
            .collect();
        leases.sort_by_key(|l| (l.started_at, l.id));
        Ok(leases)
    }

    async fn renew_lease(
        &self,
        id: LeaseId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, SchedulerError> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.leases.get_mut(&id) else {
            return Ok(None);
        };
        Ok(lease.renew(now).ok().map(|_| lease.clone()))
    }

    async fn release_lease(
        &self,
        id: LeaseId,
        status: LeaseStatus,
    ) -> Result<Option<Lease>, SchedulerError> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.leases.get_mut(&id) else {
            return Ok(None);
        };
        lease.release(status)?;
        Ok(Some(lease.clone()))
    }

    async fn heartbeat(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease, TaskStatus), SchedulerError> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get(&task_id)
            .ok_or_else(|| SchedulerError::not_found(format!("Task {task_id} not found")))?;
        let lease_id = state
            .active_lease_of(task)
            .ok_or_else(|| SchedulerError::not_found("Lease not found or already expired"))?;

        let lease = match state.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.renew(now)?;
                lease.clone()
            }
            None => return Err(SchedulerError::not_found("Lease not found or already expired")),
        };
        let task = state.task_mut(task_id)?;
        let previous = task.status;
        task.mark_running(now)?;
        Ok((task.clone(), lease, previous))
    }

    async fn complete_task(
        &self,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Result<Task, SchedulerError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(result.task_id)?;
        let lease_id = task.lease_id;
        task.finish(result.status.is_success(), now)?;
        let task = task.clone();

        if let Some(lease) = lease_id.and_then(|id| state.leases.get_mut(&id)) {
            lease.release(LeaseStatus::Released)?;
        }
        state.results.push(result);
        Ok(task)
    }

    async fn expire_stale_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredLease>, SchedulerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut stale: Vec<LeaseId> = state
            .leases
            .values()
            .filter(|l| l.is_stale(now))
            .map(|l| l.id)
            .collect();
        stale.sort();

        let mut expired = Vec::with_capacity(stale.len());
        for lease_id in stale {
            let Some(lease) = state.leases.get_mut(&lease_id) else {
                continue;
            };
            if !lease.expire_if_stale(now) {
                continue;
            }
            let lease = lease.clone();
            let task_status = state
                .tasks
                .get_mut(&lease.task_id)
                .and_then(|task| task.expire(lease.id, now));
            expired.push(ExpiredLease { lease, task_status });
        }
        Ok(expired)
    }

    async fn upsert_worker(
        &self,
        patch: WorkerPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkerNode, SchedulerError> {
        let mut state = self.state.lock().await;
        let worker = match state.workers.get_mut(&patch.id) {
            Some(existing) => {
                patch.apply_to(existing);
                existing.clone()
            }
            None => {
                let worker = patch.into_worker(now);
                state.workers.insert(worker.id.clone(), worker.clone());
                worker
            }
        };
        Ok(worker)
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerNode>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state.workers.get(id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerNode>, SchedulerError> {
        let state = self.state.lock().await;
        let mut workers: Vec<WorkerNode> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    async fn remove_worker(&self, id: &WorkerId) -> Result<bool, SchedulerError> {
        let mut state = self.state.lock().await;
        Ok(state.workers.remove(id).is_some())
    }

    async fn list_results(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state
            .results
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }
}
