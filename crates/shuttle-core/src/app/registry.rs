//! WorkerRegistry - worker の登録・更新・削除と、active lease の数え直し
//!
//! `active_leases` は毎回 `list_leases(Active)` の 1 回分の snapshot から数える。
//! 選択（scheduler）と表示（API）は同じ snapshot を使う。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::audit::Auditor;
use crate::domain::{
    AuditAction, AuditEntry, EntityType, Lease, LeaseStatus, SchedulerError, WorkerId,
    WorkerNode, WorkerPatch, WorkerStatus,
};
use crate::ports::{Clock, TaskStore};

/// Workers with `active_leases` recounted, plus the active leases used to count them.
#[derive(Debug, Clone, Default)]
pub struct WorkerSnapshot {
    pub workers: Vec<WorkerNode>,
    pub active_leases: Vec<Lease>,
}

impl WorkerSnapshot {
    pub fn find(&self, id: &WorkerId) -> Option<&WorkerNode> {
        self.workers.iter().find(|w| &w.id == id)
    }
}

/// `GET /workers/{id}`
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDetail {
    #[serde(flatten)]
    pub worker: WorkerNode,
    pub leases: Vec<Lease>,
}

pub fn recount(workers: &mut [WorkerNode], active_leases: &[Lease]) {
    let mut counts: HashMap<&WorkerId, u32> = HashMap::new();
    for lease in active_leases.iter().filter(|l| l.status.is_active()) {
        *counts.entry(&lease.worker_id).or_default() += 1;
    }
    for worker in workers.iter_mut() {
        worker.active_leases = counts.get(&worker.id).copied().unwrap_or(0);
    }
}

pub struct WorkerRegistry {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, auditor: Auditor) -> Self {
        Self {
            store,
            clock,
            auditor,
        }
    }

    pub async fn snapshot(&self) -> Result<WorkerSnapshot, SchedulerError> {
        let mut workers = self.store.list_workers().await?;
        let active_leases = self.store.list_leases(Some(LeaseStatus::Active)).await?;
        recount(&mut workers, &active_leases);
        Ok(WorkerSnapshot {
            workers,
            active_leases,
        })
    }

    pub async fn list(&self) -> Result<Vec<WorkerNode>, SchedulerError> {
        Ok(self.snapshot().await?.workers)
    }

    /// Stored record without the recount.
    pub async fn find_raw(&self, id: &WorkerId) -> Result<Option<WorkerNode>, SchedulerError> {
        self.store.get_worker(id).await
    }

    pub async fn get(&self, id: &WorkerId) -> Result<WorkerDetail, SchedulerError> {
        let mut worker = self
            .store
            .get_worker(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Worker {id} not found")))?;
        let leases: Vec<Lease> = self
            .store
            .list_leases(Some(LeaseStatus::Active))
            .await?
            .into_iter()
            .filter(|l| &l.worker_id == id)
            .collect();
        recount(std::slice::from_mut(&mut worker), &leases);
        Ok(WorkerDetail { worker, leases })
    }

    /// Insert-or-merge. The returned worker carries a fresh `active_leases`.
    pub async fn upsert(&self, patch: WorkerPatch) -> Result<WorkerNode, SchedulerError> {
        self.upsert_as(patch, "api").await
    }

    pub(crate) async fn upsert_as(
        &self,
        patch: WorkerPatch,
        actor: &str,
    ) -> Result<WorkerNode, SchedulerError> {
        if patch.id.as_str().trim().is_empty() {
            return Err(SchedulerError::validation("worker id must not be empty"));
        }
        if patch
            .capabilities
            .as_ref()
            .is_some_and(|c| c.max_concurrency == 0)
        {
            return Err(SchedulerError::validation(
                "capabilities.max_concurrency must be >= 1",
            ));
        }

        let mut worker = self.store.upsert_worker(patch, self.clock.now()).await?;
        let active = self.store.list_leases(Some(LeaseStatus::Active)).await?;
        recount(std::slice::from_mut(&mut worker), &active);

        self.auditor
            .record(
                AuditEntry::new(AuditAction::WorkerUpserted, EntityType::Worker, &worker.id)
                    .actor(actor)
                    .detail(json!({ "status": worker.status.as_str(), "url": worker.url })),
            )
            .await;
        Ok(worker)
    }

    /// Hard delete. Leases held by the worker are left to expire.
    pub async fn remove(&self, id: &WorkerId) -> Result<(), SchedulerError> {
        if !self.store.remove_worker(id).await? {
            return Err(SchedulerError::not_found(format!("Worker {id} not found")));
        }
        self.auditor
            .record(AuditEntry::new(AuditAction::WorkerRemoved, EntityType::Worker, id).actor("api"))
            .await;
        Ok(())
    }

    /// Liveness-only write. Not audited.
    pub(crate) async fn touch(&self, patch: WorkerPatch) -> Result<(), SchedulerError> {
        self.store.upsert_worker(patch, self.clock.now()).await?;
        Ok(())
    }

    pub(crate) async fn mark_offline(&self, worker: &WorkerNode) -> Result<(), SchedulerError> {
        self.store
            .upsert_worker(
                WorkerPatch::new(worker.id.clone()).with_status(WorkerStatus::Offline),
                self.clock.now(),
            )
            .await?;
        self.auditor
            .record(
                AuditEntry::new(AuditAction::WorkerOffline, EntityType::Worker, &worker.id)
                    .actor("worker-sync")
                    .detail(json!({
                        "last_heartbeat": worker.last_heartbeat.map(|t| t.timestamp_millis()),
                    })),
            )
            .await;
        Ok(())
    }
}
