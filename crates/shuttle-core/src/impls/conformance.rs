//! TaskStore の共通テスト群
//!
//! InMemory / Postgres の両方がここを通る。各ケースは factory から新しい
//! (空の) store を受け取る。時刻はすべて引数で渡すので Clock は使わない。

use std::future::Future;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ulid::Ulid;

use crate::domain::{
    CompletionReport, Lease, LeaseId, LeaseStatus, NewTask, ResultId, SchedulerError, Task,
    TaskId, TaskResult, TaskStatus, WorkerCapabilities, WorkerId, WorkerPatch, WorkerStatus,
};
use crate::ports::TaskStore;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn secs(n: i64) -> Duration {
    Duration::seconds(n)
}

async fn queued_task<S: TaskStore>(store: &S, max_attempts: u32, now: DateTime<Utc>) -> Task {
    let input = NewTask::new("ctx-1", "writer", "do it").with_max_attempts(max_attempts);
    store
        .create_task(Task::new(TaskId::from_ulid(Ulid::new()), input, now))
        .await
        .unwrap()
}

fn lease_for(task: &Task, worker: &str, ttl: u32, now: DateTime<Utc>) -> Lease {
    Lease::new(
        LeaseId::from_ulid(Ulid::new()),
        task.id,
        WorkerId::new(worker),
        ttl,
        Some(task.context_id.clone()),
        now,
    )
}

fn result_for(task: &Task, report: CompletionReport, now: DateTime<Utc>) -> TaskResult {
    TaskResult::from_report(
        ResultId::from_ulid(Ulid::new()),
        task.id,
        task.worker_id.clone(),
        report,
        now,
    )
}

pub async fn run_all<S, F, Fut>(factory: F)
where
    S: TaskStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    tasks_roundtrip_and_filter(&factory().await).await;
    grant_is_conditional_on_queued(&factory().await).await;
    grant_respects_worker_capacity(&factory().await).await;
    renew_slides_only_active_leases(&factory().await).await;
    release_never_reactivates(&factory().await).await;
    heartbeat_marks_running(&factory().await).await;
    complete_releases_lease_and_records_result(&factory().await).await;
    expiry_is_idempotent_and_leaves_active_alone(&factory().await).await;
    expiry_with_last_attempt_kills_task(&factory().await).await;
    renewed_lease_survives_reap(&factory().await).await;
    requeue_only_from_failed_or_dead(&factory().await).await;
    workers_merge_and_remove(&factory().await).await;
}

async fn tasks_roundtrip_and_filter<S: TaskStore>(store: &S) {
    let a = queued_task(store, 3, t0()).await;
    let b = queued_task(store, 3, t0() + secs(1)).await;
    store
        .grant_lease(lease_for(&b, "w1", 300, t0() + secs(2)), None, t0() + secs(2))
        .await
        .unwrap();

    let fetched = store.get_task(a.id).await.unwrap().unwrap();
    assert_eq!(fetched, a);
    assert!(store.get_task(TaskId::from_ulid(Ulid::new())).await.unwrap().is_none());

    let all = store.list_tasks(None).await.unwrap();
    assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id, b.id]);

    let queued = store.list_tasks(Some(TaskStatus::Queued)).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, a.id);
}

async fn grant_is_conditional_on_queued<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;
    let lease = lease_for(&task, "w1", 300, t0());

    let (leased, stored) = store.grant_lease(lease.clone(), None, t0()).await.unwrap();
    assert_eq!(leased.status, TaskStatus::Leased);
    assert_eq!(leased.lease_id, Some(lease.id));
    assert_eq!(leased.worker_id, Some(WorkerId::new("w1")));
    assert_eq!(leased.attempts, 1);
    assert_eq!(stored.expires_at, t0() + secs(300));

    let second = lease_for(&task, "w2", 300, t0() + secs(1));
    let err = store.grant_lease(second.clone(), None, t0() + secs(1)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict(_)));
    assert!(store.get_lease(second.id).await.unwrap().is_none());

    let ghost = Task::new(TaskId::from_ulid(Ulid::new()), NewTask::new("c", "a", "p"), t0());
    let err = store
        .grant_lease(lease_for(&ghost, "w1", 300, t0()), None, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

async fn grant_respects_worker_capacity<S: TaskStore>(store: &S) {
    store
        .upsert_worker(WorkerPatch::new("w1").with_status(WorkerStatus::Online), t0())
        .await
        .unwrap();
    let a = queued_task(store, 3, t0()).await;
    let b = queued_task(store, 3, t0()).await;
    let c = queued_task(store, 3, t0()).await;

    store
        .grant_lease(lease_for(&a, "w1", 300, t0()), Some(1), t0())
        .await
        .unwrap();

    let full = lease_for(&b, "w1", 300, t0());
    let err = store.grant_lease(full.clone(), Some(1), t0()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoCapacity));
    assert!(store.get_lease(full.id).await.unwrap().is_none());
    let b_after = store.get_task(b.id).await.unwrap().unwrap();
    assert_eq!(b_after.status, TaskStatus::Queued);

    // other workers are unaffected
    store
        .grant_lease(lease_for(&b, "w2", 300, t0()), Some(1), t0())
        .await
        .unwrap();

    // uncapped grants still go through
    store
        .grant_lease(lease_for(&c, "w1", 300, t0()), None, t0())
        .await
        .unwrap();
}

async fn release_never_reactivates<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;
    let (_, lease) = store
        .grant_lease(lease_for(&task, "w1", 300, t0()), None, t0())
        .await
        .unwrap();
    store
        .release_lease(lease.id, LeaseStatus::Expired)
        .await
        .unwrap()
        .unwrap();

    let err = store
        .release_lease(lease.id, LeaseStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation(_)));

    let after = store.get_lease(lease.id).await.unwrap().unwrap();
    assert_eq!(after.status, LeaseStatus::Expired);
    assert!(store.renew_lease(lease.id, t0() + secs(1)).await.unwrap().is_none());
}

async fn renew_slides_only_active_leases<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;
    let (_, lease) = store
        .grant_lease(lease_for(&task, "w1", 120, t0()), None, t0())
        .await
        .unwrap();

    let renewed = store
        .renew_lease(lease.id, t0() + secs(30))
        .await
        .unwrap()
        .unwrap();
    assert!(renewed.expires_at > lease.expires_at);
    assert_eq!(renewed.expires_at, renewed.last_heartbeat + secs(120));

    let released = store
        .release_lease(lease.id, LeaseStatus::Released)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, LeaseStatus::Released);

    assert!(store.renew_lease(lease.id, t0() + secs(60)).await.unwrap().is_none());
    let after = store.get_lease(lease.id).await.unwrap().unwrap();
    assert_eq!(after, released);

    assert!(
        store
            .renew_lease(LeaseId::from_ulid(Ulid::new()), t0())
            .await
            .unwrap()
            .is_none()
    );
}

async fn heartbeat_marks_running<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;

    let err = store.heartbeat(task.id, t0()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    store
        .grant_lease(lease_for(&task, "w1", 300, t0()), None, t0())
        .await
        .unwrap();
    let (running, lease, previous) = store.heartbeat(task.id, t0() + secs(10)).await.unwrap();

    assert_eq!(previous, TaskStatus::Leased);
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(lease.last_heartbeat, t0() + secs(10));
    assert_eq!(lease.expires_at, t0() + secs(310));

    // a second heartbeat keeps it running
    let (again, _, previous) = store.heartbeat(task.id, t0() + secs(20)).await.unwrap();
    assert_eq!(again.status, TaskStatus::Running);
    assert_eq!(previous, TaskStatus::Running);
}

async fn complete_releases_lease_and_records_result<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;

    let early = result_for(&task, CompletionReport::success("x", 1), t0());
    let err = store.complete_task(early, t0()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict(_)));
    assert!(store.list_results(task.id).await.unwrap().is_empty());

    let (leased, lease) = store
        .grant_lease(lease_for(&task, "w1", 300, t0()), None, t0())
        .await
        .unwrap();
    let result = result_for(&leased, CompletionReport::error("boom", 42), t0() + secs(5));
    let done = store.complete_task(result.clone(), t0() + secs(5)).await.unwrap();

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.lease_id, None);
    let lease = store.get_lease(lease.id).await.unwrap().unwrap();
    assert_eq!(lease.status, LeaseStatus::Released);
    assert_eq!(store.list_results(task.id).await.unwrap(), vec![result]);
}

async fn expiry_is_idempotent_and_leaves_active_alone<S: TaskStore>(store: &S) {
    let stale_task = queued_task(store, 3, t0()).await;
    let fresh_task = queued_task(store, 3, t0()).await;
    let (_, stale) = store
        .grant_lease(lease_for(&stale_task, "w1", 60, t0()), None, t0())
        .await
        .unwrap();
    let (_, fresh) = store
        .grant_lease(lease_for(&fresh_task, "w2", 600, t0()), None, t0())
        .await
        .unwrap();

    let now = t0() + secs(61);
    let first = store.expire_stale_leases(now).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].lease.id, stale.id);
    assert_eq!(first[0].lease.status, LeaseStatus::Expired);
    assert_eq!(first[0].task_status, Some(TaskStatus::Queued));

    assert!(store.expire_stale_leases(now).await.unwrap().is_empty());

    let requeued = store.get_task(stale_task.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.lease_id, None);
    assert_eq!(requeued.worker_id, None);
    assert_eq!(requeued.attempts, 1);

    let untouched = store.get_lease(fresh.id).await.unwrap().unwrap();
    assert_eq!(untouched, fresh);
    let fresh_task = store.get_task(fresh_task.id).await.unwrap().unwrap();
    assert_eq!(fresh_task.status, TaskStatus::Leased);
}

async fn expiry_with_last_attempt_kills_task<S: TaskStore>(store: &S) {
    let task = queued_task(store, 1, t0()).await;
    let (_, lease) = store
        .grant_lease(lease_for(&task, "w1", 60, t0()), None, t0())
        .await
        .unwrap();
    store.heartbeat(task.id, t0() + secs(5)).await.unwrap();

    let expired = store.expire_stale_leases(t0() + secs(66)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].task_status, Some(TaskStatus::Dead));

    let dead = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(dead.status, TaskStatus::Dead);
    assert_eq!(dead.lease_id, None);
    assert_eq!(dead.attempts, 1);
    let lease = store.get_lease(lease.id).await.unwrap().unwrap();
    assert_eq!(lease.status, LeaseStatus::Expired);
}

async fn renewed_lease_survives_reap<S: TaskStore>(store: &S) {
    let task = queued_task(store, 3, t0()).await;
    let (_, lease) = store
        .grant_lease(lease_for(&task, "w1", 60, t0()), None, t0())
        .await
        .unwrap();
    store.renew_lease(lease.id, t0() + secs(50)).await.unwrap();

    assert!(store.expire_stale_leases(t0() + secs(61)).await.unwrap().is_empty());
    let lease = store.get_lease(lease.id).await.unwrap().unwrap();
    assert_eq!(lease.status, LeaseStatus::Active);
}

async fn requeue_only_from_failed_or_dead<S: TaskStore>(store: &S) {
    let task = queued_task(store, 1, t0()).await;
    let err = store.requeue_task(task.id, t0()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict(_)));

    store
        .grant_lease(lease_for(&task, "w1", 60, t0()), None, t0())
        .await
        .unwrap();
    store.expire_stale_leases(t0() + secs(61)).await.unwrap();

    let (requeued, previous) = store.requeue_task(task.id, t0() + secs(70)).await.unwrap();
    assert_eq!(previous, TaskStatus::Dead);
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.attempts, 0);
    assert_eq!(requeued.worker_id, None);

    let err = store
        .requeue_task(TaskId::from_ulid(Ulid::new()), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

async fn workers_merge_and_remove<S: TaskStore>(store: &S) {
    let created = store
        .upsert_worker(
            WorkerPatch {
                url: Some("http://b:8001".into()),
                ip_addrs: Some(vec!["10.0.0.2".into()]),
                ..WorkerPatch::new("b")
            }
            .with_status(WorkerStatus::Online)
            .with_capabilities(WorkerCapabilities {
                max_concurrency: 2,
                ..WorkerCapabilities::default()
            }),
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(created.registered_at, t0());
    assert_eq!(created.node_id, "b");

    store
        .upsert_worker(WorkerPatch::new("a").with_status(WorkerStatus::Online), t0())
        .await
        .unwrap();

    let merged = store
        .upsert_worker(
            WorkerPatch::new("b")
                .with_status(WorkerStatus::Offline)
                .with_last_heartbeat(t0() + secs(5)),
            t0() + secs(5),
        )
        .await
        .unwrap();
    assert_eq!(merged.status, WorkerStatus::Offline);
    assert_eq!(merged.url, "http://b:8001");
    assert_eq!(merged.capabilities.max_concurrency, 2);
    assert_eq!(merged.ip_addrs, vec!["10.0.0.2".to_string()]);
    assert_eq!(merged.registered_at, t0());
    assert_eq!(merged.last_heartbeat, Some(t0() + secs(5)));

    let ids: Vec<String> = store
        .list_workers()
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(store.remove_worker(&WorkerId::new("a")).await.unwrap());
    assert!(!store.remove_worker(&WorkerId::new("a")).await.unwrap());
    assert!(store.get_worker(&WorkerId::new("a")).await.unwrap().is_none());
}
