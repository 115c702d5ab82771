//! Postgres-backed TaskStore.
//!
//! 遷移は「行を FOR UPDATE で取る → domain のメソッドを適用 → 前の status を条件に
//! UPDATE」の順で行う。lock は常に task → worker → lease の順に取る。
//! lease 期限切れは lease ごとに 1 トランザクションで、コミット時点でも
//! `status = 'active' AND expires_at_ms < now` を満たすものだけを expired にする。

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::domain::lease::ensure_terminal;
use crate::domain::{
    DesiredFormat, Lease, LeaseId, LeaseStatus, Metrics, ReportStatus, SchedulerError, Task,
    TaskId, TaskPolicy, TaskResult, TaskStatus, WorkerCapabilities, WorkerId, WorkerNode,
    WorkerPatch, WorkerStatus,
};
use crate::ports::{ExpiredLease, TaskStore};

const TASK_COLUMNS: &str = "id, context_id, agent_slug, prompt, context_hints, timeout_sec, \
     budget, desired_format, status, created_at_ms, updated_at_ms, lease_id, worker_id, \
     attempts, max_attempts";

const LEASE_COLUMNS: &str = "id, task_id, worker_id, started_at_ms, expires_at_ms, \
     ttl_seconds, status, last_heartbeat_ms, context_id";

const WORKER_COLUMNS: &str = "id, node_id, url, status, claude_cli, max_concurrency, labels, \
     last_heartbeat_ms, ip_addrs, registered_at_ms";

const RESULT_COLUMNS: &str = "id, task_id, worker_id, status, output, error_message, \
     duration_ms, tokens_used, completed_at_ms";

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Store(format!("corrupt {what} in database: {value}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

fn parse_desired_format(s: &str) -> Result<DesiredFormat, SchedulerError> {
    match s {
        "json" => Ok(DesiredFormat::Json),
        "text" => Ok(DesiredFormat::Text),
        other => Err(corrupt("desired_format", other)),
    }
}

fn report_status_str(status: ReportStatus) -> &'static str {
    match status {
        ReportStatus::Success => "success",
        ReportStatus::Error => "error",
    }
}

fn parse_report_status(s: &str) -> Result<ReportStatus, SchedulerError> {
    match s {
        "success" => Ok(ReportStatus::Success),
        "error" => Ok(ReportStatus::Error),
        other => Err(corrupt("result status", other)),
    }
}

fn task_from_row(row: &PgRow) -> Result<Task, SchedulerError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let lease_id: Option<String> = row.try_get("lease_id")?;
    let worker_id: Option<String> = row.try_get("worker_id")?;
    let desired_format: String = row.try_get("desired_format")?;

    Ok(Task {
        id: id.parse().map_err(|e| corrupt("task id", e))?,
        context_id: row.try_get("context_id")?,
        agent_slug: row.try_get("agent_slug")?,
        prompt: row.try_get("prompt")?,
        context_hints: row.try_get("context_hints")?,
        policy: TaskPolicy {
            timeout_sec: to_u32(row.try_get("timeout_sec")?),
            budget: row.try_get("budget")?,
        },
        desired_format: parse_desired_format(&desired_format)?,
        status: status.parse().map_err(|e| corrupt("task status", e))?,
        created_at: ms_to_dt(row.try_get("created_at_ms")?),
        updated_at: ms_to_dt(row.try_get("updated_at_ms")?),
        lease_id: lease_id
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| corrupt("lease id", e))?,
        worker_id: worker_id.map(WorkerId::new),
        attempts: to_u32(row.try_get("attempts")?),
        max_attempts: to_u32(row.try_get("max_attempts")?),
    })
}

fn lease_from_row(row: &PgRow) -> Result<Lease, SchedulerError> {
    let id: String = row.try_get("id")?;
    let task_id: String = row.try_get("task_id")?;
    let status: String = row.try_get("status")?;
    let worker_id: String = row.try_get("worker_id")?;

    Ok(Lease {
        id: id.parse().map_err(|e| corrupt("lease id", e))?,
        task_id: task_id.parse().map_err(|e| corrupt("task id", e))?,
        worker_id: WorkerId::new(worker_id),
        started_at: ms_to_dt(row.try_get("started_at_ms")?),
        expires_at: ms_to_dt(row.try_get("expires_at_ms")?),
        ttl_seconds: to_u32(row.try_get("ttl_seconds")?),
        status: status.parse().map_err(|e| corrupt("lease status", e))?,
        last_heartbeat: ms_to_dt(row.try_get("last_heartbeat_ms")?),
        context_id: row.try_get("context_id")?,
    })
}

fn worker_from_row(row: &PgRow) -> Result<WorkerNode, SchedulerError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let last_heartbeat: Option<i64> = row.try_get("last_heartbeat_ms")?;

    Ok(WorkerNode {
        id: WorkerId::new(id),
        node_id: row.try_get("node_id")?,
        url: row.try_get("url")?,
        status: WorkerStatus::parse_lenient(&status),
        capabilities: WorkerCapabilities {
            claude_cli: row.try_get("claude_cli")?,
            max_concurrency: to_u32(row.try_get("max_concurrency")?),
            labels: row.try_get("labels")?,
        },
        last_heartbeat: last_heartbeat.map(ms_to_dt),
        ip_addrs: row.try_get("ip_addrs")?,
        registered_at: ms_to_dt(row.try_get("registered_at_ms")?),
        active_leases: 0,
    })
}

fn result_from_row(row: &PgRow) -> Result<TaskResult, SchedulerError> {
    let id: String = row.try_get("id")?;
    let task_id: String = row.try_get("task_id")?;
    let worker_id: Option<String> = row.try_get("worker_id")?;
    let status: String = row.try_get("status")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let tokens_used: Option<i64> = row.try_get("tokens_used")?;

    Ok(TaskResult {
        id: id.parse().map_err(|e| corrupt("result id", e))?,
        task_id: task_id.parse().map_err(|e| corrupt("task id", e))?,
        worker_id: worker_id.map(WorkerId::new),
        status: parse_report_status(&status)?,
        output: row.try_get("output")?,
        error_message: row.try_get("error_message")?,
        metrics: Metrics {
            duration_ms: u64::try_from(duration_ms).unwrap_or(0),
            tokens_used: tokens_used.and_then(|n| u64::try_from(n).ok()),
        },
        completed_at: ms_to_dt(row.try_get("completed_at_ms")?),
    })
}

#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Connect and run embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, SchedulerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self::with_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), SchedulerError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_task(
        tx: &mut Transaction<'_, Postgres>,
        id: TaskId,
    ) -> Result<Task, SchedulerError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SchedulerError::not_found(format!("Task {id} not found")))?;
        task_from_row(&row)
    }

    /// Persist a transition computed by the domain. Conditional on the status
    /// the row had when it was locked.
    async fn write_task(
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<(), SchedulerError> {
        let updated = sqlx::query(
            "UPDATE tasks
             SET status = $2, lease_id = $3, worker_id = $4, attempts = $5, updated_at_ms = $6
             WHERE id = $1 AND status = $7",
        )
        .bind(task.id.to_string())
        .bind(task.status.as_str())
        .bind(task.lease_id.map(|id| id.to_string()))
        .bind(task.worker_id.as_ref().map(|id| id.to_string()))
        .bind(to_i32(task.attempts))
        .bind(dt_to_ms(task.updated_at))
        .bind(expected.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(SchedulerError::conflict(format!(
                "Task {} changed concurrently, expected '{expected}'",
                task.id
            )));
        }
        Ok(())
    }

    async fn renew_in(
        executor: &mut sqlx::PgConnection,
        id: LeaseId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, SchedulerError> {
        let sql = format!(
            "UPDATE leases
             SET last_heartbeat_ms = $2, expires_at_ms = $2 + ttl_seconds::BIGINT * 1000
             WHERE id = $1 AND status = 'active'
             RETURNING {LEASE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(dt_to_ms(now))
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    /// Expire one lease and apply retry-or-die to its task, in its own transaction.
    async fn expire_one(
        &self,
        lease_id: String,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiredLease>, SchedulerError> {
        let mut tx = self.pool.begin().await?;

        // task → lease の順で lock を取る
        let task = match Self::lock_task(&mut tx, task_id).await {
            Ok(task) => Some(task),
            Err(SchedulerError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let sql = format!(
            "UPDATE leases SET status = 'expired'
             WHERE id = $1 AND status = 'active' AND expires_at_ms < $2
             RETURNING {LEASE_COLUMNS}"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(&lease_id)
            .bind(dt_to_ms(now))
            .fetch_optional(&mut *tx)
            .await?
        else {
            // renewed after the scan
            tx.rollback().await?;
            return Ok(None);
        };
        let lease = lease_from_row(&row)?;

        let mut task_status = None;
        if let Some(mut task) = task {
            let before = task.status;
            if let Some(next) = task.expire(lease.id, now) {
                Self::write_task(&mut tx, &task, before).await?;
                task_status = Some(next);
            }
        }

        tx.commit().await?;
        Ok(Some(ExpiredLease { lease, task_status }))
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create_task(&self, task: Task) -> Result<Task, SchedulerError> {
        sqlx::query(
            "INSERT INTO tasks (id, context_id, agent_slug, prompt, context_hints, timeout_sec,
                 budget, desired_format, status, created_at_ms, updated_at_ms, lease_id,
                 worker_id, attempts, max_attempts)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(task.id.to_string())
        .bind(&task.context_id)
        .bind(&task.agent_slug)
        .bind(&task.prompt)
        .bind(&task.context_hints)
        .bind(to_i32(task.policy.timeout_sec))
        .bind(task.policy.budget)
        .bind(task.desired_format.as_str())
        .bind(task.status.as_str())
        .bind(dt_to_ms(task.created_at))
        .bind(dt_to_ms(task.updated_at))
        .bind(task.lease_id.map(|id| id.to_string()))
        .bind(task.worker_id.as_ref().map(|id| id.to_string()))
        .bind(to_i32(task.attempts))
        .bind(to_i32(task.max_attempts))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SchedulerError::conflict(format!("Task {} already exists", task.id))
            } else {
                SchedulerError::from(e)
            }
        })?;
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, SchedulerError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY created_at_ms, id"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(TaskStatus::as_str))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, TaskStatus), SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let mut task = Self::lock_task(&mut tx, id).await?;
        let previous = task.requeue(now)?;
        Self::write_task(&mut tx, &task, previous).await?;
        tx.commit().await?;
        Ok((task, previous))
    }

    async fn grant_lease(
        &self,
        lease: Lease,
        max_active: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease), SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let mut task = Self::lock_task(&mut tx, lease.task_id).await?;

        if let Some(limit) = max_active {
            // task → worker の順。worker 行の lock で同じ worker への発行を直列化する
            sqlx::query("SELECT id FROM workers WHERE id = $1 FOR UPDATE")
                .bind(lease.worker_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            let held: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM leases WHERE worker_id = $1 AND status = 'active'",
            )
            .bind(lease.worker_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            if held >= i64::from(limit) {
                tx.rollback().await?;
                return Err(SchedulerError::NoCapacity);
            }
        }

        let before = task.status;
        task.grant(lease.id, lease.worker_id.clone(), now)?;

        sqlx::query(
            "INSERT INTO leases (id, task_id, worker_id, started_at_ms, expires_at_ms,
                 ttl_seconds, status, last_heartbeat_ms, context_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(lease.id.to_string())
        .bind(lease.task_id.to_string())
        .bind(lease.worker_id.as_str())
        .bind(dt_to_ms(lease.started_at))
        .bind(dt_to_ms(lease.expires_at))
        .bind(to_i32(lease.ttl_seconds))
        .bind(lease.status.as_str())
        .bind(dt_to_ms(lease.last_heartbeat))
        .bind(&lease.context_id)
        .execute(&mut *tx)
        .await?;

        Self::write_task(&mut tx, &task, before).await?;
        tx.commit().await?;
        Ok((task, lease))
    }

    async fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>, SchedulerError> {
        let sql = format!("SELECT {LEASE_COLUMNS} FROM leases WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    async fn list_leases(&self, status: Option<LeaseStatus>) -> Result<Vec<Lease>, SchedulerError> {
        let sql = format!(
            "SELECT {LEASE_COLUMNS} FROM leases
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY started_at_ms, id"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(LeaseStatus::as_str))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(lease_from_row).collect()
    }

    async fn renew_lease(
        &self,
        id: LeaseId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, SchedulerError> {
        let mut conn = self.pool.acquire().await?;
        Self::renew_in(&mut conn, id, now).await
    }

    async fn release_lease(
        &self,
        id: LeaseId,
        status: LeaseStatus,
    ) -> Result<Option<Lease>, SchedulerError> {
        ensure_terminal(status)?;
        let sql = format!(
            "UPDATE leases SET status = $2
             WHERE id = $1 AND $2 <> 'active'
             RETURNING {LEASE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    async fn heartbeat(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(Task, Lease, TaskStatus), SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let mut task = Self::lock_task(&mut tx, task_id).await?;
        let lease_id = task
            .lease_id
            .ok_or_else(|| SchedulerError::not_found("Lease not found or already expired"))?;

        let lease = Self::renew_in(&mut tx, lease_id, now)
            .await?
            .ok_or_else(|| SchedulerError::not_found("Lease not found or already expired"))?;

        let before = task.status;
        task.mark_running(now)?;
        Self::write_task(&mut tx, &task, before).await?;
        tx.commit().await?;
        Ok((task, lease, before))
    }

    async fn complete_task(
        &self,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Result<Task, SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let mut task = Self::lock_task(&mut tx, result.task_id).await?;
        let before = task.status;
        let lease_id = task.lease_id;
        task.finish(result.status.is_success(), now)?;
        Self::write_task(&mut tx, &task, before).await?;

        if let Some(lease_id) = lease_id {
            sqlx::query("UPDATE leases SET status = 'released' WHERE id = $1")
                .bind(lease_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO task_results (id, task_id, worker_id, status, output, error_message,
                 duration_ms, tokens_used, completed_at_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(result.id.to_string())
        .bind(result.task_id.to_string())
        .bind(result.worker_id.as_ref().map(|id| id.to_string()))
        .bind(report_status_str(result.status))
        .bind(&result.output)
        .bind(&result.error_message)
        .bind(i64::try_from(result.metrics.duration_ms).unwrap_or(i64::MAX))
        .bind(result.metrics.tokens_used.and_then(|n| i64::try_from(n).ok()))
        .bind(dt_to_ms(result.completed_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn expire_stale_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredLease>, SchedulerError> {
        let candidates = sqlx::query(
            "SELECT id, task_id FROM leases
             WHERE status = 'active' AND expires_at_ms < $1
             ORDER BY id",
        )
        .bind(dt_to_ms(now))
        .fetch_all(&self.pool)
        .await?;
        debug!(candidates = candidates.len(), "stale lease scan");

        let mut expired = Vec::with_capacity(candidates.len());
        for row in candidates {
            let lease_id: String = row.try_get("id")?;
            let task_id: String = row.try_get("task_id")?;
            let task_id: TaskId = task_id.parse().map_err(|e| corrupt("task id", e))?;
            if let Some(done) = self.expire_one(lease_id, task_id, now).await? {
                expired.push(done);
            }
        }
        Ok(expired)
    }

    async fn upsert_worker(
        &self,
        patch: WorkerPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkerNode, SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1 FOR UPDATE");
        let existing = sqlx::query(&sql)
            .bind(patch.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let worker = match existing.as_ref().map(worker_from_row).transpose()? {
            Some(mut worker) => {
                patch.apply_to(&mut worker);
                sqlx::query(
                    "UPDATE workers
                     SET node_id = $2, url = $3, status = $4, claude_cli = $5,
                         max_concurrency = $6, labels = $7, last_heartbeat_ms = $8, ip_addrs = $9
                     WHERE id = $1",
                )
                .bind(worker.id.as_str())
                .bind(&worker.node_id)
                .bind(&worker.url)
                .bind(worker.status.as_str())
                .bind(worker.capabilities.claude_cli)
                .bind(to_i32(worker.capabilities.max_concurrency))
                .bind(&worker.capabilities.labels)
                .bind(worker.last_heartbeat.map(dt_to_ms))
                .bind(&worker.ip_addrs)
                .execute(&mut *tx)
                .await?;
                worker
            }
            None => {
                let worker = patch.into_worker(now);
                sqlx::query(
                    "INSERT INTO workers (id, node_id, url, status, claude_cli, max_concurrency,
                         labels, last_heartbeat_ms, ip_addrs, registered_at_ms)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(worker.id.as_str())
                .bind(&worker.node_id)
                .bind(&worker.url)
                .bind(worker.status.as_str())
                .bind(worker.capabilities.claude_cli)
                .bind(to_i32(worker.capabilities.max_concurrency))
                .bind(&worker.capabilities.labels)
                .bind(worker.last_heartbeat.map(dt_to_ms))
                .bind(&worker.ip_addrs)
                .bind(dt_to_ms(worker.registered_at))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        SchedulerError::conflict(format!(
                            "Worker {} was registered concurrently",
                            worker.id
                        ))
                    } else {
                        SchedulerError::from(e)
                    }
                })?;
                worker
            }
        };

        tx.commit().await?;
        Ok(worker)
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerNode>, SchedulerError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn list_workers(&self) -> Result<Vec<WorkerNode>, SchedulerError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(worker_from_row).collect()
    }

    async fn remove_worker(&self, id: &WorkerId) -> Result<bool, SchedulerError> {
        let deleted = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn list_results(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SchedulerError> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM task_results
             WHERE task_id = $1
             ORDER BY completed_at_ms, id"
        );
        let rows = sqlx::query(&sql)
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }
}
