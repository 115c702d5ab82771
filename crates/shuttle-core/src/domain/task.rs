//! Task model + state machine.
//!
//! `Task` is the single source of truth for a unit of work. Every status change
//! goes through one of the transition methods below; stores either call them
//! under their lock (in-memory) or mirror them in conditional SQL (Postgres).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;
use super::ids::{LeaseId, TaskId, WorkerId};
use super::state::TaskStatus;

pub const MIN_TIMEOUT_SEC: u32 = 1;
pub const MAX_TIMEOUT_SEC: u32 = 3600;
pub const MIN_MAX_ATTEMPTS: u32 = 1;
pub const MAX_MAX_ATTEMPTS: u32 = 10;

/// Execution policy attached to a task.
///
/// `timeout_sec` is enforced by whoever dispatches to the worker, not by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    #[serde(default = "TaskPolicy::default_timeout_sec")]
    pub timeout_sec: u32,
    #[serde(default)]
    pub budget: f64,
}

impl TaskPolicy {
    fn default_timeout_sec() -> u32 {
        120
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            timeout_sec: Self::default_timeout_sec(),
            budget: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredFormat {
    Json,
    #[default]
    Text,
}

impl DesiredFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DesiredFormat::Json => "json",
            DesiredFormat::Text => "text",
        }
    }
}

/// Submission payload for `POST /tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub context_id: String,
    pub agent_slug: String,
    pub prompt: String,
    #[serde(default)]
    pub context_hints: Vec<String>,
    #[serde(default)]
    pub policy: TaskPolicy,
    #[serde(default)]
    pub desired_format: DesiredFormat,
    #[serde(default = "NewTask::default_max_attempts")]
    pub max_attempts: u32,
}

impl NewTask {
    fn default_max_attempts() -> u32 {
        3
    }

    pub fn new(
        context_id: impl Into<String>,
        agent_slug: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            agent_slug: agent_slug.into(),
            prompt: prompt.into(),
            context_hints: Vec::new(),
            policy: TaskPolicy::default(),
            desired_format: DesiredFormat::default(),
            max_attempts: Self::default_max_attempts(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check the submission against policy bounds.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let mut problems = Vec::new();
        if self.context_id.trim().is_empty() {
            problems.push("context_id must not be empty".to_string());
        }
        if self.agent_slug.trim().is_empty() {
            problems.push("agent_slug must not be empty".to_string());
        }
        if self.prompt.is_empty() {
            problems.push("prompt must not be empty".to_string());
        }
        if !(MIN_TIMEOUT_SEC..=MAX_TIMEOUT_SEC).contains(&self.policy.timeout_sec) {
            problems.push(format!(
                "policy.timeout_sec must be in [{MIN_TIMEOUT_SEC}, {MAX_TIMEOUT_SEC}], got {}",
                self.policy.timeout_sec
            ));
        }
        if !self.policy.budget.is_finite() || self.policy.budget < 0.0 {
            problems.push("policy.budget must be >= 0".to_string());
        }
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&self.max_attempts) {
            problems.push(format!(
                "max_attempts must be in [{MIN_MAX_ATTEMPTS}, {MAX_MAX_ATTEMPTS}], got {}",
                self.max_attempts
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Validation(problems.join("; ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub context_id: String,
    pub agent_slug: String,
    pub prompt: String,
    #[serde(default)]
    pub context_hints: Vec<String>,
    pub policy: TaskPolicy,
    pub desired_format: DesiredFormat,
    pub status: TaskStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub lease_id: Option<LeaseId>,
    pub worker_id: Option<WorkerId>,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl Task {
    pub fn new(id: TaskId, input: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            context_id: input.context_id,
            agent_slug: input.agent_slug,
            prompt: input.prompt,
            context_hints: input.context_hints,
            policy: input.policy,
            desired_format: input.desired_format,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            lease_id: None,
            worker_id: None,
            attempts: 0,
            max_attempts: input.max_attempts,
        }
    }

    /// queued → leased. Counts one attempt.
    pub fn grant(
        &mut self,
        lease_id: LeaseId,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if !self.status.is_leasable() {
            return Err(SchedulerError::conflict(format!(
                "Task status is '{}', expected 'queued'",
                self.status
            )));
        }
        self.status = TaskStatus::Leased;
        self.lease_id = Some(lease_id);
        self.worker_id = Some(worker_id);
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.updated_at = now;
        Ok(())
    }

    /// leased → running on heartbeat. Already running just bumps `updated_at`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if !self.status.holds_lease() {
            return Err(SchedulerError::not_found(format!(
                "Task {} has no active lease",
                self.id
            )));
        }
        self.status = TaskStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    /// leased | running → completed | failed.
    pub fn finish(&mut self, success: bool, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if !self.status.is_completable() {
            return Err(SchedulerError::conflict(format!(
                "Task status is '{}', expected 'leased' or 'running'",
                self.status
            )));
        }
        self.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.lease_id = None;
        self.updated_at = now;
        Ok(())
    }

    /// Apply the retry-or-die rule after `lease_id` expired.
    ///
    /// Returns the new status, or `None` when the task is no longer bound to that lease.
    pub fn expire(&mut self, lease_id: LeaseId, now: DateTime<Utc>) -> Option<TaskStatus> {
        if !self.status.holds_lease() || self.lease_id != Some(lease_id) {
            return None;
        }
        self.lease_id = None;
        if self.attempts < self.max_attempts {
            self.status = TaskStatus::Queued;
            self.worker_id = None;
        } else {
            self.status = TaskStatus::Dead;
        }
        self.updated_at = now;
        Some(self.status)
    }

    /// failed | dead → queued, fresh attempt budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<TaskStatus, SchedulerError> {
        if !self.status.is_requeueable() {
            return Err(SchedulerError::conflict(format!(
                "Cannot requeue task with status '{}'",
                self.status
            )));
        }
        let previous = self.status;
        self.status = TaskStatus::Queued;
        self.lease_id = None;
        self.worker_id = None;
        self.attempts = 0;
        self.updated_at = now;
        Ok(previous)
    }
}
