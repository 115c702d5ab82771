//! Outcome model: completion reports and the results recorded from them.
//!
//! A worker finishes a leased task by sending a `CompletionReport`. Each
//! accepted report is stored as a `TaskResult` so the task history can be
//! explained later, independently of the final task status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;
use super::ids::{ResultId, TaskId, WorkerId};

/// How the worker says the task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Error,
}

impl ReportStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ReportStatus::Success)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// Body of `POST /tasks/{id}/complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub status: ReportStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub metrics: Metrics,
}

impl CompletionReport {
    pub fn success(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ReportStatus::Success,
            output: Some(output.into()),
            error_message: None,
            metrics: Metrics {
                duration_ms,
                tokens_used: None,
            },
        }
    }

    pub fn error(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ReportStatus::Error,
            output: None,
            error_message: Some(message.into()),
            metrics: Metrics {
                duration_ms,
                tokens_used: None,
            },
        }
    }

    /// An error report should say what went wrong.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match (self.status, &self.error_message) {
            (ReportStatus::Error, Some(msg)) if msg.trim().is_empty() => Err(
                SchedulerError::validation("error_message must not be blank"),
            ),
            _ => Ok(()),
        }
    }
}

/// One accepted completion, kept as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub worker_id: Option<WorkerId>,
    pub status: ReportStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub metrics: Metrics,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn from_report(
        id: ResultId,
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        report: CompletionReport,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            worker_id,
            status: report.status,
            output: report.output,
            error_message: report.error_message,
            metrics: report.metrics,
            completed_at: now,
        }
    }
}
