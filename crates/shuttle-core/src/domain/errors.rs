//! Errors - エラー型と分類
//!
//! scheduler の操作はすべて `SchedulerError` を返す。
//! HTTP 層は `status_code()` でそのままステータスに写す。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// State-machine precondition violated.
    #[error("{0}")]
    Conflict(String),

    /// Unknown id, or lease no longer active.
    #[error("{0}")]
    NotFound(String),

    /// No eligible worker for the task.
    #[error("no available worker with free capacity")]
    NoCapacity,

    /// Secondary control plane unreachable or 5xx after retries.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Storage driver failure.
    #[error("store error: {0}")]
    Store(String),
}

impl SchedulerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Store(_) => 500,
            Self::Upstream(_) => 502,
            Self::NoCapacity => 503,
        }
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SchedulerError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Store(format!("migration failed: {e}"))
    }
}
