//! Lease - task と worker を期限付きで結びつける
//!
//! `expires_at = last_heartbeat + ttl_seconds * 1000` を常に保つ。
//! status は active から一方向にしか動かない。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;
use super::ids::{LeaseId, TaskId, WorkerId};
use super::state::LeaseStatus;

pub const MIN_LEASE_TTL_SECS: u32 = 60;
pub const MAX_LEASE_TTL_SECS: u32 = 3600;
pub const DEFAULT_LEASE_TTL_SECS: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u32,
    pub status: LeaseStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_heartbeat: DateTime<Utc>,
    pub context_id: Option<String>,
}

impl Lease {
    pub fn new(
        id: LeaseId,
        task_id: TaskId,
        worker_id: WorkerId,
        ttl_seconds: u32,
        context_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            worker_id,
            started_at: now,
            expires_at: deadline(now, ttl_seconds),
            ttl_seconds,
            status: LeaseStatus::Active,
            last_heartbeat: now,
            context_id,
        }
    }

    /// Sliding renewal from `now`. Only an active lease can be renewed.
    pub fn renew(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if !self.status.is_active() {
            return Err(SchedulerError::not_found(format!(
                "Lease {} is not active",
                self.id
            )));
        }
        self.last_heartbeat = now;
        self.expires_at = deadline(now, self.ttl_seconds);
        Ok(())
    }

    /// Terminal transition from any status. Never back to active.
    pub fn release(&mut self, status: LeaseStatus) -> Result<(), SchedulerError> {
        ensure_terminal(status)?;
        self.status = status;
        Ok(())
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at < now
    }

    /// active → expired, only when the deadline has passed at `now`.
    pub fn expire_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_stale(now) {
            return false;
        }
        self.status = LeaseStatus::Expired;
        true
    }
}

pub fn deadline(from: DateTime<Utc>, ttl_seconds: u32) -> DateTime<Utc> {
    from + Duration::milliseconds(i64::from(ttl_seconds) * 1000)
}

/// A released lease must land on expired, released or failed.
pub fn ensure_terminal(status: LeaseStatus) -> Result<(), SchedulerError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(SchedulerError::validation(format!(
            "Lease cannot be released to '{status}'"
        )))
    }
}

pub fn validate_ttl(ttl_seconds: u32) -> Result<u32, SchedulerError> {
    if (MIN_LEASE_TTL_SECS..=MAX_LEASE_TTL_SECS).contains(&ttl_seconds) {
        Ok(ttl_seconds)
    } else {
        Err(SchedulerError::validation(format!(
            "ttl_seconds must be in [{MIN_LEASE_TTL_SECS}, {MAX_LEASE_TTL_SECS}], got {ttl_seconds}"
        )))
    }
}
