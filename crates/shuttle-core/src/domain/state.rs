//! State - タスク / Lease / Worker の状態
//!
//! # TaskStatus の状態遷移
//! - queued → leased（lease 発行、attempts += 1）
//! - leased → running（最初の heartbeat）
//! - leased | running → completed | failed（完了報告）
//! - leased | running → queued | dead（lease 期限切れ、attempts で分岐）
//! - failed | dead → queued（明示的な requeue、attempts = 0）

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a lease.
    Queued,

    /// Bound to a worker by an active lease, no heartbeat yet.
    Leased,

    /// The worker has sent at least one heartbeat.
    Running,

    /// Finished with a `success` report.
    Completed,

    /// Finished with a non-success report.
    Failed,

    /// Lease expired with attempts exhausted.
    Dead,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Leased,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Leased => "leased",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Dead => "dead",
        }
    }

    /// Holds a lease (`lease_id` must be set exactly in these states).
    pub fn holds_lease(self) -> bool {
        matches!(self, TaskStatus::Leased | TaskStatus::Running)
    }

    /// Eligible for a lease grant.
    pub fn is_leasable(self) -> bool {
        matches!(self, TaskStatus::Queued)
    }

    /// Accepts a completion report.
    pub fn is_completable(self) -> bool {
        self.holds_lease()
    }

    /// Accepts an explicit requeue.
    pub fn is_requeueable(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Dead)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Dead
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// Lease status. Monotonic: once it leaves `Active` it never comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Expired,
    Released,
    Failed,
}

impl LeaseStatus {
    pub const ALL: [LeaseStatus; 4] = [
        LeaseStatus::Active,
        LeaseStatus::Expired,
        LeaseStatus::Released,
        LeaseStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Expired => "expired",
            LeaseStatus::Released => "released",
            LeaseStatus::Failed => "failed",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, LeaseStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeaseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown lease status '{s}'"))
    }
}

/// Worker liveness as reported by the secondary control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Online,
    Offline,
    Syncing,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Syncing => "syncing",
            WorkerStatus::Error => "error",
            WorkerStatus::Unknown => "unknown",
        }
    }

    /// Lenient parse: anything unrecognized is `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "online" => WorkerStatus::Online,
            "offline" => WorkerStatus::Offline,
            "syncing" => WorkerStatus::Syncing,
            "error" => WorkerStatus::Error,
            _ => WorkerStatus::Unknown,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
