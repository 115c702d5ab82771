//! Worker - 実行ノードとその能力
//!
//! `active_leases` は保存値を信用しない。読み出し時に active lease を数え直して上書きする。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::WorkerId;
use super::state::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    #[serde(default = "default_true")]
    pub claude_cli: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> u32 {
    1
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            claude_cli: true,
            max_concurrency: 1,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: WorkerId,
    pub node_id: String,
    pub url: String,
    pub status: WorkerStatus,
    pub capabilities: WorkerCapabilities,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub ip_addrs: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub active_leases: u32,
}

impl WorkerNode {
    pub fn free_capacity(&self) -> u32 {
        self.capabilities
            .max_concurrency
            .saturating_sub(self.active_leases)
    }

    /// online, runs the CLI, and has a free slot.
    pub fn is_eligible(&self) -> bool {
        self.status == WorkerStatus::Online
            && self.capabilities.claude_cli
            && self.active_leases < self.capabilities.max_concurrency
    }

    /// No heartbeat within `stale_after` of `now`. A worker that never beat is stale.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match self.last_heartbeat {
            Some(at) => now - at > stale_after,
            None => true,
        }
    }
}

/// Partial worker update. `None` fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkerPatch {
    pub id: WorkerId,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<WorkerStatus>,
    #[serde(default)]
    pub capabilities: Option<WorkerCapabilities>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_addrs: Option<Vec<String>>,
}

impl WorkerPatch {
    pub fn new(id: impl Into<WorkerId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_capabilities(mut self, capabilities: WorkerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_last_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat = Some(at);
        self
    }

    /// Materialize a first-time worker. `node_id` falls back to the id.
    pub fn into_worker(self, now: DateTime<Utc>) -> WorkerNode {
        WorkerNode {
            node_id: self.node_id.unwrap_or_else(|| self.id.to_string()),
            id: self.id,
            url: self.url.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            capabilities: self.capabilities.unwrap_or_default(),
            last_heartbeat: self.last_heartbeat,
            ip_addrs: self.ip_addrs.unwrap_or_default(),
            registered_at: now,
            active_leases: 0,
        }
    }

    /// Merge into an existing worker. `id` and `registered_at` never change.
    pub fn apply_to(self, worker: &mut WorkerNode) {
        if let Some(node_id) = self.node_id {
            worker.node_id = node_id;
        }
        if let Some(url) = self.url {
            worker.url = url;
        }
        if let Some(status) = self.status {
            worker.status = status;
        }
        if let Some(capabilities) = self.capabilities {
            worker.capabilities = capabilities;
        }
        if let Some(at) = self.last_heartbeat {
            worker.last_heartbeat = Some(at);
        }
        if let Some(ip_addrs) = self.ip_addrs {
            worker.ip_addrs = ip_addrs;
        }
    }
}

impl From<&str> for WorkerPatch {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
