//! AgentSource port - secondary control plane が知っている agent 一覧
//!
//! liveness sync はここから poll して WorkerRegistry に反映する。
//! 本番実装は `upstream::UpstreamAgentSource`（`GET /agents`）。

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::domain::{SchedulerError, WorkerCapabilities, WorkerId, WorkerPatch, WorkerStatus};

/// One agent as reported by the poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAgent {
    pub id: WorkerId,
    pub url: Option<String>,
    pub status: WorkerStatus,
    pub capabilities: WorkerCapabilities,
    pub last_seen: Option<DateTime<Utc>>,
    pub ip_addrs: Option<Vec<String>>,
}

impl RemoteAgent {
    /// Parse one entry of the `/agents` payload.
    ///
    /// id は `name` → `node_id` → `id` の順に探す。どれも無ければ `None`。
    pub fn from_json(value: &Value) -> Option<Self> {
        let id = ["name", "node_id", "id"]
            .iter()
            .find_map(|key| non_empty_str(value.get(*key)))?;

        let caps = value.get("capabilities");
        let claude_cli = caps
            .and_then(|c| c.get("claude_cli"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let max_concurrency = caps
            .and_then(|c| c.get("max_concurrency"))
            .or_else(|| value.get("max_concurrency"))
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1);
        let labels = caps
            .and_then(|c| c.get("labels"))
            .or_else(|| value.get("labels"))
            .map(string_list)
            .unwrap_or_default();

        Some(Self {
            id: WorkerId::new(id),
            url: non_empty_str(value.get("url")).map(str::to_string),
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(WorkerStatus::parse_lenient)
                .unwrap_or_default(),
            capabilities: WorkerCapabilities {
                claude_cli,
                max_concurrency,
                labels,
            },
            last_seen: value
                .get("last_seen")
                .and_then(Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            ip_addrs: value.get("ip_addrs").map(string_list),
        })
    }

    /// Full record for an agent we have never seen.
    pub fn into_new_worker_patch(self, now: DateTime<Utc>) -> WorkerPatch {
        WorkerPatch {
            node_id: Some(self.id.to_string()),
            url: self.url,
            status: Some(self.status),
            capabilities: Some(self.capabilities),
            last_heartbeat: Some(self.last_seen.unwrap_or(now)),
            ip_addrs: self.ip_addrs,
            id: self.id,
        }
    }

    /// Liveness-only merge for a known worker. Identity fields are left alone.
    pub fn into_liveness_patch(self, now: DateTime<Utc>) -> WorkerPatch {
        WorkerPatch {
            status: Some(self.status),
            last_heartbeat: Some(self.last_seen.unwrap_or(now)),
            ip_addrs: self.ip_addrs,
            ..WorkerPatch::new(self.id)
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
pub trait AgentSource: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<RemoteAgent>, SchedulerError>;
}
