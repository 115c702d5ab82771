//! Events - 監査ログに流す状態遷移イベント
//!
//! scheduler は遷移のたびに `AuditEvent` を作って `AuditSink::record` に渡す。
//! 永続化は sink 側の責務。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::AuditEventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TaskCreated,
    TaskLeased,
    TaskRunning,
    TaskCompleted,
    TaskRequeued,
    LeaseExpired,
    TaskDead,
    WorkerUpserted,
    WorkerRemoved,
    WorkerOffline,
    ConfigUpdated,
    ConnectionTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Lease,
    Worker,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor: String,
    #[serde(default)]
    pub detail: Value,
}

/// Event contents before the sink stamps `id` / `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor: String,
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_type: EntityType, entity_id: impl ToString) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            actor: "system".to_string(),
            detail: Value::Null,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn stamp(self, id: AuditEventId, timestamp: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            id,
            timestamp,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor: self.actor,
            detail: self.detail,
        }
    }
}
