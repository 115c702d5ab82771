//! In-memory AuditSink.
//!
//! 上限 (`capacity`) を超えたら古い方から落として `retain` 件まで縮める。
//! 記録のたびに tracing にも流す。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::AuditEvent;
use crate::ports::AuditSink;

pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;
pub const DEFAULT_AUDIT_RETAIN: usize = 500;

#[derive(Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
    retain: usize,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_AUDIT_CAPACITY, DEFAULT_AUDIT_RETAIN)
    }

    /// `retain` is clamped to `capacity`.
    pub fn with_limits(capacity: usize, retain: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
            retain: retain.min(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        info!(
            action = ?event.action,
            entity_id = %event.entity_id,
            actor = %event.actor,
            "audit"
        );

        let mut entries = self.entries.lock().await;
        entries.push_back(event);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.retain;
            entries.drain(..excess);
        }
    }

    async fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }
}
