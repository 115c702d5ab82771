//! Auditor - AuditEntry に id と時刻を付けて sink に渡す

use std::sync::Arc;

use crate::domain::AuditEntry;
use crate::ports::{AuditSink, Clock, IdGenerator};

#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, ids, clock }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let event = entry.stamp(self.ids.audit_event_id(), self.clock.now());
        self.sink.record(event).await;
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}
