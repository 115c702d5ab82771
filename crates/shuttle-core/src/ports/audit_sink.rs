//! AuditSink port - 監査ログの書き込み先
//!
//! 書き込みは失敗しない扱い（sink 側でログに落とす）。
//! scheduler の遷移は監査ログの成否に左右されない。

use async_trait::async_trait;

use crate::domain::AuditEvent;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);

    /// Newest first, at most `limit` entries.
    async fn recent(&self, limit: usize) -> Vec<AuditEvent>;
}
