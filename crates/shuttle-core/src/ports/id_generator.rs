//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{AuditEventId, Id, IdMarker, LeaseId, ResultId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は scheduler が採番する ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn lease_id(&self) -> LeaseId;

    fn result_id(&self) -> ResultId;

    fn audit_event_id(&self) -> AuditEventId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// FixedClock を渡せば timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn task_id(&self) -> TaskId {
        self.next()
    }

    fn lease_id(&self) -> LeaseId {
        self.next()
    }

    fn result_id(&self) -> ResultId {
        self.next()
    }

    fn audit_event_id(&self) -> AuditEventId {
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.task_id();
        let id2 = id_gen.task_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.lease_id();
        let id2 = id_gen.lease_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn prefixes_follow_id_type() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.task_id().to_string().starts_with("task-"));
        assert!(id_gen.lease_id().to_string().starts_with("lease-"));
        assert!(id_gen.result_id().to_string().starts_with("result-"));
        assert!(id_gen.audit_event_id().to_string().starts_with("audit-"));
    }
}
