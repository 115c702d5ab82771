//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発・テスト用の正本（単一 Mutex）
//! - **PostgresTaskStore**: 本番用の正本（sqlx + 埋め込み migration）
//! - **InMemoryAuditLog**: 件数上限付きの監査ログ

pub mod memory_audit;
pub mod memory_store;
pub mod pg_store;

#[cfg(test)]
pub(crate) mod conformance;

pub use self::memory_audit::InMemoryAuditLog;
pub use self::memory_store::InMemoryTaskStore;
pub use self::pg_store::PostgresTaskStore;
