//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部（PostgreSQL, secondary control plane,
//! 監査ログ, 時計）へのインターフェースを trait で定義し、実装の詳細を隠す。
//!
//! - TaskStore が source of truth（正本）
//! - AgentSource は worker の liveness を教えてくれるだけ。正本にはならない

pub mod agent_source;
pub mod audit_sink;
pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::agent_source::{AgentSource, RemoteAgent};
pub use self::audit_sink::AuditSink;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ExpiredLease, TaskStore};
