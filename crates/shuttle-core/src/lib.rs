//! shuttle-core
//!
//! Core building blocks for the Shuttle task-lease scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, lease, worker, outcome, state, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, AuditSink, AgentSource, Clock, IdGenerator）
//! - **impls**: 実装（InMemory / PostgreSQL の TaskStore、InMemory の監査ログ）
//! - **upstream**: secondary control plane 向けの resilient HTTP client
//! - **app**: アプリケーションロジック（builder, runtime, lease manager, scheduler, loops）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod upstream;
