//! App - アプリケーション層
//!
//! ports を組み合わせて scheduler のロジックを実装する。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder**: 構築とワイヤリング（起動時検証）
//! - **Runtime**: HTTP 層から呼ばれる操作面
//! - **LeaseManager**: lease の発行・更新・期限切れ回収
//! - **WorkerRegistry**: worker の登録と active lease の数え直し
//! - **pick_worker**: worker 選択（sticky → 空き容量）
//! - **ReaperLoop / liveness_loop**: バックグラウンドループ

pub mod audit;
pub mod background;
pub mod builder;
pub mod lease_manager;
pub mod liveness;
pub mod reaper_loop;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod status;

pub use self::audit::Auditor;
pub use self::background::BackgroundLoops;
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::lease_manager::{LeaseConfig, LeaseManager, LeaseTickResult};
pub use self::liveness::{LivenessSync, SyncReport};
pub use self::reaper_loop::ReaperLoop;
pub use self::registry::{WorkerDetail, WorkerRegistry, WorkerSnapshot};
pub use self::runtime::{
    CompletionAck, ConfigUpdate, ConnectionTest, HeartbeatAck, LeaseGrant, LeaseRequest, Runtime,
};
pub use self::scheduler::pick_worker;
pub use self::status::RuntimeStats;
