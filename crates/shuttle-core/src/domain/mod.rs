//! Domain model (IDs, tasks, leases, workers, outcomes, events, errors).
//!
//! ここは I/O を持たない。状態遷移のルールはすべてこの層に置き、
//! store / app 層はそれを呼ぶだけにする。

pub mod errors;
pub mod events;
pub mod ids;
pub mod lease;
pub mod outcome;
pub mod state;
pub mod task;
pub mod worker;

pub use self::errors::SchedulerError;
pub use self::events::{AuditAction, AuditEntry, AuditEvent, EntityType};
pub use self::ids::{AuditEventId, LeaseId, ParseIdError, ResultId, TaskId, WorkerId};
pub use self::lease::{DEFAULT_LEASE_TTL_SECS, Lease, MAX_LEASE_TTL_SECS, MIN_LEASE_TTL_SECS};
pub use self::outcome::{CompletionReport, Metrics, ReportStatus, TaskResult};
pub use self::state::{LeaseStatus, TaskStatus, WorkerStatus};
pub use self::task::{DesiredFormat, NewTask, Task, TaskPolicy};
pub use self::worker::{WorkerCapabilities, WorkerNode, WorkerPatch};
