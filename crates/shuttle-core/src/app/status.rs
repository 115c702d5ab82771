//! Status - `GET /stats` の集計ビュー

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Lease, Task, TaskStatus, WorkerNode, WorkerStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    /// Every status is present, zero when empty.
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseCounts {
    pub total: usize,
    pub active: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCounts {
    pub total: usize,
    pub online: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeStats {
    pub tasks: TaskCounts,
    pub leases: LeaseCounts,
    pub workers: WorkerCounts,
}

impl RuntimeStats {
    pub fn collect(tasks: &[Task], leases: &[Lease], workers: &[WorkerNode]) -> Self {
        let mut by_status: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for task in tasks {
            *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
        }

        Self {
            tasks: TaskCounts {
                total: tasks.len(),
                by_status,
            },
            leases: LeaseCounts {
                total: leases.len(),
                active: leases.iter().filter(|l| l.status.is_active()).count(),
            },
            workers: WorkerCounts {
                total: workers.len(),
                online: workers
                    .iter()
                    .filter(|w| w.status == WorkerStatus::Online)
                    .count(),
            },
        }
    }
}
