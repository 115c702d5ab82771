//! LivenessSync - secondary source の agent 一覧と WorkerRegistry の突き合わせ
//!
//! # 1 サイクル
//! 1. `AgentSource::list_agents()`（失敗したらサイクルごと諦める）
//! 2. 未知の agent は新規登録、既知の worker は status / last_heartbeat / ip_addrs だけ反映
//! 3. poll に現れず、heartbeat が `stale_after` より古い `online` worker を `offline` にする
//!
//! サイクルは重ならない（`in_progress` を try_lock できなければ skip）。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::WorkerRegistry;
use crate::domain::{SchedulerError, WorkerId, WorkerStatus};
use crate::ports::{AgentSource, Clock};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub seen: usize,
    pub registered: usize,
    pub updated: usize,
    pub demoted: usize,
    pub skipped: bool,
}

pub struct LivenessSync {
    source: Arc<dyn AgentSource>,
    registry: Arc<WorkerRegistry>,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
    in_progress: Mutex<()>,
}

impl LivenessSync {
    pub fn new(
        source: Arc<dyn AgentSource>,
        registry: Arc<WorkerRegistry>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            clock,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            in_progress: Mutex::new(()),
        }
    }

    pub async fn sync_once(&self) -> Result<SyncReport, SchedulerError> {
        let Ok(_guard) = self.in_progress.try_lock() else {
            debug!("worker sync already running, skipping");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        };

        let agents = self.source.list_agents().await?;
        let now = self.clock.now();
        let mut report = SyncReport {
            seen: agents.len(),
            ..SyncReport::default()
        };

        let mut seen: HashSet<WorkerId> = HashSet::with_capacity(agents.len());
        for agent in agents {
            seen.insert(agent.id.clone());
            match self.registry.find_raw(&agent.id).await? {
                // status が変わらない heartbeat は監査ログに残さない
                Some(known) if known.status == agent.status => {
                    report.updated += 1;
                    self.registry.touch(agent.into_liveness_patch(now)).await?;
                }
                Some(_) => {
                    report.updated += 1;
                    self.registry
                        .upsert_as(agent.into_liveness_patch(now), "worker-sync")
                        .await?;
                }
                None => {
                    report.registered += 1;
                    self.registry
                        .upsert_as(agent.into_new_worker_patch(now), "worker-sync")
                        .await?;
                }
            }
        }

        for worker in self.registry.list().await? {
            if worker.status == WorkerStatus::Online
                && !seen.contains(&worker.id)
                && worker.is_stale(now, self.stale_after)
            {
                info!(worker_id = %worker.id, "worker missing from poll, marking offline");
                self.registry.mark_offline(&worker).await?;
                report.demoted += 1;
            }
        }

        Ok(report)
    }
}

/// Run `sync_once` every `interval` until shutdown. Errors are logged, never fatal.
pub async fn liveness_loop(
    sync: Arc<LivenessSync>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = ticker.tick() => {}
        }

        match sync.sync_once().await {
            Ok(report) if report.registered > 0 || report.demoted > 0 => {
                info!(
                    seen = report.seen,
                    registered = report.registered,
                    demoted = report.demoted,
                    "worker sync"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "worker sync failed, skipping cycle"),
        }
    }
    debug!("liveness loop stopped");
}
