//! ReaperLoop - Lease 期限切れの回収
//!
//! # フロー
//! 1. interval ごとに `LeaseManager::tick()`
//! 2. 期限切れの lease を `expired` にし、紐づく task を `queued` / `dead` へ
//! 3. 失敗したサイクルは warn を出して次を待つ
//!
//! interval は最小 lease TTL（60s）より短くなければならない（builder で検証）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::lease_manager::LeaseManager;

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(30);

pub struct ReaperLoop {
    leases: Arc<LeaseManager>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(leases: Arc<LeaseManager>, interval: Duration) -> Self {
        Self { leases, interval }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                _ = ticker.tick() => {}
            }

            // tick 自体が info を出すので、ここでは失敗だけ拾う
            if let Err(e) = self.leases.tick().await {
                warn!(error = %e, "lease reaper cycle failed");
            }
        }
        debug!("reaper loop stopped");
    }
}
