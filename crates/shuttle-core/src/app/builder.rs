//! RuntimeBuilder - Runtime の構築とワイヤリング
//!
//! 起動時に設定を検証する（Fail-fast）。
//! - upstream client は必須
//! - lease TTL は [60, 3600]
//! - reaper interval は最小 lease TTL より短い
//!
//! 指定しなかった部品は開発用の既定（InMemory store / audit、SystemClock、ULID）になる。

use std::sync::Arc;
use std::time::Duration;

use super::audit::Auditor;
use super::lease_manager::{LeaseConfig, LeaseManager};
use super::liveness::{DEFAULT_STALE_AFTER, DEFAULT_SYNC_INTERVAL, LivenessSync};
use super::reaper_loop::DEFAULT_REAPER_INTERVAL;
use super::registry::WorkerRegistry;
use super::runtime::{LoopIntervals, Runtime};
use crate::domain::{MAX_LEASE_TTL_SECS, MIN_LEASE_TTL_SECS};
use crate::impls::{InMemoryAuditLog, InMemoryTaskStore};
use crate::ports::{AgentSource, AuditSink, Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::upstream::{UpstreamAgentSource, UpstreamClient};

/// BuildError は Runtime 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("upstream client is required")]
    MissingUpstream,

    #[error("lease ttl {0}s is outside [{min}, {max}]", min = MIN_LEASE_TTL_SECS, max = MAX_LEASE_TTL_SECS)]
    InvalidLeaseTtl(u32),

    #[error("reaper interval {0:?} must be non-zero and shorter than the minimum lease ttl ({min}s)", min = MIN_LEASE_TTL_SECS)]
    InvalidReaperInterval(Duration),

    #[error("worker sync interval must be non-zero")]
    ZeroSyncInterval,
}

pub struct RuntimeBuilder {
    store: Option<Arc<dyn TaskStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    upstream: Option<Arc<UpstreamClient>>,
    agent_source: Option<Arc<dyn AgentSource>>,
    lease: LeaseConfig,
    reaper_interval: Duration,
    sync_interval: Duration,
    stale_after: Duration,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            audit: None,
            clock: None,
            ids: None,
            upstream: None,
            agent_source: None,
            lease: LeaseConfig::default(),
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn upstream(mut self, upstream: Arc<UpstreamClient>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Defaults to `GET /agents` on the upstream client.
    pub fn agent_source(mut self, source: Arc<dyn AgentSource>) -> Self {
        self.agent_source = Some(source);
        self
    }

    pub fn lease_ttl_secs(mut self, secs: u32) -> Self {
        self.lease.default_ttl_secs = secs;
        self
    }

    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        let upstream = self.upstream.ok_or(BuildError::MissingUpstream)?;

        let ttl = self.lease.default_ttl_secs;
        if !(MIN_LEASE_TTL_SECS..=MAX_LEASE_TTL_SECS).contains(&ttl) {
            return Err(BuildError::InvalidLeaseTtl(ttl));
        }
        if self.reaper_interval.is_zero()
            || self.reaper_interval >= Duration::from_secs(u64::from(MIN_LEASE_TTL_SECS))
        {
            return Err(BuildError::InvalidReaperInterval(self.reaper_interval));
        }
        if self.sync_interval.is_zero() {
            return Err(BuildError::ZeroSyncInterval);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store: Arc<dyn TaskStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let audit: Arc<dyn AuditSink> = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditLog::new()));
        let agent_source: Arc<dyn AgentSource> = self
            .agent_source
            .unwrap_or_else(|| Arc::new(UpstreamAgentSource::new(upstream.clone())));

        let auditor = Auditor::new(audit, ids.clone(), clock.clone());
        let leases = Arc::new(LeaseManager::new(
            store.clone(),
            ids.clone(),
            clock.clone(),
            auditor.clone(),
            self.lease,
        ));
        let workers = Arc::new(WorkerRegistry::new(
            store.clone(),
            clock.clone(),
            auditor.clone(),
        ));
        let liveness = Arc::new(LivenessSync::new(
            agent_source,
            workers.clone(),
            clock.clone(),
            self.stale_after,
        ));

        Ok(Runtime::from_parts(
            store,
            ids,
            clock,
            auditor,
            leases,
            workers,
            liveness,
            upstream,
            LoopIntervals {
                reaper: self.reaper_interval,
                sync: self.sync_interval,
            },
        ))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
