//! Server configuration from CLI flags, environment and `.env`.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use shuttle_core::upstream::mask_key;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {0}: {1}")]
    InvalidBind(String, std::net::AddrParseError),

    #[error("MEMBRIDGE_SERVER_URL must start with http:// or https://, got {0:?}")]
    InvalidUpstreamUrl(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// shuttle-server: task-lease scheduler for LLM worker nodes.
#[derive(Parser, Debug, Clone)]
#[command(name = "shuttle-server", version, about)]
pub struct ServerConfig {
    /// Interface to bind.
    #[arg(long, env = "SHUTTLE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SHUTTLE_PORT", default_value_t = 5000)]
    pub port: u16,

    /// PostgreSQL URL. In-memory store when unset.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Secondary control plane base URL.
    #[arg(long, env = "MEMBRIDGE_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    pub membridge_server_url: String,

    #[arg(long, env = "MEMBRIDGE_ADMIN_KEY", default_value = "", hide_env_values = true)]
    pub membridge_admin_key: String,

    /// Default lease TTL in seconds (60..=3600).
    #[arg(long, env = "LEASE_TTL_SECONDS", default_value_t = 300)]
    pub lease_ttl_seconds: u32,

    #[arg(long, env = "REAPER_INTERVAL_SECS", default_value_t = 30)]
    pub reaper_interval_secs: u64,

    #[arg(long, env = "WORKER_SYNC_INTERVAL_SECS", default_value_t = 10)]
    pub worker_sync_interval_secs: u64,

    /// Online workers missing from the poll for this long go offline.
    #[arg(long, env = "WORKER_STALE_SECS", default_value_t = 60)]
    pub worker_stale_secs: u64,

    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 10_000)]
    pub upstream_timeout_ms: u64,

    #[arg(long, env = "UPSTREAM_RETRIES", default_value_t = 3)]
    pub upstream_retries: u32,
}

impl ServerConfig {
    /// Load `.env` (if any), then parse flags and environment.
    pub fn load() -> Result<Self, ConfigError> {
        // missing .env is fine
        let _ = dotenvy::dotenv();
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        let url = self.membridge_server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUpstreamUrl(url.to_string()));
        }
        if self.worker_stale_secs == 0 {
            return Err(ConfigError::Zero("WORKER_STALE_SECS"));
        }
        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::Zero("UPSTREAM_TIMEOUT_MS"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse()
            .map_err(|e| ConfigError::InvalidBind(raw, e))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.worker_sync_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.worker_stale_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn log_summary(&self) {
        info!("Config loaded:");
        info!("  server:      {}:{}", self.host, self.port);
        info!(
            "  store:       {}",
            if self.database_url.is_some() { "postgres" } else { "in-memory" }
        );
        info!(
            "  membridge:   url={}, admin_key={}",
            self.membridge_server_url,
            display_key(&self.membridge_admin_key)
        );
        info!(
            "  upstream:    timeout={}ms, retries={}",
            self.upstream_timeout_ms, self.upstream_retries
        );
        info!(
            "  leases:      ttl={}s, reaper every {}s",
            self.lease_ttl_seconds, self.reaper_interval_secs
        );
        info!(
            "  workers:     sync every {}s, stale after {}s",
            self.worker_sync_interval_secs, self.worker_stale_secs
        );
    }
}

fn display_key(key: &str) -> String {
    if key.is_empty() {
        "(none)".to_string()
    } else {
        mask_key(key)
    }
}
