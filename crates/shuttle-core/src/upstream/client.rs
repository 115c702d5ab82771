//! UpstreamClient - secondary control plane への HTTP 呼び出し
//!
//! - attempt ごとに timeout。timeout も network error も 5xx もリトライ対象
//! - `< 500` は即座に返す（4xx もリトライしない）
//! - リトライ前に `BackoffPolicy::next_delay` だけ待つ
//! - リトライを使い切ったら `SchedulerError::Upstream`
//!
//! base URL と admin key は実行中に差し替えられる（`/runtime/config`）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::backoff::BackoffPolicy;
use super::connectivity::{ConnectivitySnapshot, ConnectivityState};
use crate::domain::SchedulerError;
use crate::ports::{Clock, SystemClock};

pub const ADMIN_KEY_HEADER: &str = "X-MEMBRIDGE-ADMIN";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RETRIES: u32 = 3;

/// Mask a secret for display: `abcd****wxyz`, or `****` when 8 chars or fewer.
pub fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub admin_key: String,
}

impl UpstreamSettings {
    pub fn new(base_url: impl Into<String>, admin_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            admin_key: admin_key.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SchedulerError::validation(format!("membridge_server_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SchedulerError::validation(
                "membridge_server_url must be http or https",
            ));
        }
        if self.admin_key.is_empty() {
            return Err(SchedulerError::validation("admin_key must not be empty"));
        }
        Ok(())
    }
}

/// Display form of the runtime config. The key is never returned in clear.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigView {
    pub membridge_server_url: String,
    pub admin_key_masked: String,
    pub connected: bool,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_test: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub retries: u32,
    pub timeout: Duration,
}

impl CallOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get()
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SchedulerError> {
        serde_json::from_str(&self.body)
            .map_err(|e| SchedulerError::Upstream(format!("invalid JSON from upstream: {e}")))
    }
}

pub struct UpstreamClient {
    http: reqwest::Client,
    settings: RwLock<UpstreamSettings>,
    connectivity: Mutex<ConnectivityState>,
    last_test: Mutex<Option<DateTime<Utc>>>,
    backoff: BackoffPolicy,
    default_retries: u32,
    default_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl UpstreamClient {
    pub fn new(settings: UpstreamSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings: RwLock::new(settings),
            connectivity: Mutex::new(ConnectivityState::default()),
            last_test: Mutex::new(None),
            backoff: BackoffPolicy::upstream_default(),
            default_retries: DEFAULT_RETRIES,
            default_timeout: DEFAULT_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_defaults(mut self, retries: u32, timeout: Duration) -> Self {
        self.default_retries = retries;
        self.default_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Options preloaded with this client's default retries / timeout.
    pub fn options(&self, method: Method) -> CallOptions {
        CallOptions {
            method,
            body: None,
            retries: self.default_retries,
            timeout: self.default_timeout,
        }
    }

    pub async fn connectivity(&self) -> ConnectivitySnapshot {
        self.connectivity.lock().await.clone().into()
    }

    pub async fn settings(&self) -> UpstreamSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: UpstreamSettings) -> Result<(), SchedulerError> {
        settings.validate()?;
        *self.settings.write().await = settings;
        Ok(())
    }

    pub async fn config_view(&self) -> RuntimeConfigView {
        let settings = self.settings.read().await;
        RuntimeConfigView {
            membridge_server_url: settings.base_url.clone(),
            admin_key_masked: mask_key(&settings.admin_key),
            connected: self.connectivity.lock().await.connected(),
            last_test: *self.last_test.lock().await,
        }
    }

    /// `GET /health`. A non-2xx answer is reported as an error string, not an `Err`.
    pub async fn test_connection(&self) -> Result<Value, SchedulerError> {
        *self.last_test.lock().await = Some(self.clock.now());
        let resp = self
            .call("/health", self.options(Method::GET))
            .await?;
        if !resp.is_success() {
            return Err(SchedulerError::Upstream(format!("HTTP {}", resp.status)));
        }
        resp.json()
    }

    pub async fn call(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, SchedulerError> {
        let settings = self.settings().await;
        let url = format!("{}{}", settings.base_url.trim_end_matches('/'), path);

        let mut last_error = String::from("no attempt made");
        for attempt in 0..=options.retries {
            if attempt > 0 {
                let delay = self.backoff.next_delay(attempt);
                debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "retrying upstream call");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .request(options.method.clone(), &url)
                .timeout(options.timeout)
                .header(CONTENT_TYPE, "application/json");
            if !settings.admin_key.is_empty() {
                request = request.header(ADMIN_KEY_HEADER, &settings.admin_key);
            }
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            let error = match request.send().await {
                Ok(resp) if resp.status().as_u16() < 500 => {
                    let status = resp.status().as_u16();
                    match resp.text().await {
                        Ok(body) => {
                            self.connectivity
                                .lock()
                                .await
                                .record_success(self.clock.now());
                            return Ok(UpstreamResponse { status, body });
                        }
                        Err(e) => format!("failed to read body: {e}"),
                    }
                }
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) if e.is_timeout() => {
                    format!("Timeout after {}ms", options.timeout.as_millis())
                }
                Err(e) => e.to_string(),
            };

            warn!(url = %url, attempt, error = %error, "upstream attempt failed");
            self.connectivity.lock().await.note_error(error.clone());
            last_error = error;
        }

        self.connectivity
            .lock()
            .await
            .record_failure(last_error.clone());
        Err(SchedulerError::Upstream(last_error))
    }
}
