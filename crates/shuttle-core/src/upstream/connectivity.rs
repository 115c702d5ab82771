//! ConnectivityState - upstream の到達性
//!
//! 成功 1 回で `consecutive_failures` は 0 に戻る。
//! client ごとに 1 つ持つ（グローバル状態にはしない）。

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub consecutive_failures: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ConnectivityState {
    pub fn connected(&self) -> bool {
        self.consecutive_failures == 0 && self.last_success.is_some()
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_success = Some(now);
    }

    /// Per-attempt failure. Does not count toward `consecutive_failures`.
    pub fn note_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// A call that exhausted its retries.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
    }
}

/// Wire view with the derived `connected` flag.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivitySnapshot {
    pub connected: bool,
    #[serde(flatten)]
    pub state: ConnectivityState,
}

impl From<ConnectivityState> for ConnectivitySnapshot {
    fn from(state: ConnectivityState) -> Self {
        Self {
            connected: state.connected(),
            state,
        }
    }
}
