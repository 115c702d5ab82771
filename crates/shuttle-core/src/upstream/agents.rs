//! `GET /agents` を AgentSource として使う

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::client::UpstreamClient;
use crate::domain::SchedulerError;
use crate::ports::{AgentSource, RemoteAgent};

pub struct UpstreamAgentSource {
    client: Arc<UpstreamClient>,
    retries: u32,
    timeout: Duration,
}

impl UpstreamAgentSource {
    /// Poll settings for liveness sync: one retry, 8s per attempt.
    pub fn new(client: Arc<UpstreamClient>) -> Self {
        Self {
            client,
            retries: 1,
            timeout: Duration::from_secs(8),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AgentSource for UpstreamAgentSource {
    async fn list_agents(&self) -> Result<Vec<RemoteAgent>, SchedulerError> {
        let options = self
            .client
            .options(Method::GET)
            .retries(self.retries)
            .timeout(self.timeout);
        let resp = self.client.call("/agents", options).await?;
        if !resp.is_success() {
            return Err(SchedulerError::Upstream(format!(
                "GET /agents returned HTTP {}",
                resp.status
            )));
        }

        let payload: Value = resp.json()?;
        let items = payload
            .as_array()
            .ok_or_else(|| SchedulerError::Upstream("GET /agents: expected a JSON array".into()))?;

        let agents: Vec<RemoteAgent> = items.iter().filter_map(RemoteAgent::from_json).collect();
        if agents.len() < items.len() {
            debug!(skipped = items.len() - agents.len(), "agents without an id were ignored");
        }
        Ok(agents)
    }
}
