//! Upstream - secondary control plane (membridge) との通信
//!
//! - **UpstreamClient**: timeout / retry / backoff + jitter / 到達性の追跡
//! - **UpstreamAgentSource**: `GET /agents` を `AgentSource` として公開

pub mod agents;
pub mod backoff;
pub mod client;
pub mod connectivity;

pub use self::agents::UpstreamAgentSource;
pub use self::backoff::BackoffPolicy;
pub use self::client::{
    ADMIN_KEY_HEADER, CallOptions, RuntimeConfigView, UpstreamClient, UpstreamResponse,
    UpstreamSettings, mask_key,
};
pub use self::connectivity::{ConnectivitySnapshot, ConnectivityState};
