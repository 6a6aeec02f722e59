//! `READY` event data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server configuration sent with `READY`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyConfig {
    /// CDN host for avatars and assets.
    #[serde(default)]
    pub cdn_host: String,
    /// API base URL.
    #[serde(default)]
    pub api_endpoint: String,
    /// Environment name, e.g. `production`.
    #[serde(default)]
    pub environment: String,
}

/// `data` of the `READY` dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Protocol version.
    #[serde(default)]
    pub v: u32,
    /// Server configuration.
    #[serde(default)]
    pub config: ReadyConfig,
    /// The connected user, when the peer reports one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<Value>,
}
