//! Connection manager configuration.

use std::time::Duration;

use tradesim_protocol::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_WS_URL};

use crate::types::{HeartbeatConfig, ReconnectConfig};

/// Where the auth token is carried on the WebSocket handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPlacement {
    /// `Authorization: Bearer <token>` request header.
    #[default]
    Header,
    /// `token=<token>` query parameter.
    Query,
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL of the real-time endpoint. The session protocol's path is
    /// appended to it.
    pub url: String,
    pub auth: AuthPlacement,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    /// Time allowed for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.into(),
            auth: AuthPlacement::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ManagerConfig {
    /// Default configuration pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Joins the base URL with a protocol path, avoiding doubled slashes.
    pub fn endpoint_url(&self, path: &str) -> String {
        if path.is_empty() {
            return self.url.clone();
        }
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
