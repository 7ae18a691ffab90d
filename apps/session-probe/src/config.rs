//! Probe configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/tradesim/probe.toml`
//! - Windows: `%APPDATA%/tradesim/probe.toml`
//!
//! `TRADESIM_WS_URL` and `TRADESIM_AUTH_TOKEN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tradesim_protocol::constants::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_WS_URL,
};
use tradesim_realtime::{AuthPlacement, ManagerConfig};

const ENV_URL: &str = "TRADESIM_WS_URL";
const ENV_TOKEN: &str = "TRADESIM_AUTH_TOKEN";

/// How the token travels on the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPlacement {
    #[default]
    Header,
    Query,
}

/// Probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Base URL of the real-time endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Bearer token sent on connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub auth_placement: TokenPlacement,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_url() -> String {
    DEFAULT_WS_URL.into()
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY.as_millis() as u64
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: None,
            auth_placement: TokenPlacement::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ProbeConfig {
    /// Loads configuration from disk, or creates a default if not found,
    /// then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads from `path`, writing defaults there if the file is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ProbeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = ProbeConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix (may contain a token).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_URL).filter(|v| !v.is_empty()) {
            self.url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.auth_token = Some(token);
        }
    }

    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.url.clone());
        config.auth = match self.auth_placement {
            TokenPlacement::Header => AuthPlacement::Header,
            TokenPlacement::Query => AuthPlacement::Query,
        };
        config.heartbeat.interval = Duration::from_millis(self.heartbeat_interval_ms);
        config.heartbeat.timeout = Duration::from_millis(self.heartbeat_timeout_ms);
        config.reconnect.base_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.reconnect.max_attempts = self.max_reconnect_attempts;
        config
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tradesim")
            .join("probe.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("tradesim").join("probe.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/tradesim/probe.toml"))
    }
}
