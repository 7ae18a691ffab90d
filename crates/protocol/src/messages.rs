use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connection payloads
// ---------------------------------------------------------------------------

/// Sent as the first frame after the socket opens to authenticate the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub token: String,
}

/// Liveness probe. `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Game and replay payloads
// ---------------------------------------------------------------------------

/// Identifies a live game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
}

/// Identifies a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRef {
    pub replay_id: String,
}

/// Trading action taken by the player on the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Buy,
    Sell,
    Hold,
}

/// A decision submitted for the active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPayload {
    pub session_id: String,
    #[serde(rename = "type")]
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

// ---------------------------------------------------------------------------
// System payloads
// ---------------------------------------------------------------------------

/// Server-pushed user notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    /// One of `success`, `info`, `warning`, `error`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Display duration in milliseconds; `0` keeps the notification open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Server-pushed error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
