use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base URL of the real-time endpoint.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// How often a HEARTBEAT frame is sent while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for any inbound frame after a heartbeat was sent.
///
/// If nothing arrives within this window the connection is considered dead
/// and a reconnect cycle starts.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the first reconnect attempt. Doubles on every attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound applied to the reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts after an unexpected close before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum inbound message size in bytes (4 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Normal closure. The only close code that does not trigger a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Sent by the client when the heartbeat watchdog expires.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Type tag of a wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Connection
    Connect,
    Disconnect,
    Heartbeat,

    // Game flow
    GameStart,
    GamePause,
    GameResume,
    GameEnd,
    FrameUpdate,
    DecisionResult,
    ScoreUpdate,

    // System
    Error,
    Notification,

    /// Application message addressed by the frame's `destination`.
    Message,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Every known type, in declaration order.
    pub const ALL: [MessageType; 13] = [
        MessageType::Connect,
        MessageType::Disconnect,
        MessageType::Heartbeat,
        MessageType::GameStart,
        MessageType::GamePause,
        MessageType::GameResume,
        MessageType::GameEnd,
        MessageType::FrameUpdate,
        MessageType::DecisionResult,
        MessageType::ScoreUpdate,
        MessageType::Error,
        MessageType::Notification,
        MessageType::Message,
    ];

    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "CONNECT",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::GameStart => "GAME_START",
            MessageType::GamePause => "GAME_PAUSE",
            MessageType::GameResume => "GAME_RESUME",
            MessageType::GameEnd => "GAME_END",
            MessageType::FrameUpdate => "FRAME_UPDATE",
            MessageType::DecisionResult => "DECISION_RESULT",
            MessageType::ScoreUpdate => "SCORE_UPDATE",
            MessageType::Error => "ERROR",
            MessageType::Notification => "NOTIFICATION",
            MessageType::Message => "MESSAGE",
            MessageType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not the wire name of a known [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}
