//! Public types for the connection manager.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use tradesim_protocol::constants::{
    CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
    DEFAULT_RECONNECT_MAX_DELAY,
};

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport. Initial state.
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Transport open; frames flow.
    Connected,
    /// Connection lost, waiting to retry. `attempt` is 1-based.
    Reconnecting { attempt: u32 },
    /// Explicit teardown in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting ({attempt})"),
            ConnectionState::Closing => f.write_str("closing"),
        }
    }
}

/// Why an established connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed with code 1000.
    Normal { reason: String },
    /// Peer closed with any other code, or the stream ended without a close frame.
    Abnormal { code: u16, reason: String },
    /// No inbound frame arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// Read error on the socket.
    Transport(String),
    /// Local teardown; never triggers a reconnect.
    Cancelled,
}

impl CloseReason {
    /// Close code reported in the `Disconnect` event.
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Normal { .. } | CloseReason::Cancelled => CLOSE_NORMAL,
            CloseReason::Abnormal { code, .. } => *code,
            CloseReason::HeartbeatTimeout => CLOSE_HEARTBEAT_TIMEOUT,
            CloseReason::Transport(_) => CLOSE_ABNORMAL,
        }
    }

    /// Human-readable reason reported in the `Disconnect` event.
    pub fn reason(&self) -> String {
        match self {
            CloseReason::Normal { reason } | CloseReason::Abnormal { reason, .. } => {
                reason.clone()
            }
            CloseReason::HeartbeatTimeout => "heartbeat timeout".into(),
            CloseReason::Transport(e) => e.clone(),
            CloseReason::Cancelled => "client disconnect".into(),
        }
    }

    /// Whether the close should start a reconnect cycle.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, CloseReason::Normal { .. } | CloseReason::Cancelled)
    }
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Attempts made after an unexpected close before giving up.
    pub max_attempts: u32,
    /// Upper bound on any single delay. `None` leaves growth unbounded.
    pub max_delay: Option<Duration>,
    /// Jitter as a fraction of the delay, in `[0.0, 1.0]`. `0.0` disables it.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_delay: Some(DEFAULT_RECONNECT_MAX_DELAY),
            jitter: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay before attempt `attempt` (0-based):
    /// `base_delay * 2^attempt`, capped at `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = 1u32
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        let capped = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if self.jitter <= 0.0 {
            return capped;
        }
        let spread = capped.as_secs_f64() * self.jitter.min(1.0);
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped.as_secs_f64() + spread * offset).max(0.0);
        Duration::try_from_secs_f64(with_jitter).unwrap_or(capped)
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Period between outgoing HEARTBEAT frames. Zero disables heartbeats.
    pub interval: Duration,
    /// How long after a heartbeat an inbound frame must arrive.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}
