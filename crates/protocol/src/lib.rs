pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::Frame;
pub use messages::{
    ConnectPayload, DecisionAction, DecisionPayload, ErrorPayload, HeartbeatPayload,
    NotificationPayload, ReplayRef, SessionRef,
};
pub use types::{GameFrame, OhlcvData};
