//! Client-side real-time session layer for the trading simulator.
//!
//! [`ConnectionManager`] owns one WebSocket connection to the game backend:
//! connect/disconnect lifecycle, reconnect with exponential backoff,
//! heartbeat liveness detection, FIFO queueing while disconnected,
//! destination-keyed subscriptions and a typed event stream.
//! [`GameClient`] and [`ReplayClient`] layer the game and replay protocols
//! on top of it.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod game;
pub mod manager;
mod pumps;
pub mod queue;
pub(crate) mod reconnection;
pub mod replay;
pub mod session;
pub mod subscriptions;
pub mod transport;
pub mod types;
mod watchdog;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{AuthPlacement, ManagerConfig};
pub use context::{
    LogReporter, Notification, NotificationKind, NotificationLog, Reporter, SessionContext,
    StaticToken, TokenSource,
};
pub use error::{ConnectionError, TransportError};
pub use events::{ConnectionEvent, EventKind, ListenerId};
pub use game::{Decision, GameClient, GameProtocol};
pub use manager::ConnectionManager;
pub use queue::PendingMessage;
pub use replay::{ReplayClient, ReplayProtocol};
pub use session::{PlainProtocol, SessionProtocol};
pub use subscriptions::{SubscriptionHandle, SubscriptionTarget};
pub use transport::{Connector, Endpoint, TungsteniteConnector};
pub use types::{CloseReason, ConnectionState, HeartbeatConfig, ReconnectConfig};
