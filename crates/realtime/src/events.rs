//! Typed event stream exposed by the connection manager.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use tradesim_protocol::{Frame, MessageType};

use crate::error::ConnectionError;
use crate::types::ConnectionState;

/// Events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The transport opened and the outbound queue was flushed.
    Connected,
    /// An established connection ended.
    Disconnected { code: u16, reason: String },
    /// A connection attempt failed, or reconnecting gave up.
    Error(ConnectionError),
    /// The state machine moved.
    StateChanged(ConnectionState),
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// An inbound application frame.
    Message(Frame),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connected => EventKind::Connect,
            ConnectionEvent::Disconnected { .. } => EventKind::Disconnect,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::StateChanged(_) => EventKind::StateChanged,
            ConnectionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ConnectionEvent::Message(frame) => EventKind::Message(frame.kind),
        }
    }
}

/// Key under which listeners register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    StateChanged,
    Reconnecting,
    /// Inbound frames of one message type.
    Message(MessageType),
}

/// Identifies a listener registered with `on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Listener sets keyed by event kind, each in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl Listeners {
    pub(crate) fn add(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.by_kind.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.by_kind.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    /// Snapshot of the listeners for `kind`, so they can run unlocked.
    pub(crate) fn snapshot(&self, kind: &EventKind) -> Vec<Listener> {
        self.by_kind
            .get(kind)
            .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }
}

/// Runs each listener; a panicking listener is logged and skipped.
pub(crate) fn dispatch(listeners: &[Listener], event: &ConnectionEvent) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            error!(kind = ?event.kind(), "event listener panicked");
        }
    }
}
