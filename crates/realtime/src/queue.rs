//! Outbound messages held while the connection is down.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

/// A `send` issued while not connected.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub destination: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(
        destination: impl Into<String>,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            payload,
            headers,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO of pending messages. Insertion order is flush order.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    messages: VecDeque<PendingMessage>,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, message: PendingMessage) {
        self.messages.push_back(message);
    }

    /// Removes and returns every message, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<PendingMessage> {
        self.messages.drain(..).collect()
    }

    /// Drops every message and returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.messages.len();
        self.messages.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}
