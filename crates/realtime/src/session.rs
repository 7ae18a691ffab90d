//! Session protocol: what a connection says on open and how outbound
//! messages become wire frames.

use tracing::warn;

use tradesim_protocol::{ConnectPayload, Frame, MessageType};

use crate::queue::PendingMessage;

/// Per-endpoint behavior plugged into a [`ConnectionManager`](crate::ConnectionManager).
pub trait SessionProtocol: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Path appended to the configured base URL.
    fn path(&self) -> &str {
        ""
    }

    /// Frames sent on every successful open, before the queue is flushed.
    fn handshake(&self, token: Option<&str>) -> Vec<Frame> {
        connect_handshake(token)
    }

    /// Turns a queued or direct `send` into a wire frame.
    fn shape(&self, message: &PendingMessage) -> Frame {
        shape_frame(message)
    }
}

/// CONNECT carrying the auth token, or nothing when there is no token.
pub fn connect_handshake(token: Option<&str>) -> Vec<Frame> {
    let Some(token) = token else {
        return Vec::new();
    };
    let payload = ConnectPayload {
        token: token.to_string(),
    };
    match Frame::with_payload(MessageType::Connect, &payload) {
        Ok(frame) => vec![frame],
        Err(e) => {
            warn!(error = %e, "failed to encode CONNECT payload");
            Vec::new()
        }
    }
}

/// Default shaping: a destination that names a message type becomes a frame
/// of that type; anything else becomes a MESSAGE frame addressed to it.
///
/// The frame is stamped with the time the message was enqueued.
pub fn shape_frame(message: &PendingMessage) -> Frame {
    let frame = match message.destination.parse::<MessageType>() {
        Ok(kind) => Frame::new(kind, message.payload.clone()),
        Err(_) => Frame::new(MessageType::Message, message.payload.clone())
            .destination(message.destination.as_str()),
    };
    frame
        .timestamp(message.enqueued_at)
        .headers(message.headers.clone())
}

/// Protocol with no path and the default handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainProtocol;

impl SessionProtocol for PlainProtocol {
    fn name(&self) -> &str {
        "plain"
    }
}
