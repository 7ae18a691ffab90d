//! WebSocket read pump: decodes inbound frames and watches liveness.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tradesim_protocol::Frame;
use tradesim_protocol::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL, WS_MAX_MESSAGE_SIZE};

use crate::types::CloseReason;
use crate::watchdog::Watchdog;

/// Reads messages from the WebSocket and hands decoded frames to `on_frame`.
///
/// Any incoming message disarms the heartbeat watchdog. Returns why the
/// connection ended; the caller decides whether to reconnect.
pub(crate) async fn read_pump<S, F>(
    mut read: S,
    watchdog: Watchdog,
    on_frame: F,
    write_tx: mpsc::UnboundedSender<tungstenite::Message>,
    cancel: CancellationToken,
) -> CloseReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    F: Fn(Frame),
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Cancelled,

            () = watchdog.expired() => {
                warn!("heartbeat timeout, connection considered dead");
                return CloseReason::HeartbeatTimeout;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return CloseReason::Transport(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return CloseReason::Abnormal {
                            code: CLOSE_ABNORMAL,
                            reason: "stream ended".into(),
                        };
                    }
                };

                watchdog.disarm();

                match msg {
                    tungstenite::Message::Text(text) => {
                        if let Some(frame) = decode_frame(text.as_str()) {
                            on_frame(frame);
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data));
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        return match frame {
                            Some(f) if u16::from(f.code) != CLOSE_NORMAL => CloseReason::Abnormal {
                                code: u16::from(f.code),
                                reason: f.reason.to_string(),
                            },
                            Some(f) => CloseReason::Normal {
                                reason: f.reason.to_string(),
                            },
                            None => CloseReason::Normal {
                                reason: String::new(),
                            },
                        };
                    }
                    _ => {} // Binary and raw frames are not part of the protocol.
                }
            }
        }
    }
}

/// Parses a text message into a frame; malformed or oversized input is
/// logged and dropped.
fn decode_frame(text: &str) -> Option<Frame> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    match serde_json::from_str::<Frame>(text) {
        Ok(frame) => {
            trace!(kind = %frame.kind, "received frame");
            Some(frame)
        }
        Err(e) => {
            warn!("failed to parse frame: {e}");
            None
        }
    }
}
