//! WebSocket write pump: serialises outbound messages onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error};

/// Writes messages to the WebSocket until a close frame has been written or
/// every sender is gone.
///
/// The pump is not cancelled with the link: the manager ends a connection by
/// queueing a close frame, and this task flushes it before exiting.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(msg) = write_rx.recv().await {
        let closing = msg.is_close();
        if let Err(e) = write.send(msg).await {
            error!("WebSocket write error: {e}");
            return;
        }
        if closing {
            debug!("close frame written");
            let _ = write.close().await;
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
    let _ = write.close().await;
}
