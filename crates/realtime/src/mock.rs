//! In-memory connector for tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, sink, stream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use tradesim_protocol::Frame;

use crate::error::TransportError;
use crate::transport::{Connector, Endpoint, WsSink, WsStream};

type Inbound = Result<tungstenite::Message, tungstenite::Error>;

/// The server side of one accepted mock connection.
pub(crate) struct MockPeer {
    sent: mpsc::UnboundedReceiver<tungstenite::Message>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockPeer {
    /// Next raw message the client wrote, or `None` once the client side is gone.
    pub(crate) async fn next_message(&mut self) -> Option<tungstenite::Message> {
        self.sent.recv().await
    }

    /// Next text frame the client wrote, decoded.
    pub(crate) async fn next_frame(&mut self) -> Frame {
        loop {
            match self.sent.recv().await {
                Some(tungstenite::Message::Text(text)) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(_) => continue,
                None => panic!("client closed before sending a frame"),
            }
        }
    }

    /// Messages already written by the client, without waiting.
    pub(crate) fn drain_sent(&mut self) -> Vec<tungstenite::Message> {
        let mut out = Vec::new();
        while let Ok(msg) = self.sent.try_recv() {
            out.push(msg);
        }
        out
    }

    pub(crate) fn push(&self, frame: &Frame) {
        self.push_text(&serde_json::to_string(frame).unwrap());
    }

    pub(crate) fn push_text(&self, text: &str) {
        let _ = self
            .inbound
            .send(Ok(tungstenite::Message::Text(text.into())));
    }

    /// Sends a close frame with `code`.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Ok(tungstenite::Message::Close(Some(CloseFrame {
            code: code.into(),
            reason: reason.into(),
        }))));
    }
}

/// Hands out in-memory connections and records every attempt.
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse_next: AtomicU32,
    refuse_all: AtomicBool,
    stall_next: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    endpoints: Mutex<Vec<Endpoint>>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers: tx,
            refuse_next: AtomicU32::new(0),
            refuse_all: AtomicBool::new(false),
            stall_next: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Fails the next `n` attempts with a refused connection.
    pub(crate) fn refuse_next(&self, n: u32) {
        self.refuse_next.store(n, Ordering::SeqCst);
    }

    pub(crate) fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// The next attempt never completes.
    pub(crate) fn stall_next(&self) {
        self.stall_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }

    /// Offsets of every attempt after the first, relative to `origin`.
    pub(crate) fn attempt_offsets(&self, origin: Instant) -> Vec<Duration> {
        self.attempts()
            .into_iter()
            .skip(1)
            .map(|at| at - origin)
            .collect()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        endpoint: Endpoint,
    ) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.endpoints.lock().unwrap().push(endpoint);

        if self.stall_next.swap(false, Ordering::SeqCst) {
            return future::pending().boxed();
        }
        let refused = self.refuse_all.load(Ordering::SeqCst)
            || self
                .refuse_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            let err = tungstenite::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
            return future::ready(Err(TransportError::Ws(err))).boxed();
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel::<tungstenite::Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();

        let sink = sink::unfold(sent_tx, |tx, msg: tungstenite::Message| async move {
            tx.send(msg)
                .map_err(|_| tungstenite::Error::ConnectionClosed)?;
            Ok::<_, tungstenite::Error>(tx)
        });
        let stream = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        let _ = self.peers.send(MockPeer {
            sent: sent_rx,
            inbound: inbound_tx,
        });
        future::ready(Ok((Box::pin(sink) as WsSink, Box::pin(stream) as WsStream))).boxed()
    }
}
