//! Connection manager owning one logical real-time connection.
//!
//! Handles the connect/disconnect lifecycle, reconnects with exponential
//! backoff on unexpected closes, detects dead connections with an
//! application-level heartbeat, queues outbound messages while the link is
//! down and routes inbound frames to subscriptions and listeners.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tradesim_protocol::constants::{CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL};
use tradesim_protocol::{ErrorPayload, Frame, MessageType, NotificationPayload};

use crate::config::ManagerConfig;
use crate::context::{Notification, SessionContext};
use crate::error::{ConnectionError, TransportError};
use crate::events::{ConnectionEvent, EventKind, ListenerId, Listeners, dispatch};
use crate::pumps::heartbeat::heartbeat_pump;
use crate::pumps::read::read_pump;
use crate::pumps::write::write_pump;
use crate::queue::{OutboundQueue, PendingMessage};
use crate::reconnection::reconnect_loop;
use crate::session::SessionProtocol;
use crate::subscriptions::{SubscriptionHandle, SubscriptionRegistry, SubscriptionTarget};
use crate::transport::{Connector, Endpoint, TungsteniteConnector, WsSink, WsStream};
use crate::types::{CloseReason, ConnectionState};
use crate::watchdog::Watchdog;

/// Reason given in the close frame on an explicit disconnect.
const CLIENT_DISCONNECT: &str = "Client disconnect";

/// Handle to a managed connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Who started a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// `connect()`; failures are returned, not retried.
    Initial,
    /// The reconnect loop.
    Reconnect,
}

pub(crate) struct Shared {
    config: ManagerConfig,
    protocol: Arc<dyn SessionProtocol>,
    connector: Arc<dyn Connector>,
    context: SessionContext,
    inner: Mutex<Inner>,
    listeners: Mutex<Listeners>,
}

struct Inner {
    state: ConnectionState,
    /// Bumped on every connection attempt and on disconnect. Callbacks carry
    /// the generation they belong to and are ignored once it is stale.
    generation: u64,
    reconnect_attempts: u32,
    queue: OutboundQueue,
    subscriptions: SubscriptionRegistry,
    link: Option<Link>,
    reconnect_cancel: Option<CancellationToken>,
    heartbeat_paused: bool,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl Inner {
    /// Moves to `state`, returning the event to emit if it changed.
    fn transition(&mut self, state: ConnectionState) -> Option<ConnectionEvent> {
        if self.state == state {
            return None;
        }
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
        Some(ConnectionEvent::StateChanged(state))
    }
}

/// The I/O tasks of one open connection.
///
/// Dropping a link stops its read and heartbeat tasks. The write task drains
/// what was already queued, then exits when the channel closes.
struct Link {
    generation: u64,
    write_tx: mpsc::UnboundedSender<tungstenite::Message>,
    watchdog: Watchdog,
    cancel: CancellationToken,
    read_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
}

impl Link {
    fn spawn(shared: &Arc<Shared>, generation: u64, sink: WsSink, stream: WsStream) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new();
        let cancel = CancellationToken::new();

        tokio::spawn(write_pump(sink, write_rx));

        let read_handle = {
            let weak = Arc::downgrade(shared);
            let on_frame = {
                let weak = weak.clone();
                move |frame: Frame| {
                    if let Some(shared) = weak.upgrade() {
                        shared.handle_frame(generation, frame);
                    }
                }
            };
            let pump = read_pump(
                stream,
                watchdog.clone(),
                on_frame,
                write_tx.clone(),
                cancel.clone(),
            );
            tokio::spawn(async move {
                let reason = pump.await;
                if let Some(shared) = weak.upgrade() {
                    shared.connection_lost(generation, reason);
                }
            })
        };

        let heartbeat_handle = {
            let weak = Arc::downgrade(shared);
            tokio::spawn(heartbeat_pump(
                shared.config.heartbeat.interval,
                move || {
                    weak.upgrade()
                        .is_some_and(|shared| shared.heartbeat_tick(generation))
                },
                cancel.clone(),
            ))
        };

        Self {
            generation,
            write_tx,
            watchdog,
            cancel,
            read_handle,
            heartbeat_handle,
        }
    }

    fn transmit(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let json = serde_json::to_string(frame)?;
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    /// Queues a close frame behind everything already written, then drops
    /// the link.
    fn close(self, code: u16, reason: &str) {
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(Some(CloseFrame {
                code: code.into(),
                reason: reason.into(),
            })));
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.heartbeat_handle.abort();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = inner.reconnect_cancel.take() {
            token.cancel();
        }
    }
}

impl ConnectionManager {
    /// Creates a manager that connects with `tokio-tungstenite`.
    pub fn new(
        config: ManagerConfig,
        protocol: Arc<dyn SessionProtocol>,
        context: SessionContext,
    ) -> Self {
        Self::with_connector(
            config,
            protocol,
            context,
            Arc::new(TungsteniteConnector::default()),
        )
    }

    /// Creates a manager with a custom transport.
    pub fn with_connector(
        config: ManagerConfig,
        protocol: Arc<dyn SessionProtocol>,
        context: SessionContext,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                connector,
                context,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    reconnect_attempts: 0,
                    queue: OutboundQueue::default(),
                    subscriptions: SubscriptionRegistry::default(),
                    link: None,
                    reconnect_cancel: None,
                    heartbeat_paused: false,
                    last_heartbeat: None,
                }),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Opens the connection.
    ///
    /// Returns immediately if already connected. A pending reconnect is
    /// cancelled and replaced by this attempt. Failures are reported and
    /// returned; they are not retried.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let generation = {
            let mut inner = self.shared.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(ConnectionError::ConnectionInProgress),
                ConnectionState::Closing => return Err(ConnectionError::NotConnected),
                ConnectionState::Disconnected | ConnectionState::Reconnecting { .. } => {}
            }
            if let Some(token) = inner.reconnect_cancel.take() {
                debug!("explicit connect supersedes pending reconnect");
                token.cancel();
            }
            inner.reconnect_attempts = 0;
            inner.generation += 1;
            let changed = inner.transition(ConnectionState::Connecting);
            let generation = inner.generation;
            drop(inner);
            self.shared.emit_all(changed);
            generation
        };

        self.shared.establish(generation, Origin::Initial).await
    }

    /// Closes the connection with code 1000 and cancels every timer and any
    /// pending reconnect. Queued messages are dropped. Calling it again is a
    /// no-op.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Sends `payload` to `destination`, or queues it until the next
    /// successful connect.
    pub fn send(
        &self,
        destination: impl Into<String>,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
    ) {
        let message = PendingMessage::new(destination, payload, headers);
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Connected
            && let Some(link) = inner.link.as_ref()
        {
            let frame = self.shared.protocol.shape(&message);
            match link.transmit(&frame) {
                Ok(()) => {
                    trace!(kind = %frame.kind, destination = %message.destination, "sent");
                    return;
                }
                Err(e) => warn!(error = %e, "send failed, queueing"),
            }
        }
        debug!(
            destination = %message.destination,
            queued = inner.queue.len() + 1,
            "not connected, queueing message"
        );
        inner.queue.push(message);
    }

    /// Serializes `payload` and sends it without extra headers.
    pub fn send_payload<T: Serialize>(
        &self,
        destination: impl Into<String>,
        payload: &T,
    ) -> Result<(), ConnectionError> {
        let value = serde_json::to_value(payload)?;
        self.send(destination, value, BTreeMap::new());
        Ok(())
    }

    /// Routes inbound frames for `destination` to `handler`, replacing any
    /// existing subscription for it.
    ///
    /// Subscriptions end when the connection is lost; re-subscribe from a
    /// `Connect` listener.
    pub fn subscribe<F>(
        &self,
        destination: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionHandle, ConnectionError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Closing {
            return Err(ConnectionError::NotConnected);
        }
        let (handle, replaced) = inner
            .subscriptions
            .insert(destination.into(), Arc::new(handler));
        debug!(destination = handle.destination(), replaced, "subscribed");
        Ok(handle)
    }

    /// Removes a subscription by destination or handle. Returns `false` if
    /// there was nothing to remove.
    pub fn unsubscribe<'a>(&self, target: impl Into<SubscriptionTarget<'a>>) -> bool {
        let removed = self.shared.lock().subscriptions.remove(target.into());
        if removed {
            debug!("unsubscribed");
        }
        removed
    }

    /// Registers `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(kind, Arc::new(handler))
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Stops outgoing heartbeats and the liveness watchdog while keeping the
    /// connection open.
    pub fn pause_heartbeat(&self) {
        let mut inner = self.shared.lock();
        inner.heartbeat_paused = true;
        if let Some(link) = inner.link.as_ref() {
            link.watchdog.disarm();
        }
        debug!("heartbeat paused");
    }

    pub fn resume_heartbeat(&self) {
        self.shared.lock().heartbeat_paused = false;
        debug!("heartbeat resumed");
    }

    pub fn is_heartbeat_paused(&self) -> bool {
        self.shared.lock().heartbeat_paused
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempts
    }

    /// Whether reconnect attempts remain.
    pub fn can_reconnect(&self) -> bool {
        self.reconnect_attempts() < self.shared.config.reconnect.max_attempts
    }

    /// Number of messages waiting for a connection.
    pub fn queued_messages(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.lock().subscriptions.len()
    }

    /// When the server last sent a HEARTBEAT (or the connection opened).
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_heartbeat
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(&event.kind());
        dispatch(&listeners, &event);
    }

    fn emit_all(&self, events: impl IntoIterator<Item = ConnectionEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Dials the endpoint and completes the transition out of Connecting.
    pub(crate) async fn establish(
        self: &Arc<Self>,
        generation: u64,
        origin: Origin,
    ) -> Result<(), ConnectionError> {
        let token = self.context.tokens.auth_token();
        let endpoint = Endpoint::new(
            self.config.endpoint_url(self.protocol.path()),
            token.clone(),
            self.config.auth,
        );
        debug!(protocol = self.protocol.name(), ?endpoint, ?origin, "connecting");

        let timeout = self.config.connect_timeout;
        let err = match tokio::time::timeout(timeout, self.connector.connect(endpoint)).await {
            Ok(Ok((sink, stream))) => return self.on_open(generation, sink, stream, token),
            Ok(Err(e)) => e,
            Err(_) => TransportError::Timeout(timeout),
        };
        Err(self.fail_attempt(generation, origin, err))
    }

    fn on_open(
        self: &Arc<Self>,
        generation: u64,
        sink: WsSink,
        stream: WsStream,
        token: Option<String>,
    ) -> Result<(), ConnectionError> {
        let (changed, flushed) = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                debug!("connection opened after being superseded, dropping it");
                return Err(ConnectionError::Cancelled);
            }

            let link = Link::spawn(self, generation, sink, stream);
            for frame in self.protocol.handshake(token.as_deref()) {
                if let Err(e) = link.transmit(&frame) {
                    warn!(error = %e, kind = %frame.kind, "failed to send handshake frame");
                }
            }
            let pending = inner.queue.drain();
            let flushed = pending.len();
            for message in pending {
                if let Err(e) = link.transmit(&self.protocol.shape(&message)) {
                    warn!(error = %e, destination = %message.destination, "failed to flush message");
                }
            }

            inner.link = Some(link);
            inner.reconnect_attempts = 0;
            inner.reconnect_cancel = None;
            inner.last_heartbeat = Some(Utc::now());
            (inner.transition(ConnectionState::Connected), flushed)
        };

        info!(protocol = self.protocol.name(), flushed, "connected");
        self.emit_all(changed);
        self.emit(ConnectionEvent::Connected);
        self.context.reporter.report_notification(Notification::success(
            "Connected",
            "Real-time connection established",
        ));
        Ok(())
    }

    fn fail_attempt(&self, generation: u64, origin: Origin, err: TransportError) -> ConnectionError {
        let changed = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                return ConnectionError::Cancelled;
            }
            let next = match origin {
                Origin::Initial => ConnectionState::Disconnected,
                Origin::Reconnect => ConnectionState::Reconnecting {
                    attempt: inner.reconnect_attempts,
                },
            };
            inner.transition(next)
        };

        warn!(error = %err, ?origin, "connection attempt failed");
        let error = ConnectionError::from(err);
        self.emit_all(changed);
        self.emit(ConnectionEvent::Error(error.clone()));
        self.context.reporter.report_error(
            "WebSocket connection error",
            Some(&serde_json::json!({ "error": error.to_string() })),
        );
        error
    }

    /// Called by the read task when its connection ends.
    fn connection_lost(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let (changed, reconnect) = {
            let mut inner = self.lock();
            let current = inner
                .link
                .as_ref()
                .is_some_and(|link| link.generation == generation);
            if !current || inner.state != ConnectionState::Connected {
                return;
            }

            if let Some(link) = inner.link.take() {
                match reason {
                    CloseReason::HeartbeatTimeout => {
                        link.close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout")
                    }
                    _ => drop(link),
                }
            }
            let dropped = inner.subscriptions.clear();
            if dropped > 0 {
                debug!(dropped, "subscriptions cleared");
            }

            if reason.should_reconnect() {
                let cancel = CancellationToken::new();
                inner.reconnect_cancel = Some(cancel.clone());
                let attempt = inner.reconnect_attempts + 1;
                (
                    inner.transition(ConnectionState::Reconnecting { attempt }),
                    Some(cancel),
                )
            } else {
                (inner.transition(ConnectionState::Disconnected), None)
            }
        };

        let (code, text) = (reason.code(), reason.reason());
        if reconnect.is_some() {
            warn!(code, reason = %text, "connection lost");
        } else {
            info!(code, reason = %text, "connection closed by server");
        }
        self.emit(ConnectionEvent::Disconnected { code, reason: text });
        self.emit_all(changed);

        if let Some(cancel) = reconnect {
            tokio::spawn(reconnect_loop(Arc::downgrade(self), cancel));
        }
    }

    /// Sends one heartbeat if this generation is still connected. Returns
    /// `false` once the heartbeat task should stop.
    fn heartbeat_tick(&self, generation: u64) -> bool {
        let inner = self.lock();
        let Some(link) = inner
            .link
            .as_ref()
            .filter(|link| link.generation == generation)
        else {
            return false;
        };
        if inner.state != ConnectionState::Connected {
            return false;
        }
        if inner.heartbeat_paused {
            return true;
        }
        if let Err(e) = link.transmit(&Frame::heartbeat()) {
            warn!(error = %e, "failed to send heartbeat");
            return false;
        }
        link.watchdog.arm(self.config.heartbeat.timeout);
        trace!("heartbeat sent");
        true
    }

    fn handle_frame(&self, generation: u64, frame: Frame) {
        let handler = {
            let mut inner = self.lock();
            let current = inner
                .link
                .as_ref()
                .is_some_and(|link| link.generation == generation);
            if !current {
                return;
            }
            if frame.kind == MessageType::Heartbeat {
                inner.last_heartbeat = Some(Utc::now());
                trace!("heartbeat received");
                return;
            }
            inner.subscriptions.handler_for(frame.routing_key())
        };

        match frame.kind {
            MessageType::Notification => match frame.parse_data::<NotificationPayload>() {
                Ok(payload) => self
                    .context
                    .reporter
                    .report_notification(Notification::from_payload(&payload)),
                Err(e) => warn!("malformed notification payload: {e}"),
            },
            MessageType::Error => {
                let message = frame
                    .parse_data::<ErrorPayload>()
                    .map(|p| p.message)
                    .unwrap_or_else(|_| "Server error".to_string());
                self.context.reporter.report_error(&message, Some(&frame.data));
            }
            _ => {}
        }

        if let Some(handler) = handler
            && catch_unwind(AssertUnwindSafe(|| handler(&frame))).is_err()
        {
            error!(destination = frame.routing_key(), "subscription handler panicked");
        }
        self.emit(ConnectionEvent::Message(frame));
    }

    fn disconnect(&self) {
        let previous = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Closing => return,
                ConnectionState::Disconnected
                    if inner.link.is_none() && inner.reconnect_cancel.is_none() =>
                {
                    let dropped = inner.queue.clear();
                    if dropped > 0 {
                        info!(dropped, "dropped queued messages");
                    }
                    return;
                }
                _ => {}
            }

            let previous = inner.state;
            inner.generation += 1;
            if let Some(token) = inner.reconnect_cancel.take() {
                token.cancel();
            }
            if let Some(link) = inner.link.take() {
                link.close(CLOSE_NORMAL, CLIENT_DISCONNECT);
            }
            inner.subscriptions.clear();
            inner.reconnect_attempts = 0;
            let dropped = inner.queue.clear();
            if dropped > 0 {
                info!(dropped, "dropped queued messages");
            }
            inner.transition(ConnectionState::Closing);
            previous
        };

        info!(from = %previous, "disconnecting");
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Closing));
        if previous == ConnectionState::Connected {
            self.emit(ConnectionEvent::Disconnected {
                code: CLOSE_NORMAL,
                reason: CLIENT_DISCONNECT.into(),
            });
        }

        let changed = self.lock().transition(ConnectionState::Disconnected);
        self.emit_all(changed);
    }

    /// Starts the next reconnect attempt's wait, or gives up once attempts
    /// are exhausted. Returns the delay to wait, or `None` to stop the loop.
    pub(crate) fn begin_reconnect_wait(&self, cancel: &CancellationToken) -> Option<Duration> {
        let max_attempts = self.config.reconnect.max_attempts;
        let mut inner = self.lock();
        if cancel.is_cancelled() {
            return None;
        }

        let attempts = inner.reconnect_attempts;
        if attempts >= max_attempts {
            inner.reconnect_cancel = None;
            let dropped = inner.queue.clear();
            let changed = inner.transition(ConnectionState::Disconnected);
            drop(inner);

            warn!(attempts, dropped, "reconnect attempts exhausted");
            self.emit_all(changed);
            self.emit(ConnectionEvent::Error(ConnectionError::ReconnectExhausted {
                attempts,
            }));
            self.context.reporter.report_notification(
                Notification::error(
                    "Connection failed",
                    "Unable to reach the server. Reload to try again.",
                )
                .sticky(),
            );
            return None;
        }

        let attempt = attempts + 1;
        let delay = self.config.reconnect.delay_for_attempt(attempts);
        let changed = inner.transition(ConnectionState::Reconnecting { attempt });
        drop(inner);

        info!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.emit_all(changed);
        self.emit(ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        });
        self.context.reporter.report_notification(Notification::info(
            "Reconnecting",
            format!("Attempting to reconnect ({attempt}/{max_attempts})"),
        ));
        Some(delay)
    }

    /// Moves from Reconnecting to Connecting after the backoff delay.
    /// Returns the new generation, or `None` if the loop was superseded.
    pub(crate) fn begin_reconnect_attempt(&self, cancel: &CancellationToken) -> Option<u64> {
        let mut inner = self.lock();
        if cancel.is_cancelled() || !matches!(inner.state, ConnectionState::Reconnecting { .. }) {
            return None;
        }
        inner.reconnect_attempts += 1;
        inner.generation += 1;
        let generation = inner.generation;
        let changed = inner.transition(ConnectionState::Connecting);
        drop(inner);
        self.emit_all(changed);
        Some(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use crate::context::{NotificationKind, NotificationLog, StaticToken};
    use crate::mock::{MockConnector, MockPeer};
    use crate::session::PlainProtocol;
    use crate::types::{HeartbeatConfig, ReconnectConfig};

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
            },
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(1000),
                max_attempts: 3,
                max_delay: None,
                jitter: 0.0,
            },
            connect_timeout: Duration::from_secs(5),
            ..ManagerConfig::new("ws://test/ws")
        }
    }

    struct Harness {
        manager: ConnectionManager,
        connector: Arc<MockConnector>,
        peers: mpsc::UnboundedReceiver<MockPeer>,
        log: Arc<NotificationLog>,
    }

    impl Harness {
        fn new(config: ManagerConfig, token: Option<&str>) -> Self {
            let (connector, peers) = MockConnector::new();
            let log = Arc::new(NotificationLog::new());
            let context = SessionContext::new(
                Arc::new(StaticToken(token.map(str::to_string))),
                log.clone(),
            );
            let manager = ConnectionManager::with_connector(
                config,
                Arc::new(PlainProtocol),
                context,
                connector.clone(),
            );
            Self {
                manager,
                connector,
                peers,
                log,
            }
        }

        async fn connected(config: ManagerConfig) -> (Self, MockPeer) {
            let mut h = Self::new(config, None);
            h.manager.connect().await.unwrap();
            let peer = h.peers.recv().await.unwrap();
            (h, peer)
        }
    }

    /// Records every lifecycle event in order.
    fn record(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Error,
            EventKind::StateChanged,
            EventKind::Reconnecting,
        ] {
            let events = events.clone();
            manager.on(kind, move |e| events.lock().unwrap().push(e.clone()));
        }
        events
    }

    fn count(events: &Mutex<Vec<ConnectionEvent>>, kind: EventKind) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Resolves on the next event of `kind`.
    fn next_event(
        manager: &ConnectionManager,
        kind: EventKind,
    ) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.on(kind, move |e| {
            let _ = tx.send(e.clone());
        });
        rx
    }

    #[tokio::test]
    async fn new_manager_is_disconnected() {
        let h = Harness::new(test_config(), None);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.manager.is_connected());
        assert!(h.manager.can_reconnect());
        assert_eq!(h.manager.queued_messages(), 0);
        assert!(h.manager.last_heartbeat().is_none());
    }

    #[tokio::test]
    async fn sends_while_disconnected_are_queued_not_transmitted() {
        let h = Harness::new(test_config(), None);
        h.manager.send("/q/a", serde_json::json!(1), BTreeMap::new());
        h.manager.send("/q/b", serde_json::json!(2), BTreeMap::new());
        assert_eq!(h.manager.queued_messages(), 2);
        assert!(h.connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn connect_sends_handshake_then_flushes_queue_in_order() {
        let mut h = Harness::new(test_config(), Some("tok"));
        let events = record(&h.manager);
        for i in 1..=3 {
            h.manager
                .send("/topic/orders", serde_json::json!(i), BTreeMap::new());
        }

        h.manager.connect().await.unwrap();
        assert!(h.manager.is_connected());
        assert_eq!(h.manager.queued_messages(), 0);
        assert!(h.manager.last_heartbeat().is_some());

        let mut peer = h.peers.recv().await.unwrap();
        let hello = peer.next_frame().await;
        assert_eq!(hello.kind, MessageType::Connect);
        assert_eq!(hello.data["token"], "tok");
        for i in 1..=3 {
            let frame = peer.next_frame().await;
            assert_eq!(frame.destination.as_deref(), Some("/topic/orders"));
            assert_eq!(frame.data, serde_json::json!(i));
        }

        h.manager.send("GAME_PAUSE", serde_json::json!({}), BTreeMap::new());
        assert_eq!(peer.next_frame().await.kind, MessageType::GamePause);

        assert_eq!(count(&events, EventKind::Connect), 1);
        let states: Vec<_> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(
            h.log.notifications().last().map(|n| n.kind),
            Some(NotificationKind::Success)
        );
    }

    #[tokio::test]
    async fn connect_when_connected_is_ok() {
        let (h, _peer) = Harness::connected(test_config()).await;
        h.manager.connect().await.unwrap();
        assert_eq!(h.connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn endpoint_uses_query_token_when_configured() {
        let config = ManagerConfig {
            auth: crate::config::AuthPlacement::Query,
            ..test_config()
        };
        let mut h = Harness::new(config, Some("secret"));
        h.manager.connect().await.unwrap();
        let _peer = h.peers.recv().await.unwrap();
        let endpoint = &h.connector.endpoints()[0];
        assert_eq!(endpoint.url, "ws://test/ws?token=secret");
        assert!(endpoint.bearer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_failure_is_reported_not_retried() {
        let h = Harness::new(test_config(), None);
        let events = record(&h.manager);
        h.connector.refuse_next(1);

        let err = h.manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(count(&events, EventKind::Error), 1);
        assert_eq!(h.log.errors().len(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.connector.attempts().len(), 1);
        assert_eq!(count(&events, EventKind::Reconnecting), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connect_is_rejected() {
        let h = Harness::new(test_config(), None);
        h.connector.stall_next();

        let first = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert!(matches!(
            h.manager.connect().await,
            Err(ConnectionError::ConnectionInProgress)
        ));

        let result = first.await.unwrap();
        match result {
            Err(ConnectionError::Transport(e)) => {
                assert!(matches!(*e, TransportError::Timeout(_)))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_connect_cancels_it() {
        let h = Harness::new(test_config(), None);
        h.connector.stall_next();

        let pending = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::task::yield_now().await;
        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        assert!(matches!(
            pending.await.unwrap(),
            Err(ConnectionError::Cancelled)
        ));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (h, mut peer) = Harness::connected(test_config()).await;
        let events = record(&h.manager);

        h.manager.disconnect();
        h.manager.disconnect();

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(count(&events, EventKind::Disconnect), 1);
        assert_eq!(count(&events, EventKind::StateChanged), 2);

        match peer.next_message().await {
            Some(tungstenite::Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), CLOSE_NORMAL);
                assert_eq!(frame.reason.as_str(), CLIENT_DISCONNECT);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_when_never_connected_is_noop() {
        let h = Harness::new(test_config(), None);
        let events = record(&h.manager);
        h.manager.disconnect();
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_queue_and_subscriptions() {
        let (h, _peer) = Harness::connected(test_config()).await;
        h.manager.subscribe("/topic/a", |_| {}).unwrap();
        h.manager.disconnect();
        h.manager.send("/q", serde_json::json!(1), BTreeMap::new());
        assert_eq!(h.manager.subscription_count(), 0);
        assert_eq!(h.manager.queued_messages(), 1);

        h.manager.disconnect();
        assert_eq!(h.manager.queued_messages(), 0);
    }

    #[tokio::test]
    async fn subscribe_while_closing_is_rejected() {
        let (h, _peer) = Harness::connected(test_config()).await;
        let result = Arc::new(Mutex::new(None));
        {
            let manager = h.manager.clone();
            let result = result.clone();
            h.manager.on(EventKind::Disconnect, move |_| {
                *result.lock().unwrap() = Some(manager.subscribe("/x", |_| {}).is_err());
            });
        }
        h.manager.disconnect();
        assert_eq!(*result.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn subscription_replacement_and_noop_unsubscribe() {
        let (h, peer) = Harness::connected(test_config()).await;
        let first_hits = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stale = {
            let hits = first_hits.clone();
            h.manager
                .subscribe("/topic/prices", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        h.manager
            .subscribe("/topic/prices", move |f: &Frame| {
                let _ = tx.send(f.data.clone());
            })
            .unwrap();
        assert_eq!(h.manager.subscription_count(), 1);

        assert!(!h.manager.unsubscribe("/topic/none"));
        assert!(!h.manager.unsubscribe(&stale));

        let frame = Frame::new(MessageType::Message, serde_json::json!(42))
            .destination("/topic/prices");
        peer.push(&frame);
        assert_eq!(rx.recv().await, Some(serde_json::json!(42)));
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);

        assert!(h.manager.unsubscribe("/topic/prices"));
        assert_eq!(h.manager.subscription_count(), 0);
    }

    #[tokio::test]
    async fn typed_frames_route_by_type_name() {
        let (h, peer) = Harness::connected(test_config()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager
            .subscribe("SCORE_UPDATE", move |f: &Frame| {
                let _ = tx.send(f.kind);
            })
            .unwrap();

        peer.push(&Frame::new(MessageType::ScoreUpdate, serde_json::json!({"score": 10})));
        assert_eq!(rx.recv().await, Some(MessageType::ScoreUpdate));
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_and_heartbeats_intercepted() {
        let (h, peer) = Harness::connected(test_config()).await;
        let heartbeats = Arc::new(AtomicU32::new(0));
        {
            let heartbeats = heartbeats.clone();
            h.manager
                .on(EventKind::Message(MessageType::Heartbeat), move |_| {
                    heartbeats.fetch_add(1, Ordering::SeqCst);
                });
        }
        let mut scores = next_event(&h.manager, EventKind::Message(MessageType::ScoreUpdate));
        let before = h.manager.last_heartbeat();

        peer.push_text("{not json");
        peer.push(&Frame::heartbeat());
        peer.push(&Frame::new(MessageType::ScoreUpdate, serde_json::json!(1)));

        assert!(matches!(
            scores.recv().await,
            Some(ConnectionEvent::Message(_))
        ));
        assert!(h.manager.is_connected());
        assert_eq!(heartbeats.load(Ordering::SeqCst), 0);
        assert!(h.manager.last_heartbeat() >= before);
    }

    #[tokio::test]
    async fn server_notifications_and_errors_reach_the_reporter() {
        let (h, peer) = Harness::connected(test_config()).await;
        let mut errors = next_event(&h.manager, EventKind::Message(MessageType::Error));

        peer.push(&Frame::new(
            MessageType::Notification,
            serde_json::json!({"title": "Round", "message": "Round 2 starts", "type": "warning"}),
        ));
        peer.push(&Frame::new(
            MessageType::Error,
            serde_json::json!({"message": "session expired", "code": "E401"}),
        ));
        errors.recv().await.unwrap();

        let notes = h.log.notifications();
        assert!(
            notes
                .iter()
                .any(|n| n.title == "Round" && n.kind == NotificationKind::Warning)
        );
        let errs = h.log.errors();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "session expired");
    }

    #[tokio::test]
    async fn clean_server_close_does_not_reconnect() {
        let (h, peer) = Harness::connected(test_config()).await;
        let mut disconnects = next_event(&h.manager, EventKind::Disconnect);
        peer.close(CLOSE_NORMAL, "bye");

        match disconnects.recv().await {
            Some(ConnectionEvent::Disconnected { code, reason }) => {
                assert_eq!(code, CLOSE_NORMAL);
                assert_eq!(reason, "bye");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_and_clears_subscriptions() {
        let (mut h, peer) = Harness::connected(test_config()).await;
        h.manager.subscribe("/topic/a", |_| {}).unwrap();
        let mut disconnects = next_event(&h.manager, EventKind::Disconnect);

        peer.close(1011, "internal error");
        match disconnects.recv().await {
            Some(ConnectionEvent::Disconnected { code, .. }) => assert_eq!(code, 1011),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            h.manager.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
        assert_eq!(h.manager.subscription_count(), 0);

        let _peer2 = h.peers.recv().await.unwrap();
        tokio::task::yield_now().await;
        assert!(h.manager.is_connected());
        assert_eq!(h.manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_flushes_before_sends_from_connect_listener() {
        let (mut h, peer) = Harness::connected(test_config()).await;
        {
            let manager = h.manager.clone();
            h.manager.on(EventKind::Connect, move |_| {
                manager.send("/q", serde_json::json!("after"), BTreeMap::new());
            });
        }

        drop(peer);
        let mut reconnecting = next_event(&h.manager, EventKind::Reconnecting);
        reconnecting.recv().await.unwrap();
        h.manager.send("/q", serde_json::json!("m1"), BTreeMap::new());
        h.manager.send("/q", serde_json::json!("m2"), BTreeMap::new());

        let mut peer2 = h.peers.recv().await.unwrap();
        let order: Vec<_> = [
            peer2.next_frame().await,
            peer2.next_frame().await,
            peer2.next_frame().await,
        ]
        .into_iter()
        .map(|f| f.data)
        .collect();
        assert_eq!(
            order,
            vec![
                serde_json::json!("m1"),
                serde_json::json!("m2"),
                serde_json::json!("after")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_triggers_exactly_one_reconnect() {
        let (mut h, mut peer) = Harness::connected(test_config()).await;
        let events = record(&h.manager);
        let start = Instant::now();

        let heartbeat = peer.next_frame().await;
        assert_eq!(heartbeat.kind, MessageType::Heartbeat);
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        match peer.next_message().await {
            Some(tungstenite::Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), CLOSE_HEARTBEAT_TIMEOUT);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(40));

        let _peer2 = h.peers.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(41));
        assert_eq!(count(&events, EventKind::Disconnect), 1);
        assert_eq!(count(&events, EventKind::Reconnecting), 1);
        assert_eq!(h.connector.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_detected_when_timeout_exceeds_interval() {
        let mut config = test_config();
        config.heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
        };
        let (mut h, mut peer) = Harness::connected(config).await;
        let start = Instant::now();

        let mut heartbeats = 0;
        loop {
            match peer.next_message().await {
                Some(tungstenite::Message::Text(_)) => heartbeats += 1,
                Some(tungstenite::Message::Close(Some(frame))) => {
                    assert_eq!(u16::from(frame.code), CLOSE_HEARTBEAT_TIMEOUT);
                    break;
                }
                other => panic!("expected heartbeat or close, got {other:?}"),
            }
        }
        // Armed by the first heartbeat at 10s; the one at 20s must not extend it.
        assert_eq!(start.elapsed(), Duration::from_secs(25));
        assert_eq!(heartbeats, 2);

        let _peer2 = h.peers.recv().await.unwrap();
        assert_eq!(h.connector.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_heartbeat_interval_disables_heartbeat() {
        let mut config = test_config();
        config.heartbeat.interval = Duration::ZERO;
        let (h, mut peer) = Harness::connected(config).await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(peer.drain_sent().is_empty());
        assert!(h.manager.is_connected());
        assert_eq!(h.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_keeps_connection_alive() {
        let (h, mut peer) = Harness::connected(test_config()).await;

        for _ in 0..3 {
            let beat = peer.next_frame().await;
            assert_eq!(beat.kind, MessageType::Heartbeat);
            peer.push(&Frame::heartbeat());
        }
        assert!(h.manager.is_connected());
        assert_eq!(h.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_heartbeat_sends_nothing_and_never_times_out() {
        let (h, mut peer) = Harness::connected(test_config()).await;
        h.manager.pause_heartbeat();
        assert!(h.manager.is_heartbeat_paused());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(peer.drain_sent().is_empty());
        assert!(h.manager.is_connected());

        h.manager.resume_heartbeat();
        assert_eq!(peer.next_frame().await.kind, MessageType::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_gives_up() {
        let (h, peer) = Harness::connected(test_config()).await;
        let events = record(&h.manager);
        let mut exhausted = next_event(&h.manager, EventKind::Error);
        let mut reconnecting = next_event(&h.manager, EventKind::Reconnecting);
        h.connector.refuse_all(true);

        let origin = Instant::now();
        drop(peer);
        reconnecting.recv().await.unwrap();
        h.manager.send("/q", serde_json::json!("lost"), BTreeMap::new());
        assert_eq!(h.manager.queued_messages(), 1);

        loop {
            match exhausted.recv().await {
                Some(ConnectionEvent::Error(ConnectionError::ReconnectExhausted { attempts })) => {
                    assert_eq!(attempts, 3);
                    break;
                }
                Some(_) => continue,
                None => panic!("listener dropped"),
            }
        }

        assert_eq!(
            h.connector.attempt_offsets(origin),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(3000),
                Duration::from_millis(7000),
            ]
        );
        let delays: Vec<_> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::Reconnecting { attempt, delay, .. } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(4)),
            ]
        );
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.manager.can_reconnect());
        assert_eq!(h.manager.queued_messages(), 0);

        let last = h.log.notifications().pop().unwrap();
        assert_eq!(last.kind, NotificationKind::Error);
        assert_eq!(last.duration, None);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.connector.attempts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (h, peer) = Harness::connected(test_config()).await;
        let mut reconnecting = next_event(&h.manager, EventKind::Reconnecting);
        drop(peer);
        reconnecting.recv().await.unwrap();

        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempts().len(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_replaces_pending_reconnect() {
        let (mut h, peer) = Harness::connected(test_config()).await;
        let mut reconnecting = next_event(&h.manager, EventKind::Reconnecting);
        drop(peer);
        reconnecting.recv().await.unwrap();

        h.manager.connect().await.unwrap();
        let _peer2 = h.peers.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempts().len(), 2);
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn dropping_the_last_handle_stops_tasks() {
        let (h, mut peer) = Harness::connected(test_config()).await;
        drop(h.manager);
        // The write task flushes a close frame once every sender is gone.
        assert!(matches!(
            peer.next_message().await,
            Some(tungstenite::Message::Close(None))
        ));
    }
}
