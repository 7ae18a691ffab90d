//! Live game session client.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use tradesim_protocol::{
    DecisionAction, DecisionPayload, Frame, GameFrame, MessageType, SessionRef,
};

use crate::config::ManagerConfig;
use crate::context::SessionContext;
use crate::error::ConnectionError;
use crate::events::{ConnectionEvent, EventKind, ListenerId};
use crate::manager::ConnectionManager;
use crate::queue::PendingMessage;
use crate::session::{SessionProtocol, shape_frame};
use crate::transport::Connector;

type ActiveSession = Arc<Mutex<Option<String>>>;

/// `/game` endpoint; stamps the active session id on every outbound frame.
#[derive(Debug, Default)]
pub struct GameProtocol {
    session: ActiveSession,
}

impl SessionProtocol for GameProtocol {
    fn name(&self) -> &str {
        "game"
    }

    fn path(&self) -> &str {
        "/game"
    }

    fn shape(&self, message: &PendingMessage) -> Frame {
        let frame = shape_frame(message);
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match session {
            Some(id) => frame.session(id),
            None => frame,
        }
    }
}

/// A trading decision for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: DecisionAction,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub reasoning: Option<String>,
}

impl Decision {
    pub fn new(action: DecisionAction) -> Self {
        Self {
            action,
            quantity: None,
            price: None,
            reasoning: None,
        }
    }

    pub fn buy() -> Self {
        Self::new(DecisionAction::Buy)
    }

    pub fn sell() -> Self {
        Self::new(DecisionAction::Sell)
    }

    pub fn hold() -> Self {
        Self::new(DecisionAction::Hold)
    }

    pub fn quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Client for live trading-game sessions.
#[derive(Clone)]
pub struct GameClient {
    manager: ConnectionManager,
    session: ActiveSession,
}

impl GameClient {
    pub fn new(config: ManagerConfig, context: SessionContext) -> Self {
        let protocol = GameProtocol::default();
        let session = protocol.session.clone();
        Self {
            manager: ConnectionManager::new(config, Arc::new(protocol), context),
            session,
        }
    }

    pub fn with_connector(
        config: ManagerConfig,
        context: SessionContext,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let protocol = GameProtocol::default();
        let session = protocol.session.clone();
        Self {
            manager: ConnectionManager::with_connector(
                config,
                Arc::new(protocol),
                context,
                connector,
            ),
            session,
        }
    }

    /// The underlying connection, for listeners and subscriptions.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.manager.connect().await
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn session_id(&self) -> Option<String> {
        self.active().clone()
    }

    /// Joins `session_id`, replacing any active session.
    pub fn join_session(&self, session_id: impl Into<String>) -> Result<(), ConnectionError> {
        let session_id = session_id.into();
        *self.active() = Some(session_id.clone());
        debug!(session = %session_id, "joining game session");
        self.manager
            .send_payload(MessageType::GameStart.as_str(), &SessionRef { session_id })
    }

    /// Leaves the active session.
    pub fn leave_session(&self) -> Result<(), ConnectionError> {
        let session_id = self.require_session()?;
        self.manager.send_payload(
            MessageType::GameEnd.as_str(),
            &SessionRef {
                session_id: session_id.clone(),
            },
        )?;
        *self.active() = None;
        debug!(session = %session_id, "left game session");
        Ok(())
    }

    pub fn submit_decision(&self, decision: Decision) -> Result<(), ConnectionError> {
        let session_id = self.require_session()?;
        let payload = DecisionPayload {
            session_id,
            action: decision.action,
            quantity: decision.quantity,
            price: decision.price,
            reasoning: decision.reasoning,
        };
        self.manager
            .send_payload(MessageType::DecisionResult.as_str(), &payload)
    }

    /// Calls `handler` with every FRAME_UPDATE.
    pub fn on_frame<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(GameFrame) + Send + Sync + 'static,
    {
        on_frame_update(&self.manager, handler)
    }

    fn active(&self) -> MutexGuard<'_, Option<String>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_session(&self) -> Result<String, ConnectionError> {
        self.active().clone().ok_or(ConnectionError::NoActiveSession)
    }
}

/// Registers a listener that decodes FRAME_UPDATE payloads into [`GameFrame`]s.
pub(crate) fn on_frame_update<F>(manager: &ConnectionManager, handler: F) -> ListenerId
where
    F: Fn(GameFrame) + Send + Sync + 'static,
{
    manager.on(EventKind::Message(MessageType::FrameUpdate), move |event| {
        if let ConnectionEvent::Message(frame) = event {
            match frame.parse_data::<GameFrame>() {
                Ok(game_frame) => handler(game_frame),
                Err(e) => warn!("malformed frame update: {e}"),
            }
        }
    })
}
