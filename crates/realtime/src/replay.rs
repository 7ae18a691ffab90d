//! Replay playback client.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use tradesim_protocol::{GameFrame, MessageType, ReplayRef};

use crate::config::ManagerConfig;
use crate::context::SessionContext;
use crate::error::ConnectionError;
use crate::events::ListenerId;
use crate::game::on_frame_update;
use crate::manager::ConnectionManager;
use crate::session::SessionProtocol;
use crate::transport::Connector;

/// `/replay` endpoint with the default handshake and shaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayProtocol;

impl SessionProtocol for ReplayProtocol {
    fn name(&self) -> &str {
        "replay"
    }

    fn path(&self) -> &str {
        "/replay"
    }
}

/// Client for replaying recorded games frame by frame.
#[derive(Clone)]
pub struct ReplayClient {
    manager: ConnectionManager,
    replay: Arc<Mutex<Option<String>>>,
}

impl ReplayClient {
    pub fn new(config: ManagerConfig, context: SessionContext) -> Self {
        Self::from_manager(ConnectionManager::new(
            config,
            Arc::new(ReplayProtocol),
            context,
        ))
    }

    pub fn with_connector(
        config: ManagerConfig,
        context: SessionContext,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::from_manager(ConnectionManager::with_connector(
            config,
            Arc::new(ReplayProtocol),
            context,
            connector,
        ))
    }

    fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            manager,
            replay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.manager.connect().await
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn replay_id(&self) -> Option<String> {
        self.current()
    }

    pub fn start_replay(&self, replay_id: impl Into<String>) -> Result<(), ConnectionError> {
        let replay_id = replay_id.into();
        *self.replay.lock().unwrap_or_else(PoisonError::into_inner) = Some(replay_id.clone());
        debug!(replay = %replay_id, "starting replay");
        self.manager
            .send_payload(MessageType::GameStart.as_str(), &ReplayRef { replay_id })
    }

    pub fn pause_replay(&self) -> Result<(), ConnectionError> {
        self.control(MessageType::GamePause)
    }

    pub fn resume_replay(&self) -> Result<(), ConnectionError> {
        self.control(MessageType::GameResume)
    }

    pub fn stop_replay(&self) -> Result<(), ConnectionError> {
        self.control(MessageType::GameEnd)?;
        *self.replay.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    /// Calls `handler` with every replayed FRAME_UPDATE.
    pub fn on_frame<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(GameFrame) + Send + Sync + 'static,
    {
        on_frame_update(&self.manager, handler)
    }

    fn current(&self) -> Option<String> {
        self.replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn control(&self, kind: MessageType) -> Result<(), ConnectionError> {
        let replay_id = self.current().ok_or(ConnectionError::NoActiveSession)?;
        debug!(replay = %replay_id, %kind, "replay control");
        self.manager
            .send_payload(kind.as_str(), &ReplayRef { replay_id })
    }
}
