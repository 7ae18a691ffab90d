//! TradeSim session probe.
//!
//! Connects to the game endpoint, optionally joins the session named on the
//! command line, logs every frame update and state change, and leaves
//! cleanly on Ctrl-C.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tradesim_realtime::{
    ConnectionEvent, EventKind, GameClient, LogReporter, SessionContext, StaticToken,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting TradeSim session probe"
    );

    let probe_config = match config::ProbeConfig::load() {
        Ok(c) => {
            tracing::info!(url = %c.url, "configuration loaded");
            c
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            config::ProbeConfig::default()
        }
    };

    let context = SessionContext::new(
        Arc::new(StaticToken(probe_config.auth_token.clone())),
        Arc::new(LogReporter),
    );
    let client = GameClient::new(probe_config.to_manager_config(), context);

    client.manager().on(EventKind::StateChanged, |event| {
        if let ConnectionEvent::StateChanged(state) = event {
            tracing::info!(?state, "connection state changed");
        }
    });
    client.manager().on(EventKind::Reconnecting, |event| {
        if let ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } = event
        {
            tracing::info!(attempt, max_attempts, ?delay, "reconnect scheduled");
        }
    });
    client.on_frame(|frame| {
        tracing::info!(
            index = frame.index,
            stock = %frame.ohlcv.stock_code,
            close = frame.ohlcv.close,
            keypoint = frame.is_keypoint(),
            "frame update"
        );
    });

    client.connect().await?;

    if let Some(session_id) = std::env::args().nth(1) {
        client.join_session(session_id)?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    if client.session_id().is_some()
        && let Err(e) = client.leave_session()
    {
        tracing::warn!(error = %e, "failed to leave session");
    }
    client.disconnect();
    Ok(())
}
