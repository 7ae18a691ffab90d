//! Reconnect loop with exponential backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::manager::{Origin, Shared};

/// Retries the connection until it succeeds, attempts run out, or `cancel`
/// fires.
///
/// Holds only a weak reference between attempts so a dropped manager ends
/// the loop. Returns a boxed future to break the type cycle with the read
/// task that spawns it.
pub(crate) fn reconnect_loop(
    shared: Weak<Shared>,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        loop {
            let Some(delay) = shared
                .upgrade()
                .and_then(|manager| manager.begin_reconnect_wait(&cancel))
            else {
                return;
            };

            // Wait for the backoff delay (or cancellation).
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(manager) = shared.upgrade() else {
                return;
            };
            let Some(generation) = manager.begin_reconnect_attempt(&cancel) else {
                return;
            };
            match manager.establish(generation, Origin::Reconnect).await {
                Ok(()) => return,
                Err(ConnectionError::Cancelled) => {
                    debug!("reconnect attempt superseded");
                    return;
                }
                Err(e) => warn!(error = %e, "reconnect attempt failed"),
            }
        }
    })
}
