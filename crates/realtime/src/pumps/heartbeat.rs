//! Heartbeat pump: periodic application-level liveness frames.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Calls `beat` every `period` until cancelled or until `beat` returns
/// `false`. The immediate first tick is skipped. A zero `period` disables
/// heartbeats and returns at once.
///
/// `beat` sends the HEARTBEAT frame and arms the watchdog; keeping that in
/// the manager lets it check the connection state under its own lock.
pub(crate) async fn heartbeat_pump<F>(period: Duration, mut beat: F, cancel: CancellationToken)
where
    F: FnMut() -> bool,
{
    if period.is_zero() {
        debug!("heartbeat interval is zero, heartbeats disabled");
        return;
    }
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !beat() {
                    break;
                }
            }
        }
    }
}
