//! Heartbeat deadline shared between the heartbeat and read pumps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline by which some inbound frame must arrive.
///
/// The heartbeat pump arms it when a HEARTBEAT goes out; the read pump
/// disarms it on every inbound message and closes the link if it expires.
#[derive(Debug, Clone)]
pub(crate) struct Watchdog {
    deadline: Arc<watch::Sender<Option<Instant>>>,
}

impl Watchdog {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            deadline: Arc::new(tx),
        }
    }

    /// Sets the deadline to `timeout` from now unless one is already
    /// pending. Only inbound traffic clears a pending deadline, so the first
    /// unanswered heartbeat always gets to fire.
    pub(crate) fn arm(&self, timeout: Duration) {
        let at = Instant::now() + timeout;
        self.deadline.send_if_modified(|deadline| {
            if deadline.is_some() {
                return false;
            }
            *deadline = Some(at);
            true
        });
    }

    pub(crate) fn disarm(&self) {
        self.deadline.send_replace(None);
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.borrow().is_some()
    }

    /// Resolves once an armed deadline passes without being disarmed.
    pub(crate) async fn expired(&self) {
        let mut rx = self.deadline.subscribe();
        loop {
            let deadline = *rx.borrow_and_update();
            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(at) => return,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}
