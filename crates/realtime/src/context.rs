//! Collaborators injected into the connection manager.
//!
//! The manager never reaches for global state: the auth token lookup and the
//! user-facing notification sink are passed in through [`SessionContext`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use tradesim_protocol::NotificationPayload;

/// Default display duration for notifications.
const DEFAULT_DURATION: Duration = Duration::from_millis(3000);

/// Default display duration for server-pushed notifications.
const PUSHED_DURATION: Duration = Duration::from_millis(5000);

/// Number of error reports kept by [`NotificationLog`].
const MAX_ERRORS: usize = 10;

/// The visual category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
    Error,
}

impl NotificationKind {
    /// Parses the `type` field of a server notification. Unknown values map to `Info`.
    pub fn from_level(level: Option<&str>) -> Self {
        match level {
            Some("success") => NotificationKind::Success,
            Some("warning") | Some("warn") => NotificationKind::Warning,
            Some("error") => NotificationKind::Error,
            _ => NotificationKind::Info,
        }
    }
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// How long to show it. `None` keeps it open until dismissed.
    pub duration: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            duration: Some(DEFAULT_DURATION),
            timestamp: Utc::now(),
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    /// Keeps the notification open until the user dismisses it.
    pub fn sticky(mut self) -> Self {
        self.duration = None;
        self
    }

    /// Builds a notification from a server NOTIFICATION payload.
    ///
    /// A duration of `0` means sticky; a missing duration uses 5s.
    pub fn from_payload(payload: &NotificationPayload) -> Self {
        let duration = match payload.duration {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(PUSHED_DURATION),
        };
        let title = if payload.title.is_empty() {
            "Notification".to_string()
        } else {
            payload.title.clone()
        };
        Self {
            duration,
            ..Self::new(
                NotificationKind::from_level(payload.level.as_deref()),
                title,
                payload.message.clone(),
            )
        }
    }
}

/// Supplies the credential attached to every connection attempt.
pub trait TokenSource: Send + Sync {
    fn auth_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn auth_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl TokenSource for StaticToken {
    fn auth_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Sink for user-visible status: errors and notifications.
pub trait Reporter: Send + Sync {
    fn report_error(&self, message: &str, details: Option<&serde_json::Value>);
    fn report_notification(&self, notification: Notification);
}

/// Reporter that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report_error(&self, message: &str, details: Option<&serde_json::Value>) {
        error!(details = ?details, "{message}");
    }

    fn report_notification(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error | NotificationKind::Warning => {
                warn!(title = %notification.title, "{}", notification.message)
            }
            _ => info!(title = %notification.title, "{}", notification.message),
        }
    }
}

/// A recorded error report.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// In-memory reporter holding notifications in insertion order and the
/// most recent error reports.
///
/// Auto-dismissal is a UI concern; this only holds the queue.
#[derive(Debug, Default)]
pub struct NotificationLog {
    notifications: Mutex<Vec<Notification>>,
    errors: Mutex<VecDeque<ErrorReport>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the last error reports, oldest first.
    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Removes a notification by id. Returns `true` if found and removed.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut list = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let len_before = list.len();
        list.retain(|n| n.id != id);
        list.len() != len_before
    }

    pub fn clear(&self) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Reporter for NotificationLog {
    fn report_error(&self, message: &str, details: Option<&serde_json::Value>) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        errors.push_back(ErrorReport {
            message: message.to_string(),
            details: details.cloned(),
            timestamp: Utc::now(),
        });
        while errors.len() > MAX_ERRORS {
            errors.pop_front();
        }
        drop(errors);
        self.report_notification(Notification::error("Connection error", message));
    }

    fn report_notification(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Collaborators handed to the manager at construction.
#[derive(Clone)]
pub struct SessionContext {
    pub tokens: Arc<dyn TokenSource>,
    pub reporter: Arc<dyn Reporter>,
}

impl SessionContext {
    pub fn new(tokens: Arc<dyn TokenSource>, reporter: Arc<dyn Reporter>) -> Self {
        Self { tokens, reporter }
    }

    /// No credentials; reports go to the log only.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(StaticToken::default()), Arc::new(LogReporter))
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
