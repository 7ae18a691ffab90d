use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Envelope for all real-time traffic, in both directions.
///
/// `data` stays an untyped JSON value; use [`Frame::parse_data`] to decode it
/// once the type is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Frame {
    /// Creates a frame stamped with the current time.
    pub fn new(kind: MessageType, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            session_id: None,
            destination: None,
            headers: BTreeMap::new(),
        }
    }

    /// Creates a frame from a serializable payload.
    pub fn with_payload<T: Serialize>(
        kind: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Creates an outbound HEARTBEAT frame.
    pub fn heartbeat() -> Self {
        let now = Utc::now();
        let data = serde_json::json!({ "timestamp": now.timestamp_millis() });
        Self {
            timestamp: now,
            ..Self::new(MessageType::Heartbeat, data)
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Key used to route the frame to a subscription: the explicit
    /// destination if present, otherwise the type's wire name.
    pub fn routing_key(&self) -> &str {
        self.destination
            .as_deref()
            .unwrap_or_else(|| self.kind.as_str())
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}
