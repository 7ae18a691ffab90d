//! Opening the WebSocket.
//!
//! The manager never dials the network itself; it asks a [`Connector`] for a
//! split sink/stream pair. [`TungsteniteConnector`] is the production
//! implementation.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use tradesim_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::config::AuthPlacement;
use crate::error::TransportError;

/// Outbound half of an open WebSocket.
pub type WsSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of an open WebSocket.
pub type WsStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// Where and how to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full URL, including the auth query parameter when configured that way.
    pub url: String,
    /// Token for the `Authorization: Bearer` header.
    pub bearer: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &redact_query(&self.url))
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Endpoint {
    /// Places `token` on the request according to `auth`.
    pub fn new(url: String, token: Option<String>, auth: AuthPlacement) -> Self {
        match (token, auth) {
            (Some(token), AuthPlacement::Query) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("token", &token)
                    .finish();
                let sep = if url.contains('?') { '&' } else { '?' };
                Self {
                    url: format!("{url}{sep}{query}"),
                    bearer: None,
                }
            }
            (bearer, _) => Self { url, bearer },
        }
    }
}

fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Opens WebSocket connections.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        endpoint: Endpoint,
    ) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>>;
}

/// Connects with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    max_message_size: usize,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self {
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }
}

impl Connector for TungsteniteConnector {
    fn connect(
        &self,
        endpoint: Endpoint,
    ) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>> {
        let max = self.max_message_size;
        async move {
            let mut request = endpoint
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            if let Some(token) = &endpoint.bearer {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                request.headers_mut().insert(header::AUTHORIZATION, value);
            }

            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(max);
            ws_config.max_frame_size = Some(max);

            debug!(url = redact_query(&endpoint.url), "opening WebSocket");
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                    .await?;
            let (write, read) = ws_stream.split();
            Ok((Box::pin(write) as WsSink, Box::pin(read) as WsStream))
        }
        .boxed()
    }
}
