//! The upstream connection: a handshake-then-stream state machine shared by a
//! session's two relay pumps.
//!
//! ```text
//! Unconfigured --set_config--> Configured --connect--> Connected
//!       \                          |  (handshake error)     |
//!        `---------- close --------+--------> Closed <------'
//! ```
//!
//! Sends are serialized by a single lock around the transport sink, so frames
//! from the two pumps are never interleaved.

use crate::{
    setup::build_setup,
    types::{ClientMessage, UpstreamMessage},
};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use liverelay_core::SessionConfig;
use serde_json::Value;
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError,
        protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Outgoing half of an upstream transport. Items are serialized JSON frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
/// Incoming half of an upstream transport. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens transports to the upstream service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<(FrameSink, FrameStream)>;
}

/// Connects to the upstream service over a WebSocket.
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// A connector for the Gemini Live endpoint authenticated with `api_key`.
    /// Any query string already on `endpoint` is kept.
    pub fn gemini(endpoint: &str, api_key: &str) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(Self::new(url))
    }
}

/// Maps one WebSocket message to a frame for the connection. A close frame
/// with anything but a normal code becomes an error carrying the reason.
fn frame_text(message: Result<WsMessage, WsError>) -> Option<Result<String>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
        // The service may deliver JSON in binary frames.
        Ok(WsMessage::Binary(bytes)) => {
            Some(String::from_utf8(bytes.to_vec()).map_err(anyhow::Error::from))
        }
        Ok(WsMessage::Close(Some(CloseFrame { code, reason }))) if code != CloseCode::Normal => {
            warn!(%code, %reason, "Upstream closed the connection.");
            Some(Err(anyhow!(
                "upstream closed the connection ({}): {}",
                u16::from(code),
                reason.as_str()
            )))
        }
        Ok(WsMessage::Close(close_frame)) => {
            info!(?close_frame, "Upstream sent a close frame.");
            None
        }
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .context("Failed to open upstream WebSocket")?;
        info!("Connected to upstream WebSocket.");
        let (ws_tx, ws_rx) = ws_stream.split();

        let sink = ws_tx
            .with(|text: String| future::ready(Ok::<_, WsError>(WsMessage::Text(text.into()))))
            .sink_map_err(anyhow::Error::from);

        let stream = ws_rx.filter_map(|message| future::ready(frame_text(message)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    Configured,
    Connected,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Configuration must be set before connecting.")]
    ConfigMissing,
    #[error("Failed to connect to upstream: {0}")]
    HandshakeFailed(String),
    #[error("Operation not allowed while the connection is {0:?}")]
    InvalidState(ConnectionState),
    #[error("Upstream closed the connection.")]
    Disconnected,
    #[error("Failed to encode upstream frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Upstream transport error: {0:#}")]
    Transport(anyhow::Error),
}

struct Lifecycle {
    state: ConnectionState,
    config: Option<SessionConfig>,
}

/// One handshake-then-stream connection to the upstream service.
pub struct UpstreamConnection {
    connector: Arc<dyn Connector>,
    handshake_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
    sink: Mutex<Option<FrameSink>>,
    stream: Mutex<Option<FrameStream>>,
}

impl UpstreamConnection {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Unconfigured,
                config: None,
            }),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        self.lifecycle.lock().await.state
    }

    pub async fn config(&self) -> Option<SessionConfig> {
        self.lifecycle.lock().await.config.clone()
    }

    /// Stores the configuration for the next `connect`, replacing any earlier one.
    pub async fn set_config(&self, config: SessionConfig) -> Result<(), ConnectionError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            ConnectionState::Unconfigured | ConnectionState::Configured => {
                lifecycle.config = Some(config);
                lifecycle.state = ConnectionState::Configured;
                Ok(())
            }
            other => Err(ConnectionError::InvalidState(other)),
        }
    }

    /// Opens the transport, sends the setup frame and waits for the
    /// acknowledgment. Any failure closes the connection.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        // Holding the sink slot serializes concurrent connect attempts.
        let mut sink_slot = self.sink.lock().await;

        let config = {
            let lifecycle = self.lifecycle.lock().await;
            match lifecycle.state {
                ConnectionState::Unconfigured => return Err(ConnectionError::ConfigMissing),
                ConnectionState::Configured => lifecycle
                    .config
                    .clone()
                    .ok_or(ConnectionError::ConfigMissing)?,
                other => return Err(ConnectionError::InvalidState(other)),
            }
        };

        let setup = build_setup(&config);
        let handshake = tokio::time::timeout(self.handshake_timeout, self.handshake(&setup)).await;

        let (mut sink, stream) = match handshake {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                self.lifecycle.lock().await.state = ConnectionState::Closed;
                return Err(ConnectionError::HandshakeFailed(format!("{:#}", e)));
            }
            Err(_) => {
                self.lifecycle.lock().await.state = ConnectionState::Closed;
                return Err(ConnectionError::HandshakeFailed(format!(
                    "no setup acknowledgment within {:?}",
                    self.handshake_timeout
                )));
            }
        };

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == ConnectionState::Closed {
            // Closed while the handshake was in flight.
            let _ = sink.close().await;
            return Err(ConnectionError::InvalidState(ConnectionState::Closed));
        }
        *sink_slot = Some(sink);
        *self.stream.lock().await = Some(stream);
        lifecycle.state = ConnectionState::Connected;
        info!(model = %config.model_id, "Upstream session setup is complete.");
        Ok(())
    }

    async fn handshake(&self, setup: &ClientMessage) -> Result<(FrameSink, FrameStream)> {
        let (mut sink, mut stream) = self.connector.open().await?;
        sink.send(serde_json::to_string(setup)?)
            .await
            .context("Failed to send setup frame")?;

        match stream.next().await {
            Some(Ok(ack)) => match serde_json::from_str::<UpstreamMessage>(&ack) {
                Ok(message) if message.is_setup_complete() => {
                    debug!("Received setup acknowledgment.");
                }
                _ => warn!(ack = %ack, "Unexpected setup acknowledgment. Continuing."),
            },
            Some(Err(e)) => return Err(e.context("Failed to read setup acknowledgment")),
            None => bail!("Upstream closed the connection during setup"),
        }

        Ok((sink, stream))
    }

    /// Sends a frame upstream. Frames sent before the connection is
    /// established, or after it closed, are dropped without error.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ConnectionError> {
        let state = self.state().await;
        if state != ConnectionState::Connected {
            debug!(?state, "Upstream not connected. Dropping outgoing frame.");
            return Ok(());
        }

        let payload = serde_json::to_string(&message)?;
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(payload).await.map_err(ConnectionError::Transport),
            None => {
                debug!("Upstream transport released. Dropping outgoing frame.");
                Ok(())
            }
        }
    }

    pub async fn send_audio(&self, data: String) -> Result<(), ConnectionError> {
        self.send(ClientMessage::audio(data)).await
    }

    pub async fn send_image(&self, data: String) -> Result<(), ConnectionError> {
        self.send(ClientMessage::image(data)).await
    }

    pub async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        self.send(ClientMessage::user_text(text)).await
    }

    pub async fn send_function_response(
        &self,
        name: String,
        content: Value,
    ) -> Result<(), ConnectionError> {
        self.send(ClientMessage::function_response(name, content))
            .await
    }

    /// Waits for the next upstream frame.
    ///
    /// Returns `Ok(None)` when there is no active transport and
    /// `Err(Disconnected)` when the peer ends the stream.
    pub async fn receive(&self) -> Result<Option<String>, ConnectionError> {
        let mut slot = self.stream.lock().await;
        let Some(stream) = slot.as_mut() else {
            return Ok(None);
        };

        match stream.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(ConnectionError::Transport(e)),
            None => {
                *slot = None;
                drop(slot);
                self.lifecycle.lock().await.state = ConnectionState::Closed;
                info!("Upstream ended the stream.");
                Err(ConnectionError::Disconnected)
            }
        }
    }

    /// Closes the connection from any state and releases the transport.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().await;
            std::mem::replace(&mut lifecycle.state, ConnectionState::Closed)
        };

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error while closing upstream transport.");
            }
        }
        // A receive in flight keeps the stream; it is dropped with the connection.
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }

        if previous != ConnectionState::Closed {
            info!(?previous, "Upstream connection closed.");
        }
    }
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

/// Shorthand used by callers that only need to know the transport is gone.
pub fn is_disconnect(error: &ConnectionError) -> bool {
    matches!(error, ConnectionError::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackConnector;
    use serde_json::json;

    async fn configured(connector: Arc<dyn Connector>) -> UpstreamConnection {
        let connection = UpstreamConnection::new(connector);
        connection
            .set_config(SessionConfig::default())
            .await
            .unwrap();
        connection
    }

    #[tokio::test]
    async fn test_connect_without_config_fails_without_opening() {
        let (connector, _server) = LoopbackConnector::new();
        let connector = Arc::new(connector);
        let connection = UpstreamConnection::new(connector.clone());

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConfigMissing));
        assert_eq!(connector.open_count(), 0);
        assert_eq!(connection.state().await, ConnectionState::Unconfigured);
    }

    #[tokio::test]
    async fn test_set_config_overwrites() {
        let (connector, _server) = LoopbackConnector::new();
        let connection = UpstreamConnection::new(Arc::new(connector));
        connection
            .set_config(SessionConfig::default())
            .await
            .unwrap();
        connection
            .set_config(SessionConfig {
                voice: "Kore".to_string(),
                ..SessionConfig::default()
            })
            .await
            .unwrap();

        assert_eq!(connection.state().await, ConnectionState::Configured);
        assert_eq!(connection.config().await.unwrap().voice, "Kore");
    }

    #[tokio::test]
    async fn test_handshake_sends_setup_first() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.acknowledge_setup();

        connection.connect().await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Connected);

        let setup = server.next_frame().await.unwrap();
        assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-exp");
    }

    #[tokio::test]
    async fn test_send_before_connect_is_dropped() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;

        connection.send_text("hi".to_string()).await.unwrap();

        server.acknowledge_setup();
        connection.connect().await.unwrap();
        connection.send_text("after".to_string()).await.unwrap();

        let first = server.next_frame().await.unwrap();
        assert!(first.get("setup").is_some());
        let second = server.next_frame().await.unwrap();
        assert_eq!(
            second["client_content"]["turns"][0]["parts"][0]["text"],
            "after"
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_handshake_failure() {
        let connector = Arc::new(LoopbackConnector::failing("connection refused"));
        let connection = configured(connector.clone()).await;

        let err = connection.connect().await.unwrap_err();
        match err {
            ConnectionError::HandshakeFailed(cause) => assert!(cause.contains("connection refused")),
            other => panic!("expected HandshakeFailed, got {:?}", other),
        }
        assert_eq!(connection.state().await, ConnectionState::Closed);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_hang_up_before_ack_is_handshake_failure() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.hang_up();

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::HandshakeFailed(_)));
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_reason_reaches_handshake_failure() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.close_with("API key not valid. Please pass a valid API key.");

        let err = connection.connect().await.unwrap_err();
        match err {
            ConnectionError::HandshakeFailed(cause) => {
                assert!(cause.contains("API key not valid"), "cause: {}", cause)
            }
            other => panic!("expected HandshakeFailed, got {:?}", other),
        }
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }

    #[test]
    fn test_abnormal_close_frame_carries_reason() {
        let frame = frame_text(Ok(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Invalid,
            reason: "API key not valid".into(),
        }))));
        let err = frame.unwrap().unwrap_err().to_string();
        assert!(err.contains("1007"), "error: {}", err);
        assert!(err.contains("API key not valid"), "error: {}", err);
    }

    #[test]
    fn test_normal_close_frame_ends_stream_quietly() {
        let normal = frame_text(Ok(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))));
        assert!(normal.is_none());
        assert!(frame_text(Ok(WsMessage::Close(None))).is_none());
        assert_eq!(
            frame_text(Ok(WsMessage::Text("{}".into()))).unwrap().unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_gemini_url_encodes_key() {
        let connector = WebSocketConnector::gemini("wss://host/ws/live", "a b&c=d").unwrap();
        assert_eq!(connector.url, "wss://host/ws/live?key=a+b%26c%3Dd");
    }

    #[test]
    fn test_gemini_url_keeps_existing_query() {
        let connector = WebSocketConnector::gemini("ws://host/live?alt=1", "k").unwrap();
        assert_eq!(connector.url, "ws://host/live?alt=1&key=k");
        assert!(WebSocketConnector::gemini("not a url", "k").is_err());
    }

    #[tokio::test]
    async fn test_missing_ack_times_out() {
        let (connector, _server) = LoopbackConnector::new();
        let connection = UpstreamConnection::new(Arc::new(connector))
            .with_handshake_timeout(Duration::from_millis(50));
        connection
            .set_config(SessionConfig::default())
            .await
            .unwrap();

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::HandshakeFailed(_)));
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (connector, server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.acknowledge_setup();
        connection.connect().await.unwrap();

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::InvalidState(ConnectionState::Connected)
        ));
    }

    #[tokio::test]
    async fn test_receive_and_peer_disconnect() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.acknowledge_setup();
        connection.connect().await.unwrap();

        server.push(json!({ "serverContent": { "turnComplete": true } }));
        let frame = connection.receive().await.unwrap().unwrap();
        assert!(frame.contains("turnComplete"));

        server.hang_up();
        let err = connection.receive().await.unwrap_err();
        assert!(is_disconnect(&err));
        assert_eq!(connection.state().await, ConnectionState::Closed);
        assert!(connection.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_without_transport() {
        let (connector, _server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        assert!(connection.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_transport() {
        let (connector, mut server) = LoopbackConnector::new();
        let connection = configured(Arc::new(connector)).await;
        server.acknowledge_setup();
        connection.connect().await.unwrap();
        let _setup = server.next_frame().await.unwrap();

        connection.close().await;
        connection.close().await;
        assert_eq!(connection.state().await, ConnectionState::Closed);

        // The upstream side observes the end of the stream.
        assert!(server.next_frame().await.is_none());

        connection.send_text("late".to_string()).await.unwrap();
        assert!(connection.receive().await.unwrap().is_none());
        assert!(matches!(
            connection.set_config(SessionConfig::default()).await,
            Err(ConnectionError::InvalidState(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_close_from_unconfigured() {
        let (connector, _server) = LoopbackConnector::new();
        let connection = UpstreamConnection::new(Arc::new(connector));
        connection.close().await;
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }
}
