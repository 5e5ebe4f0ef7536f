//! The relay loop: two pumps moving frames between the browser and the
//! upstream connection until either side stops.

use super::{
    protocol::{ClientMessage, FrameError, ServerMessage},
    registry::Session,
    tools::dispatch_tool_call,
};
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use gemini_realtime::{
    ConnectionError, ConnectionState, UpstreamConnection, UpstreamEvent, UpstreamMessage,
};
use liverelay_core::ToolCoordinator;
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinError};
use tracing::{Instrument, debug, info, warn};

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("First WebSocket message must be configuration.")]
    ConfigRequired,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Upstream(#[from] ConnectionError),
    #[error("No upstream frame received within {0:?}")]
    IdleTimeout(Duration),
    #[error("Failed to send to client: {0}")]
    ClientSend(axum::Error),
    #[error("Failed to encode client frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Relay task failed: {0}")]
    Task(String),
}

type ClientSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// The sending half of the browser socket, shared by the pumps and the
/// session handler.
#[derive(Clone)]
pub struct ClientSender {
    sink: Arc<Mutex<ClientSink>>,
}

impl ClientSender {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::pin(sink))),
        }
    }

    pub async fn send(&self, message: &ServerMessage) -> Result<(), SessionError> {
        let json = serde_json::to_string(message)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(SessionError::ClientSend)
    }

    pub async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Error while closing client socket.");
        }
    }
}

/// Client to upstream. Returns `Ok` when the client goes away.
pub async fn inbound_pump<S>(mut client_rx: S, upstream: Arc<UpstreamConnection>) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = client_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                info!(?frame, "Client sent close frame.");
                return Ok(());
            }
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary frame from client.");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                info!(error = %e, "Client connection dropped.");
                return Ok(());
            }
        };

        match ClientMessage::parse(text.as_str()) {
            Ok(ClientMessage::Audio { data }) => upstream.send_audio(data).await?,
            Ok(ClientMessage::Image { data }) => upstream.send_image(data).await?,
            Ok(ClientMessage::Text { data }) => upstream.send_text(data).await?,
            Ok(ClientMessage::Config { .. }) => {
                warn!("Ignoring configuration frame received after session setup.");
            }
            Err(e @ FrameError::UnknownType(_)) => warn!(error = %e, "Ignoring client frame."),
            Err(e @ FrameError::Malformed(_)) => warn!(error = %e, "Discarding client frame."),
        }
    }

    info!("Client disconnected.");
    Ok(())
}

/// Upstream to client. Tool calls run inside this pump, one at a time: the
/// next upstream frame is read only after the function response went out.
pub async fn outbound_pump(
    upstream: Arc<UpstreamConnection>,
    client: ClientSender,
    tools: ToolCoordinator,
    idle_timeout: Option<Duration>,
) -> Result<(), SessionError> {
    loop {
        let received = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, upstream.receive())
                .await
                .map_err(|_| SessionError::IdleTimeout(limit))?,
            None => upstream.receive().await,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if upstream.state().await == ConnectionState::Closed {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Err(ConnectionError::Disconnected) => {
                info!("Upstream disconnected.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let message = match serde_json::from_str::<UpstreamMessage>(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable upstream frame.");
                continue;
            }
        };

        for event in message.into_events() {
            match event {
                UpstreamEvent::Text(text) => client.send(&ServerMessage::Text { text }).await?,
                UpstreamEvent::Audio(data) => client.send(&ServerMessage::Audio { data }).await?,
                UpstreamEvent::ToolCall(call) => {
                    dispatch_tool_call(call, &upstream, &client, &tools).await?
                }
                UpstreamEvent::TurnComplete => client.send(&ServerMessage::turn_complete()).await?,
            }
        }
    }
}

/// Runs both pumps until the first one finishes or the session is
/// superseded, then cancels whatever is still running.
pub async fn run_relay<S>(
    client_rx: S,
    client: ClientSender,
    session: Arc<Session>,
    tools: ToolCoordinator,
    idle_timeout: Option<Duration>,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let mut inbound = tokio::spawn(
        inbound_pump(client_rx, session.upstream.clone()).in_current_span(),
    );
    let mut outbound = tokio::spawn(
        outbound_pump(session.upstream.clone(), client, tools, idle_timeout).in_current_span(),
    );

    tokio::select! {
        result = &mut inbound => {
            debug!("Inbound pump finished first.");
            outbound.abort();
            let _ = outbound.await;
            pump_result(result)
        }
        result = &mut outbound => {
            debug!("Outbound pump finished first.");
            inbound.abort();
            let _ = inbound.await;
            pump_result(result)
        }
        _ = session.superseded() => {
            info!("Session superseded by a newer connection.");
            inbound.abort();
            outbound.abort();
            let _ = inbound.await;
            let _ = outbound.await;
            Ok(())
        }
    }
}

fn pump_result(result: Result<Result<(), SessionError>, JoinError>) -> Result<(), SessionError> {
    result.map_err(|e| SessionError::Task(e.to_string()))?
}
