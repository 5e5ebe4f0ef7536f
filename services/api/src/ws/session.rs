//! Manages the WebSocket connection lifecycle for one client: configuration
//! handshake, upstream connect, relay, and teardown.

use super::{
    protocol::{ClientMessage, ServerMessage},
    registry::{Session, SessionRegistry},
    relay::{ClientSender, SessionError, run_relay},
    tools::resolve_declarations,
};
use crate::{models::SessionPhase, state::AppState};
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Stream, StreamExt};
use gemini_realtime::UpstreamConnection;
use liverelay_core::SessionConfig;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<AppState>) {
    let (socket_tx, socket_rx) = socket.split();
    run_session(socket_rx, ClientSender::new(socket_tx), client_id, state).await;
}

/// Drives one client session from registration to teardown.
///
/// Teardown always runs, whichever way the session ends. Fatal errors are
/// reported to the client with an `error` frame first.
#[instrument(name = "ws_session", skip_all, fields(client_id = %client_id, session_id))]
pub async fn run_session<S>(
    mut client_rx: S,
    client: ClientSender,
    client_id: String,
    state: Arc<AppState>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let upstream = Arc::new(
        UpstreamConnection::new(state.connector.clone())
            .with_handshake_timeout(state.config.handshake_timeout),
    );
    let session = state.registry.create(&client_id, upstream);
    tracing::Span::current().record("session_id", tracing::field::display(session.id));
    let guard = TeardownGuard {
        registry: state.registry.clone(),
        session: session.clone(),
    };
    info!("New WebSocket connection. Awaiting configuration...");

    let result: Result<(), SessionError> = async {
        let config = tokio::select! {
            config = receive_config(&mut client_rx, &state) => config?,
            _ = session.superseded() => return Ok(()),
        };
        let Some(config) = config else {
            info!("Client disconnected before sending configuration.");
            return Ok(());
        };

        state.registry.set_phase(&session, SessionPhase::Connecting);
        tokio::select! {
            connected = connect_upstream(&session, config) => connected?,
            _ = session.superseded() => return Ok(()),
        }

        state.registry.set_phase(&session, SessionPhase::Relaying);
        info!("Relay started.");
        run_relay(
            client_rx,
            client.clone(),
            session.clone(),
            state.tools.clone(),
            state.config.upstream_idle_timeout,
        )
        .await
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "Session terminated with error.");
        if let Err(send_err) = client.send(&ServerMessage::error(e.to_string())).await {
            debug!(error = %send_err, "Could not deliver error frame to client.");
        }
    }

    teardown(&state.registry, &session).await;
    client.close().await;
    drop(guard);
}

/// Waits for the configuration frame. `Ok(None)` means the client left first.
async fn receive_config<S>(
    client_rx: &mut S,
    state: &AppState,
) -> Result<Option<SessionConfig>, SessionError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let text = loop {
        match client_rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(Message::Binary(_))) => return Err(SessionError::ConfigRequired),
            Some(Err(e)) => {
                debug!(error = %e, "Client connection dropped before configuration.");
                return Ok(None);
            }
        }
    };

    let raw = match ClientMessage::parse(text.as_str()) {
        Ok(ClientMessage::Config { config }) => config,
        Ok(_) => return Err(SessionError::ConfigRequired),
        Err(e) => {
            warn!(error = %e, "Unusable first frame.");
            return Err(SessionError::ConfigRequired);
        }
    };

    let mut config = parse_session_config(raw, &state.config.gemini_model)?;
    resolve_declarations(&mut config, &state.tools).await;
    info!(
        mode = ?config.mode,
        model = %config.model_id,
        tools = config.has_tools(),
        "Received session configuration."
    );
    Ok(Some(config))
}

/// Builds the session configuration from the client's `config` object. The
/// server's default model applies when the client does not pick one.
fn parse_session_config(raw: Value, default_model: &str) -> Result<SessionConfig, SessionError> {
    if raw.is_null() {
        return Ok(SessionConfig {
            model_id: default_model.to_string(),
            ..SessionConfig::default()
        });
    }
    let client_chose_model = raw.get("modelId").is_some();
    let mut config: SessionConfig =
        serde_json::from_value(raw).map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
    if !client_chose_model {
        config.model_id = default_model.to_string();
    }
    Ok(config)
}

async fn connect_upstream(session: &Session, config: SessionConfig) -> Result<(), SessionError> {
    session.upstream.set_config(config).await?;
    session.upstream.connect().await?;
    Ok(())
}

/// Closes the upstream connection and drops the registry entry. Runs its body
/// at most once per session.
async fn teardown(registry: &SessionRegistry, session: &Session) {
    if !session.begin_teardown() {
        return;
    }
    registry.set_phase(session, SessionPhase::Closing);
    session.upstream.close().await;
    let removed = registry.remove_session(session);
    info!(removed, "Session torn down.");
}

/// Fallback cleanup for a session task that ends without reaching teardown.
struct TeardownGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.session.begin_teardown() {
            return;
        }
        warn!(session_id = %self.session.id, "Session dropped before teardown. Cleaning up.");
        self.registry.remove_session(&self.session);
        let upstream = self.session.upstream.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { upstream.close().await });
        }
    }
}
