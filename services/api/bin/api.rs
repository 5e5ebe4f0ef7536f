//! Main Entrypoint for the Live Relay API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Initializing shared services (the upstream connector and tool executor).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use gemini_realtime::{Connector, WebSocketConnector};
use liverelay_api::{
    config::{Config, ToolProvider},
    router::create_router,
    state::AppState,
    ws::registry::SessionRegistry,
};
use liverelay_core::{
    ToolCoordinator, ToolExecutor,
    executors::{HttpToolExecutor, McpToolExecutor},
};
use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Builds the tool executor selected by `TOOL_PROVIDER`, if any.
async fn build_tool_executor(
    provider: &ToolProvider,
) -> anyhow::Result<Option<Arc<dyn ToolExecutor>>> {
    let executor: Option<Arc<dyn ToolExecutor>> = match provider {
        ToolProvider::None => {
            info!("No tool provider configured. Tool calls will be answered with errors.");
            None
        }
        ToolProvider::Http { base_url, api_key } => {
            info!(%base_url, "Using HTTP tool provider.");
            Some(Arc::new(HttpToolExecutor::new(
                base_url.clone(),
                api_key.clone(),
            )))
        }
        ToolProvider::Mcp { program, args } => {
            info!(%program, "Starting MCP tool server.");
            let executor = McpToolExecutor::spawn(program, args)
                .await
                .context("Failed to start MCP tool server")?;
            Some(Arc::new(executor))
        }
    };
    Ok(executor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let connector: Arc<dyn Connector> = Arc::new(
        WebSocketConnector::gemini(&config.gemini_ws_url, config.gemini_api_key.expose_secret())
            .context("Invalid GEMINI_WS_URL")?,
    );
    let tools = ToolCoordinator::new(build_tool_executor(&config.tool_provider).await?);

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        registry: Arc::new(SessionRegistry::new()),
        connector,
        tools,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.gemini_model,
        upstream = %config.gemini_ws_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
