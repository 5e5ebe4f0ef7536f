//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the relay WebSocket endpoint, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{ErrorResponse, SessionPhase, SessionSummary, ToolListResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_tools,
        handlers::execute_tool,
        handlers::list_sessions,
    ),
    components(
        schemas(ToolListResponse, SessionSummary, SessionPhase, ErrorResponse)
    ),
    tags(
        (name = "Live Relay API", description = "Tools and live sessions of the realtime relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/tools/{name}/execute", post(handlers::execute_tool))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/ws/{client_id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_rest_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/tools"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/tools/{name}/execute"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/sessions"));
    }
}
