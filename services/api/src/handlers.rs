//! Axum Handlers for the REST API
//!
//! Tool discovery and execution against the configured tool executor, and a
//! read-only view of live relay sessions. Documented with `utoipa`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorResponse, SessionSummary, ToolListResponse, ToolsQuery},
    state::AppState,
};

pub enum ApiError {
    ServiceUnavailable(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(message) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn no_executor() -> ApiError {
    ApiError::ServiceUnavailable("No tool executor is configured.".to_string())
}

/// List the tools available to sessions, optionally filtered by app.
#[utoipa::path(
    get,
    path = "/api/tools",
    params(ToolsQuery),
    responses(
        (status = 200, description = "Available tools", body = ToolListResponse),
        (status = 502, description = "Tool service failed", body = ErrorResponse),
        (status = 503, description = "No tool executor configured", body = ErrorResponse)
    )
)]
pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ToolsQuery>,
) -> Result<Json<ToolListResponse>, ApiError> {
    let executor = state.tools.executor().ok_or_else(no_executor)?;
    let apps = query.app_filter();
    let tools = executor.get_tools(apps.clone()).await.map_err(|e| {
        warn!(error = %e, ?apps, "Failed to list tools.");
        ApiError::BadGateway(e.to_string())
    })?;
    Ok(Json(ToolListResponse { tools }))
}

/// Execute a tool directly with a JSON object of arguments.
#[utoipa::path(
    post,
    path = "/api/tools/{name}/execute",
    request_body = Object,
    params(
        ("name" = String, Path, description = "The tool to execute")
    ),
    responses(
        (status = 200, description = "The tool's result", body = Object),
        (status = 502, description = "Tool execution failed", body = ErrorResponse),
        (status = 503, description = "No tool executor configured", body = ErrorResponse)
    )
)]
pub async fn execute_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(params): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let executor = state.tools.executor().ok_or_else(no_executor)?;
    info!(tool = %name, "Executing tool over HTTP.");
    let result = executor.execute(&name, params).await.map_err(|e| {
        warn!(tool = %name, error = %e, "Tool execution failed.");
        ApiError::BadGateway(e.to_string())
    })?;
    Ok(Json(result))
}

/// List live relay sessions.
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Live sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.snapshot())
}
