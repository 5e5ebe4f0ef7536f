//! API Models
//!
//! Data structures returned by the REST endpoints, annotated for OpenAPI
//! documentation with `utoipa`.

use chrono::{DateTime, Utc};
use liverelay_core::ToolDeclaration;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Where a live session is in its lifecycle.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingConfig,
    Connecting,
    Relaying,
    Closing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::AwaitingConfig => write!(f, "awaiting_config"),
            SessionPhase::Connecting => write!(f, "connecting"),
            SessionPhase::Relaying => write!(f, "relaying"),
            SessionPhase::Closing => write!(f, "closing"),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionSummary {
    pub client_id: String,
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "relaying")]
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ToolListResponse {
    #[schema(value_type = Vec<Object>)]
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ToolsQuery {
    /// Comma-separated app names. All tools are listed when omitted.
    pub apps: Option<String>,
}

impl ToolsQuery {
    pub fn app_filter(&self) -> Option<Vec<String>> {
        let apps: Vec<String> = self
            .apps
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|app| !app.is_empty())
            .map(str::to_string)
            .collect();
        (!apps.is_empty()).then_some(apps)
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_filter() {
        let query = ToolsQuery {
            apps: Some("github, slack,,".to_string()),
        };
        assert_eq!(
            query.app_filter(),
            Some(vec!["github".to_string(), "slack".to_string()])
        );

        assert_eq!(ToolsQuery::default().app_filter(), None);
        let blank = ToolsQuery {
            apps: Some(" , ".to_string()),
        };
        assert_eq!(blank.app_filter(), None);
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&SessionPhase::AwaitingConfig).unwrap();
        assert_eq!(json, "\"awaiting_config\"");
        assert_eq!(SessionPhase::Relaying.to_string(), "relaying");
    }
}
