//! Tool model and the capability interface the relay uses to run tools.
//!
//! The relay never talks to a concrete tool provider directly. It only knows
//! the [`ToolExecutor`] trait, so providers (HTTP, MCP, test doubles) can be
//! swapped freely.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments passed to a tool.
pub type ToolArguments = Map<String, Value>;

/// A function declaration as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Wraps declarations into the single tool entry the upstream setup expects.
pub fn to_upstream_tools(declarations: &[ToolDeclaration]) -> Vec<Value> {
    if declarations.is_empty() {
        return Vec::new();
    }
    vec![json!({ "function_declarations": declarations })]
}

/// Turns whatever the model sent as tool arguments into an argument map.
///
/// Objects are used as-is and strings are parsed as JSON. Anything else,
/// including unparseable strings and JSON that is not an object, becomes an
/// empty map. This never fails.
pub fn normalize_arguments(raw: Value) -> ToolArguments {
    match raw {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(kind = %json_kind(&other), "Tool arguments were not an object. Using no arguments.");
                Map::new()
            }
            Err(e) => {
                warn!(error = %e, "Tool arguments were not valid JSON. Using no arguments.");
                Map::new()
            }
        },
        Value::Null => Map::new(),
        other => {
            warn!(kind = %json_kind(&other), "Tool arguments were not an object. Using no arguments.");
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The result of one tool invocation, as seen by the model and the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Error { message: String },
}

impl ToolOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The value embedded as `content` in the upstream function response.
    pub fn response_content(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Error { message } => json!({ "error": message }),
        }
    }
}

/// An external service able to list and execute tools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Lists the tools available for the given apps, or for all apps when
    /// `apps` is `None`.
    async fn get_tools(&self, apps: Option<Vec<String>>) -> Result<Vec<ToolDeclaration>>;

    /// Executes the named tool. Failures are returned as errors, never panics.
    async fn execute(&self, name: &str, params: ToolArguments) -> Result<Value>;
}

/// Runs model-issued tool calls against the configured executor and turns
/// every possible result into a [`ToolOutcome`].
#[derive(Clone, Default)]
pub struct ToolCoordinator {
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl ToolCoordinator {
    pub fn new(executor: Option<Arc<dyn ToolExecutor>>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> Option<&Arc<dyn ToolExecutor>> {
        self.executor.as_ref()
    }

    /// Invokes a tool. Never returns an error: executor failures, error
    /// payloads and a missing executor all become [`ToolOutcome::Error`].
    pub async fn invoke(&self, name: &str, raw_args: Value) -> ToolOutcome {
        let args = normalize_arguments(raw_args);

        let Some(executor) = &self.executor else {
            warn!(tool = %name, "Tool call received but no tool executor is configured.");
            return ToolOutcome::error(format!(
                "No tool executor is available to run '{}'",
                name
            ));
        };

        info!(tool = %name, arg_count = args.len(), "Executing tool call");
        match executor.execute(name, args).await {
            Ok(result) => match error_payload(&result) {
                Some(message) => {
                    warn!(tool = %name, error = %message, "Tool returned an error payload");
                    ToolOutcome::Error { message }
                }
                None => ToolOutcome::Success(result),
            },
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Extracts the message from results shaped like `{"error": ...}`.
fn error_payload(result: &Value) -> Option<String> {
    match result.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}
