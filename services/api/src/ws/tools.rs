//! Tool handling for a live session: declaration lookup before the handshake
//! and dispatch of model-issued tool calls during the relay.

use super::{
    protocol::{ServerMessage, ToolCallData},
    relay::{ClientSender, SessionError},
};
use gemini_realtime::{FunctionCall, UpstreamConnection};
use liverelay_core::{
    SessionConfig, ToolCoordinator,
    tools::{normalize_arguments, to_upstream_tools},
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Fills in tool declarations from the executor when the client named apps
/// but sent no declarations. Failures leave the session without tools.
pub async fn resolve_declarations(config: &mut SessionConfig, tools: &ToolCoordinator) {
    if !config.needs_tool_resolution() {
        return;
    }
    let Some(executor) = tools.executor() else {
        debug!("No tool executor configured. Skipping tool resolution.");
        return;
    };

    match executor.get_tools(config.apps.clone()).await {
        Ok(declarations) => {
            info!(count = declarations.len(), apps = ?config.apps, "Resolved tool declarations.");
            config.tools = Some(to_upstream_tools(&declarations));
        }
        Err(e) => {
            warn!(error = %e, apps = ?config.apps, "Failed to resolve tools. Continuing without tools.");
        }
    }
}

/// Runs one tool call to completion: the client sees the call and its
/// outcome, then the outcome goes back upstream as a function response.
#[instrument(skip_all, fields(tool = %call.name))]
pub async fn dispatch_tool_call(
    call: FunctionCall,
    upstream: &UpstreamConnection,
    client: &ClientSender,
    tools: &ToolCoordinator,
) -> Result<(), SessionError> {
    let FunctionCall { name, args, .. } = call;
    let parameters = Value::Object(normalize_arguments(args));

    client
        .send(&ServerMessage::ToolCall {
            data: ToolCallData {
                name: name.clone(),
                parameters: parameters.clone(),
            },
        })
        .await?;

    let outcome = tools.invoke(&name, parameters).await;
    client.send(&ServerMessage::from_outcome(&outcome)).await?;

    upstream
        .send_function_response(name, outcome.response_content())
        .await?;
    debug!(is_error = outcome.is_error(), "Tool call completed.");
    Ok(())
}
