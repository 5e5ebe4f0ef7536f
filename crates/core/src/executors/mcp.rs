//! A `ToolExecutor` that forwards to an MCP server running as a child process.

use crate::tools::{ToolArguments, ToolDeclaration, ToolExecutor};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent, Tool},
    service::{RoleClient, RunningService},
    transport::TokioChildProcess,
};
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

/// Executes tools through the Model Context Protocol.
///
/// Tools are grouped into apps by name prefix: the tools of app `github` are
/// the ones named `GITHUB_*`.
pub struct McpToolExecutor {
    client: RunningService<RoleClient, ()>,
}

impl McpToolExecutor {
    /// Spawns `program` with `args` and performs the MCP initialization.
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut command = Command::new(program);
        command.args(args);
        let transport = TokioChildProcess::new(command)
            .with_context(|| format!("Failed to start MCP server '{}'", program))?;
        let client = ().serve(transport).await?;
        info!(program, "Connected to MCP tool server.");
        Ok(Self { client })
    }
}

fn belongs_to_any(tool_name: &str, apps: &[String]) -> bool {
    let upper = tool_name.to_uppercase();
    apps.iter()
        .any(|app| upper.starts_with(&format!("{}_", app.to_uppercase())))
}

fn to_declaration(tool: Tool) -> Result<ToolDeclaration> {
    Ok(ToolDeclaration {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        parameters: Some(serde_json::to_value(&*tool.input_schema)?),
    })
}

/// Joins the text parts of a tool result and parses them as JSON when possible.
fn text_to_value(texts: Vec<String>) -> Value {
    let joined = texts.join("\n");
    serde_json::from_str(&joined).unwrap_or(Value::String(joined))
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn get_tools(&self, apps: Option<Vec<String>>) -> Result<Vec<ToolDeclaration>> {
        let tools = self.client.list_all_tools().await?;
        tools
            .into_iter()
            .filter(|tool| match &apps {
                Some(apps) if !apps.is_empty() => belongs_to_any(&tool.name, apps),
                _ => true,
            })
            .map(to_declaration)
            .collect()
    }

    async fn execute(&self, name: &str, params: ToolArguments) -> Result<Value> {
        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(params),
            })
            .await?;

        let texts: Vec<String> = result
            .content
            .unwrap_or_default()
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect();

        if result.is_error == Some(true) {
            return Err(anyhow!("{}", texts.join("\n")));
        }
        Ok(text_to_value(texts))
    }
}
