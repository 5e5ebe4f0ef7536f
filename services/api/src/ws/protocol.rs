//! Defines the WebSocket message protocol between the browser client and the relay.

use liverelay_core::ToolOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session options. This must be the first message.
    Config {
        #[serde(default)]
        config: Value,
    },
    /// Base64 PCM audio from the microphone.
    Audio { data: String },
    /// A base64 JPEG frame from the camera or a screen share.
    Image { data: String },
    /// A typed user message.
    Text { data: String },
}

const KNOWN_TYPES: [&str; 4] = ["config", "audio", "image", "text"];

/// Why a client frame could not be used. Neither case ends the session.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("Malformed client frame: {0}")]
    Malformed(String),
    #[error("Unknown client frame type: {0}")]
    UnknownType(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::Malformed("missing `type` field".to_string()))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(FrameError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Model text output.
    Text { text: String },
    /// A chunk of model audio (base64 PCM).
    Audio { data: String },
    /// The model asked for a tool to be run.
    ToolCall { data: ToolCallData },
    /// A tool finished successfully.
    ToolResult { data: Value },
    /// A tool failed.
    ToolError { error: String },
    /// The model finished its turn.
    TurnComplete { data: bool },
    /// Reports a fatal error to the client.
    Error { message: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolCallData {
    pub name: String,
    pub parameters: Value,
}

impl ServerMessage {
    pub fn turn_complete() -> Self {
        Self::TurnComplete { data: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The client notification for a finished tool call.
    pub fn from_outcome(outcome: &ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Success(data) => Self::ToolResult { data: data.clone() },
            ToolOutcome::Error { message } => Self::ToolError {
                error: message.clone(),
            },
        }
    }
}
