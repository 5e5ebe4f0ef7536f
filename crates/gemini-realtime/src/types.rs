//! Wire types for the Gemini Live bidirectional streaming API.
//!
//! Outgoing frames use the snake_case field names the service accepts on
//! input. Incoming frames are camelCase and every field is optional: a frame
//! may carry any subset of model output, tool calls and turn signals.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUDIO_MIME_TYPE: &str = "audio/pcm";
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

// --- Client -> upstream ---

/// A frame sent to the upstream service.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Base64 PCM audio from the user.
    pub fn audio(data: String) -> Self {
        Self::media(data, AUDIO_MIME_TYPE)
    }

    /// A base64 JPEG frame from the user's camera or screen.
    pub fn image(data: String) -> Self {
        Self::media(data, IMAGE_MIME_TYPE)
    }

    fn media(data: String, mime_type: &str) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                data,
                mime_type: mime_type.to_string(),
            }],
        })
    }

    /// A complete user text turn.
    pub fn user_text(text: String) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![Part::Text { text }],
            }],
            turn_complete: true,
        })
    }

    /// The result of a tool call, fed back into the conversation as a model turn.
    pub fn function_response(name: String, content: Value) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "model".to_string(),
                parts: vec![Part::FunctionResponse {
                    function_response: FunctionResponse {
                        name,
                        response: FunctionResponseBody { content },
                    },
                }],
            }],
            turn_complete: true,
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding_config: Option<GroundingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_execution_config: Option<CodeExecutionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_response_config: Option<StructuredResponseConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub temperature: f64,
    pub speech_config: SpeechConfig,
    pub allow_interruptions: bool,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub tools: Vec<Value>,
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionCallingConfig {
    pub mode: FunctionCallingMode,
    pub auto_function_response: bool,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FunctionCallingMode {
    Auto,
    None,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GroundingConfig {
    pub google_search_config: GoogleSearchConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GoogleSearchConfig {
    pub enable_search: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CodeExecutionConfig {
    pub enabled: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StructuredResponseConfig {
    pub enabled: bool,
    pub response_mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    pub strict_validation: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: FunctionResponseBody,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponseBody {
    pub content: Value,
}

// --- Upstream -> client ---

/// A frame received from the upstream service.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A model-issued request to run a tool. `args` is kept raw: it may be an
/// object or a JSON-encoded string.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// One piece of upstream output the relay acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Text(String),
    Audio(String),
    ToolCall(FunctionCall),
    TurnComplete,
}

impl UpstreamMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Splits the frame into the events it carries, in arrival order. A frame
    /// with none of them yields an empty list.
    pub fn into_events(self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        let mut turn_complete = false;

        if let Some(content) = self.server_content {
            turn_complete = content.turn_complete;
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                if let Some(blob) = part.inline_data {
                    events.push(UpstreamEvent::Audio(blob.data));
                } else if let Some(text) = part.text {
                    events.push(UpstreamEvent::Text(text));
                }
                if let Some(call) = part.function_call {
                    events.push(UpstreamEvent::ToolCall(call));
                }
            }
        }

        if let Some(tool_call) = self.tool_call {
            events.extend(tool_call.function_calls.into_iter().map(UpstreamEvent::ToolCall));
        }

        if turn_complete {
            events.push(UpstreamEvent::TurnComplete);
        }
        events
    }
}
