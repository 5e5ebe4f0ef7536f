//! Per-session configuration sent by the browser as its first frame.
//!
//! Every recognized option is an explicit field with a default; unknown keys in
//! the incoming JSON are ignored by serde rather than carried along.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// The model used when the client does not ask for a specific one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_TEMPERATURE: f64 = 0.6;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly AI Assistant...";

/// The interaction mode the browser is currently in.
///
/// Any mode that streams media from the user also expects spoken replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    #[default]
    Text,
    Audio,
    Camera,
    Screen,
}

impl InteractionMode {
    /// Whether the model should be asked for audio output in this mode.
    pub fn wants_audio(self) -> bool {
        matches!(self, Self::Audio | Self::Camera | Self::Screen)
    }
}

/// Options for constraining the model to structured (e.g. JSON) output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StructuredOutputConfig {
    pub enabled: bool,
    /// Output format tag, e.g. `json`.
    pub format: String,
    /// Schema as raw text. It is parsed when the setup frame is built.
    pub schema: Option<String>,
    pub strict: bool,
}

impl Default for StructuredOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: "json".to_string(),
            schema: None,
            strict: true,
        }
    }
}

/// Everything the relay needs to open an upstream session for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub system_prompt: String,
    pub voice: String,
    #[serde(alias = "currentMode", deserialize_with = "lenient_mode")]
    pub mode: InteractionMode,
    #[serde(deserialize_with = "lenient_temperature")]
    pub temperature: f64,
    pub model_id: String,
    pub allow_interruptions: bool,
    pub tool_usage: bool,
    pub function_calling: bool,
    pub auto_function_response: bool,
    pub google_search: bool,
    pub code_execution: bool,
    pub structured_output: StructuredOutputConfig,
    /// Tool declarations supplied by the client, already in upstream format.
    pub tools: Option<Vec<serde_json::Value>>,
    /// Apps whose tools should be resolved server-side when `tools` is empty.
    pub apps: Option<Vec<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            mode: InteractionMode::Text,
            temperature: DEFAULT_TEMPERATURE,
            model_id: DEFAULT_MODEL.to_string(),
            allow_interruptions: false,
            tool_usage: true,
            function_calling: true,
            auto_function_response: true,
            google_search: false,
            code_execution: false,
            structured_output: StructuredOutputConfig::default(),
            tools: None,
            apps: None,
        }
    }
}

impl SessionConfig {
    /// True when tool declarations will be sent in the setup frame.
    pub fn has_tools(&self) -> bool {
        self.tool_usage && self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    /// True when the relay should ask the tool executor for declarations.
    pub fn needs_tool_resolution(&self) -> bool {
        self.tool_usage
            && !self.has_tools()
            && self.apps.as_ref().is_some_and(|apps| !apps.is_empty())
    }
}

/// Accepts a number or a numeric string. Anything else falls back to the
/// default temperature.
fn lenient_temperature<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(temperature) if temperature.is_finite() => Ok(temperature),
        _ => {
            warn!(%value, "Unusable temperature in session config. Using the default.");
            Ok(DEFAULT_TEMPERATURE)
        }
    }
}

/// Unknown or missing modes fall back to text.
fn lenient_mode<'de, D>(deserializer: D) -> Result<InteractionMode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let normalized = match &value {
        Value::String(text) => Value::String(text.trim().to_lowercase()),
        other => other.clone(),
    };
    match serde_json::from_value::<InteractionMode>(normalized) {
        Ok(mode) => Ok(mode),
        Err(_) => {
            warn!(%value, "Unknown interaction mode in session config. Using text.");
            Ok(InteractionMode::Text)
        }
    }
}
