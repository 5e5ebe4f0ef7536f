//! Builds the setup frame that opens every upstream session.

use crate::types::{
    ClientMessage, CodeExecutionConfig, FunctionCallingConfig, FunctionCallingMode,
    GenerationConfig, GoogleSearchConfig, GroundingConfig, Part, PrebuiltVoiceConfig,
    ResponseModality, Setup, SpeechConfig, StructuredResponseConfig, SystemInstruction,
    ToolConfig, VoiceConfig,
};
use liverelay_core::SessionConfig;
use tracing::{info, warn};

/// Builds the setup frame for a session. Each optional block is gated on its
/// own flag; a bad structured-output schema only drops the schema.
pub fn build_setup(config: &SessionConfig) -> ClientMessage {
    let mut response_modalities = vec![ResponseModality::Text];
    if config.mode.wants_audio() {
        response_modalities.push(ResponseModality::Audio);
    }

    let tool_config = match &config.tools {
        Some(tools) if config.tool_usage && !tools.is_empty() => {
            info!(count = tools.len(), "Including tools in setup.");
            Some(ToolConfig {
                tools: tools.clone(),
                function_calling_config: FunctionCallingConfig {
                    mode: if config.function_calling {
                        FunctionCallingMode::Auto
                    } else {
                        FunctionCallingMode::None
                    },
                    auto_function_response: config.auto_function_response,
                },
            })
        }
        _ => None,
    };

    let grounding_config = config.google_search.then(|| GroundingConfig {
        google_search_config: GoogleSearchConfig {
            enable_search: true,
        },
    });

    let code_execution_config = config
        .code_execution
        .then_some(CodeExecutionConfig { enabled: true });

    ClientMessage::Setup(Setup {
        model: format!("models/{}", config.model_id),
        generation_config: GenerationConfig {
            response_modalities,
            temperature: config.temperature,
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            },
            allow_interruptions: config.allow_interruptions,
        },
        system_instruction: SystemInstruction {
            parts: vec![Part::Text {
                text: config.system_prompt.clone(),
            }],
        },
        tool_config,
        grounding_config,
        code_execution_config,
        structured_response_config: structured_response_config(config),
    })
}

fn structured_response_config(config: &SessionConfig) -> Option<StructuredResponseConfig> {
    let structured = &config.structured_output;
    if !structured.enabled {
        return None;
    }

    let schema = match structured.schema.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(text) => match serde_json::from_str(text) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(error = %e, "Invalid JSON schema for structured output. Continuing without a schema.");
                None
            }
        },
        None => None,
    };

    Some(StructuredResponseConfig {
        enabled: true,
        response_mime_type: format!("application/{}", structured.format.to_lowercase()),
        schema,
        strict_validation: structured.strict,
    })
}
