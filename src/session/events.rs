//! # Streaming Session Wire Events
//!
//! Serde types for the bidirectional event protocol spoken with the AI
//! streaming service. Outbound (`ClientEvent`) and inbound (`ServerEvent`)
//! frames share the same envelope: a single-key `event` object whose key is
//! the camelCase event name.
//!
//! ```json
//! {"event": {"audioInput": {"promptName": "...", "content": "..."}}}
//! ```
//!
//! Inbound fields that the service may omit are `Option`s; the session
//! handler logs and skips frames missing something it needs rather than
//! failing the call.

use crate::tools::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Audio the gateway sends to the AI: 8 kHz mono PCM16, base64 framed.
pub const INPUT_SAMPLE_RATE: u32 = 8000;
pub const SAMPLE_SIZE_BITS: u32 = 16;
pub const CHANNEL_COUNT: u32 = 1;

pub const MEDIA_TYPE_TEXT: &str = "text/plain";
pub const MEDIA_TYPE_AUDIO: &str = "audio/lpcm";
pub const MEDIA_TYPE_JSON: &str = "application/json";

pub const AUDIO_ENCODING: &str = "base64";
pub const AUDIO_TYPE_SPEECH: &str = "SPEECH";

pub const ROLE_SYSTEM: &str = "SYSTEM";
pub const ROLE_USER: &str = "USER";
pub const ROLE_TOOL: &str = "TOOL";

/// Sampling parameters for the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputConfiguration {
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub encoding: String,
    pub audio_type: String,
}

impl AudioInputConfiguration {
    /// The fixed telephone-side input format.
    pub fn telephone() -> Self {
        Self {
            media_type: MEDIA_TYPE_AUDIO.to_string(),
            sample_rate_hertz: INPUT_SAMPLE_RATE,
            sample_size_bits: SAMPLE_SIZE_BITS,
            channel_count: CHANNEL_COUNT,
            encoding: AUDIO_ENCODING.to_string(),
            audio_type: AUDIO_TYPE_SPEECH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseOutputConfiguration {
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolConfiguration {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: TextOutputConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    pub tool_use_output_configuration: ToolUseOutputConfiguration,
    pub tool_configuration: ToolConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputConfiguration {
    pub media_type: String,
}

/// Links a tool result content block back to the invocation it answers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub text_input_configuration: TextInputConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub interactive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<TextInputConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
}

impl ContentStart {
    /// Text block carrying the system prompt.
    pub fn text(prompt_name: &str, content_name: &str, role: &str) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: "TEXT".to_string(),
            interactive: true,
            role: Some(role.to_string()),
            text_input_configuration: Some(TextInputConfiguration {
                media_type: MEDIA_TYPE_TEXT.to_string(),
            }),
            audio_input_configuration: None,
            tool_result_input_configuration: None,
        }
    }

    /// The single long-lived caller audio block.
    pub fn audio(prompt_name: &str, content_name: &str) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: "AUDIO".to_string(),
            interactive: true,
            role: Some(ROLE_USER.to_string()),
            text_input_configuration: None,
            audio_input_configuration: Some(AudioInputConfiguration::telephone()),
            tool_result_input_configuration: None,
        }
    }

    /// Non-interactive block wrapping one tool result.
    pub fn tool_result(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: "TOOL".to_string(),
            interactive: false,
            role: Some(ROLE_TOOL.to_string()),
            text_input_configuration: None,
            audio_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.to_string(),
                content_type: "TEXT".to_string(),
                text_input_configuration: TextInputConfiguration {
                    media_type: MEDIA_TYPE_TEXT.to_string(),
                },
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub prompt_name: String,
    pub content_name: String,
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInput {
    pub prompt_name: String,
    pub content_name: String,
    pub role: String,
    /// Base64-encoded little-endian PCM16.
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub prompt_name: String,
    pub content_name: String,
    pub role: String,
    /// The resolver's output map, serialized to a JSON string.
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnd {
    pub prompt_name: String,
    pub content_name: String,
}

/// Every event the gateway can send to the AI service.
///
/// Externally tagged with camelCase names, so a variant serializes to the
/// inner object of the wire envelope; `to_frame` adds the `event` wrapper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    SessionStart {
        inference_configuration: InferenceConfiguration,
    },
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    TextInput(TextInput),
    AudioInput(AudioInput),
    ToolResult(ToolResult),
    ContentEnd(ContentEnd),
    #[serde(rename_all = "camelCase")]
    PromptEnd { prompt_name: String },
    SessionEnd {},
}

impl ClientEvent {
    /// Wrap the event in the `{"event": {...}}` envelope.
    pub fn to_frame(&self) -> Value {
        json!({ "event": self })
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SessionStart { .. } => "sessionStart",
            ClientEvent::PromptStart(_) => "promptStart",
            ClientEvent::ContentStart(_) => "contentStart",
            ClientEvent::TextInput(_) => "textInput",
            ClientEvent::AudioInput(_) => "audioInput",
            ClientEvent::ToolResult(_) => "toolResult",
            ClientEvent::ContentEnd(_) => "contentEnd",
            ClientEvent::PromptEnd { .. } => "promptEnd",
            ClientEvent::SessionEnd {} => "sessionEnd",
        }
    }
}

/// Inbound envelope: `{"event": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEventFrame {
    pub event: ServerEvent,
}

/// Every event the AI service can send to the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    CompletionStart {
        prompt_name: Option<String>,
        completion_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ContentStart {
        content_id: Option<String>,
        #[serde(rename = "type")]
        content_type: Option<String>,
        role: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TextOutput {
        content: Option<String>,
        role: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AudioOutput {
        /// Base64-encoded PCM16 speech.
        content: Option<String>,
        role: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ContentEnd {
        content_id: Option<String>,
        stop_reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CompletionEnd { stop_reason: Option<String> },
    #[serde(rename_all = "camelCase")]
    ToolUse {
        tool_use_id: Option<String>,
        tool_name: Option<String>,
        content: Option<String>,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::CompletionStart { .. } => "completionStart",
            ServerEvent::ContentStart { .. } => "contentStart",
            ServerEvent::TextOutput { .. } => "textOutput",
            ServerEvent::AudioOutput { .. } => "audioOutput",
            ServerEvent::ContentEnd { .. } => "contentEnd",
            ServerEvent::CompletionEnd { .. } => "completionEnd",
            ServerEvent::ToolUse { .. } => "toolUse",
        }
    }
}
