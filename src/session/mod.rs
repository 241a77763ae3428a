//! # AI Session Bootstrap
//!
//! Opens one streaming session per telephone call. The bootstrap emits the
//! fixed opening sequence the protocol requires:
//!
//! 1. `sessionStart` with the inference configuration
//! 2. `promptStart` with voice, output formats and the merged tool schema
//! 3. a `SYSTEM` text block carrying the client's system prompt, with
//!    per-call variables substituted
//!
//! and wires together the per-call trio: relay queue, event handler and
//! caller-audio publisher.

pub mod events;
pub mod handler;

use crate::audio::outbound::AudioInputPublisher;
use crate::audio::relay_queue::AudioRelayQueue;
use crate::tools::{template, ToolRouter};
use crate::trace::CallTracer;
use crate::transport::EventSink;
use events::{
    AudioOutputConfiguration, ClientEvent, ContentEnd, ContentStart, InferenceConfiguration,
    PromptStart, TextInput, TextOutputConfiguration, ToolConfiguration,
    ToolUseOutputConfiguration, AUDIO_ENCODING, AUDIO_TYPE_SPEECH, CHANNEL_COUNT,
    INPUT_SAMPLE_RATE, MEDIA_TYPE_AUDIO, MEDIA_TYPE_JSON, MEDIA_TYPE_TEXT, ROLE_SYSTEM,
    SAMPLE_SIZE_BITS,
};
use handler::SessionEventHandler;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Everything configurable about one session, resolved from the application
/// configuration before the call is accepted.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub voice_id: String,
    /// Telephone frame size in bytes of PCM16 (320 = 20 ms at 8 kHz).
    pub frame_size: usize,
    /// Playback read cadence, normally one frame interval.
    pub pop_timeout: Duration,
    pub greeting_file: Option<PathBuf>,
    pub error_file: Option<PathBuf>,
    pub ai_audio_dump: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
            voice_id: "en_us_matthew".to_string(),
            frame_size: 320,
            pop_timeout: Duration::from_millis(20),
            greeting_file: None,
            error_file: None,
            ai_audio_dump: None,
        }
    }
}

/// The per-call bundle produced by [`Session::start`].
pub struct Session {
    pub prompt_name: String,
    pub handler: Arc<SessionEventHandler>,
    pub publisher: AudioInputPublisher,
    pub relay: Arc<AudioRelayQueue>,
}

impl Session {
    /// Open a session: emit the bootstrap events and build the call plumbing.
    ///
    /// `system_prompt` is the raw prompt text; variables from the tracer are
    /// substituted here, once, before it goes on the wire.
    pub fn start(
        sink: Arc<dyn EventSink>,
        router: ToolRouter,
        tracer: Option<Arc<CallTracer>>,
        system_prompt: &str,
        settings: &SessionSettings,
    ) -> Result<Self, String> {
        let prompt_name = Uuid::new_v4().to_string();
        info!(prompt_name = %prompt_name, voice = %settings.voice_id, "Starting AI session");

        sink.send(ClientEvent::SessionStart {
            inference_configuration: InferenceConfiguration {
                max_tokens: settings.max_tokens,
                top_p: settings.top_p,
                temperature: settings.temperature,
            },
        })?;

        sink.send(ClientEvent::PromptStart(PromptStart {
            prompt_name: prompt_name.clone(),
            text_output_configuration: TextOutputConfiguration {
                media_type: MEDIA_TYPE_TEXT.to_string(),
            },
            audio_output_configuration: AudioOutputConfiguration {
                media_type: MEDIA_TYPE_AUDIO.to_string(),
                sample_rate_hertz: INPUT_SAMPLE_RATE,
                sample_size_bits: SAMPLE_SIZE_BITS,
                channel_count: CHANNEL_COUNT,
                voice_id: settings.voice_id.clone(),
                encoding: AUDIO_ENCODING.to_string(),
                audio_type: AUDIO_TYPE_SPEECH.to_string(),
            },
            tool_use_output_configuration: ToolUseOutputConfiguration {
                media_type: MEDIA_TYPE_JSON.to_string(),
            },
            tool_configuration: ToolConfiguration {
                tools: router.tool_configuration(),
            },
        }))?;

        let empty = HashMap::new();
        let variables = tracer
            .as_ref()
            .map(|t| t.variables())
            .unwrap_or(&empty);
        let prompt_text = template::replace_variables(system_prompt, variables);

        let content_name = Uuid::new_v4().to_string();
        sink.send(ClientEvent::ContentStart(ContentStart::text(
            &prompt_name,
            &content_name,
            ROLE_SYSTEM,
        )))?;
        sink.send(ClientEvent::TextInput(TextInput {
            prompt_name: prompt_name.clone(),
            content_name: content_name.clone(),
            role: ROLE_SYSTEM.to_string(),
            content: prompt_text,
        }))?;
        sink.send(ClientEvent::ContentEnd(ContentEnd {
            prompt_name: prompt_name.clone(),
            content_name,
        }))?;

        let relay = Arc::new(AudioRelayQueue::new(
            settings.frame_size,
            settings.pop_timeout,
        ));
        let handler = Arc::new(
            SessionEventHandler::new(&prompt_name, sink.clone(), relay.clone(), router, tracer)
                .with_greeting(settings.greeting_file.clone())
                .with_error_sound(settings.error_file.clone())
                .with_audio_dump(settings.ai_audio_dump.clone()),
        );
        let publisher = AudioInputPublisher::new(sink, &prompt_name, relay.clone());

        handler.on_start();
        Ok(Self {
            prompt_name,
            handler,
            publisher,
            relay,
        })
    }
}
