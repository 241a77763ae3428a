//! # Session Event Handler
//!
//! Reacts to every event the AI service sends during one call: queues AI
//! speech for telephone playback, dispatches tool invocations and answers
//! them in the strict content order the protocol requires, and runs the
//! session lifecycle (greeting at start, error sound and trace flush on
//! failure, trace flush on completion).

use crate::audio::relay_queue::AudioRelayQueue;
use crate::session::events::{
    ClientEvent, ContentEnd, ContentStart, ServerEvent, ToolResult, ROLE_TOOL,
};
use crate::tools::{ToolInvocation, ToolRouter};
use crate::trace::CallTracer;
use crate::transport::EventSink;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-call event handler. Shared between the media layer and the task that
/// drains the AI connection, hence `&self` methods throughout.
pub struct SessionEventHandler {
    prompt_name: String,
    sink: Arc<dyn EventSink>,
    relay: Arc<AudioRelayQueue>,
    router: ToolRouter,
    tracer: Option<Arc<CallTracer>>,
    greeting_file: Option<PathBuf>,
    error_file: Option<PathBuf>,
    played_error_sound: AtomicBool,
    /// Raw PCM16 dump of AI speech, opened lazily when debugging is on.
    ai_audio_dump: Mutex<Option<File>>,
    dump_path: Option<PathBuf>,
}

impl SessionEventHandler {
    pub fn new(
        prompt_name: &str,
        sink: Arc<dyn EventSink>,
        relay: Arc<AudioRelayQueue>,
        router: ToolRouter,
        tracer: Option<Arc<CallTracer>>,
    ) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            sink,
            relay,
            router,
            tracer,
            greeting_file: None,
            error_file: None,
            played_error_sound: AtomicBool::new(false),
            ai_audio_dump: Mutex::new(None),
            dump_path: None,
        }
    }

    /// Configure the greeting played when the session opens.
    pub fn with_greeting(mut self, path: Option<PathBuf>) -> Self {
        self.greeting_file = path;
        self
    }

    /// Configure the apology sound played on a session error.
    pub fn with_error_sound(mut self, path: Option<PathBuf>) -> Self {
        self.error_file = path;
        self
    }

    /// Dump decoded AI speech to a raw PCM file for offline inspection.
    pub fn with_audio_dump(mut self, path: Option<PathBuf>) -> Self {
        self.dump_path = path;
        self
    }

    /// Dispatch one inbound event.
    ///
    /// Most events cannot fail; a tool-use whose result cannot be sent back
    /// surfaces an error so the caller can wind the session down.
    pub fn handle(&self, event: ServerEvent) -> Result<(), String> {
        debug!("Session event: {}", event.name());
        match event {
            ServerEvent::CompletionStart { prompt_name, .. } => {
                info!(prompt = ?prompt_name, "AI completion started");
                Ok(())
            }
            ServerEvent::ContentStart {
                content_type, role, ..
            } => {
                debug!(content_type = ?content_type, role = ?role, "AI content block opened");
                Ok(())
            }
            ServerEvent::TextOutput { content, role } => {
                if let Some(text) = content {
                    info!(role = ?role, "AI text: {}", text);
                }
                Ok(())
            }
            ServerEvent::AudioOutput { content, .. } => {
                self.handle_audio_output(content);
                Ok(())
            }
            ServerEvent::ContentEnd { stop_reason, .. } => {
                debug!(stop_reason = ?stop_reason, "AI content block closed");
                Ok(())
            }
            ServerEvent::CompletionEnd { stop_reason } => {
                info!(stop_reason = ?stop_reason, "AI completion finished");
                Ok(())
            }
            ServerEvent::ToolUse {
                tool_use_id,
                tool_name,
                content,
            } => self.handle_tool_use(tool_use_id, tool_name, content),
        }
    }

    /// Decode an audio chunk and queue it for telephone playback.
    ///
    /// Malformed base64 is logged and the chunk dropped; one bad chunk must
    /// not end the call.
    fn handle_audio_output(&self, content: Option<String>) {
        let content = match content {
            Some(c) if !c.is_empty() => c,
            _ => {
                debug!("Empty audio output event, ignoring");
                return;
            }
        };
        match BASE64.decode(&content) {
            Ok(pcm) => {
                self.dump_ai_audio(&pcm);
                self.relay.push(pcm);
            }
            Err(e) => warn!("Dropping undecodable audio chunk: {}", e),
        }
    }

    /// Answer a tool invocation with the mandatory three-event sequence:
    /// tool content start, tool result, content end.
    fn handle_tool_use(
        &self,
        tool_use_id: Option<String>,
        tool_name: Option<String>,
        content: Option<String>,
    ) -> Result<(), String> {
        let (tool_use_id, tool_name) = match (tool_use_id, tool_name) {
            (Some(id), Some(name)) => (id, name),
            _ => {
                warn!("Tool use event missing id or name, skipping");
                return Ok(());
            }
        };

        let invocation = ToolInvocation {
            tool_use_id: tool_use_id.clone(),
            tool_name,
            input_content: content.unwrap_or_default(),
        };
        let output = self.router.dispatch(&invocation);
        let result_json = serde_json::to_string(&output)
            .map_err(|e| format!("Could not serialize tool result: {}", e))?;

        // A fresh content name per result; reusing one is a protocol error.
        let content_name = Uuid::new_v4().to_string();
        self.sink
            .send(ClientEvent::ContentStart(ContentStart::tool_result(
                &self.prompt_name,
                &content_name,
                &tool_use_id,
            )))?;
        self.sink.send(ClientEvent::ToolResult(ToolResult {
            prompt_name: self.prompt_name.clone(),
            content_name: content_name.clone(),
            role: ROLE_TOOL.to_string(),
            content: result_json,
        }))?;
        self.sink.send(ClientEvent::ContentEnd(ContentEnd {
            prompt_name: self.prompt_name.clone(),
            content_name,
        }))
    }

    /// Session opened: play the greeting so the caller hears something
    /// before the AI produces its first audio.
    pub fn on_start(&self) {
        info!("Session started");
        if let Some(path) = self.greeting_file.clone() {
            if let Err(e) = self.play_audio_file(&path) {
                warn!("Could not play greeting {}: {}", path.display(), e);
            }
        }
    }

    /// Session failed: persist the trace and play the apology sound, each at
    /// most once, then stop playback.
    pub fn on_error(&self, message: &str) {
        error!("Session error: {}", message);
        if let Some(tracer) = &self.tracer {
            tracer.record("error", message);
            tracer.flush();
        }

        if !self.played_error_sound.load(Ordering::SeqCst) {
            if let Some(path) = self.error_file.clone() {
                match self.play_audio_file(&path) {
                    Ok(()) => {
                        self.played_error_sound.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!("Could not play error sound {}: {}", path.display(), e),
                }
            }
        }
        self.relay.close();
    }

    /// Session finished normally: persist the trace and end playback.
    pub fn on_complete(&self) {
        info!("Session complete");
        if let Some(tracer) = &self.tracer {
            tracer.flush();
        }
        self.relay.close();
    }

    /// Queue a WAV file for telephone playback.
    ///
    /// Files must already be 8 kHz mono PCM16; anything else is rejected so a
    /// misconfigured asset is caught loudly instead of playing garbled.
    fn play_audio_file(&self, path: &Path) -> Result<(), String> {
        let mut file =
            File::open(path).map_err(|e| format!("open {}: {}", path.display(), e))?;
        let (header, data) =
            wav::read(&mut file).map_err(|e| format!("parse {}: {}", path.display(), e))?;

        if header.sampling_rate != 8000 || header.channel_count != 1 {
            return Err(format!(
                "unsupported format {} Hz / {} ch, need 8000 Hz mono",
                header.sampling_rate, header.channel_count
            ));
        }
        let samples = match data {
            wav::BitDepth::Sixteen(samples) => samples,
            other => return Err(format!("unsupported bit depth {:?}, need 16-bit", other)),
        };

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        info!(
            "Queueing {} ({} PCM bytes) for playback",
            path.display(),
            bytes.len()
        );
        for frame in bytes.chunks(self.relay.frame_size()) {
            self.relay.push(frame.to_vec());
        }
        Ok(())
    }

    fn dump_ai_audio(&self, pcm: &[u8]) {
        let path = match &self.dump_path {
            Some(path) => path,
            None => return,
        };
        let mut guard = self.ai_audio_dump.lock().unwrap();
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!("Could not open audio dump {}: {}", path.display(), e);
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(pcm) {
                warn!("Audio dump write failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CallContext;
    use crate::transport::testing::RecordingSink;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_handler() -> (Arc<SessionEventHandler>, Arc<RecordingSink>, Arc<AudioRelayQueue>) {
        let sink = RecordingSink::new();
        let relay = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let router = ToolRouter::new(None)
            .with(Arc::new(crate::tools::datetime::DateTimeResolver::new()));
        let handler = Arc::new(SessionEventHandler::new(
            "prompt-1",
            sink.clone(),
            relay.clone(),
            router,
            None,
        ));
        (handler, sink, relay)
    }

    fn tracer_in(dir: PathBuf) -> Arc<CallTracer> {
        let ctx = CallContext::new("call-x", "100", "200", "test", HashMap::new());
        Arc::new(CallTracer::new(&ctx, dir))
    }

    #[test]
    fn test_audio_output_queued_for_playback() {
        let (handler, _sink, relay) = test_handler();
        let pcm = vec![1u8, 2, 3, 4];
        handler
            .handle(ServerEvent::AudioOutput {
                content: Some(BASE64.encode(&pcm)),
                role: None,
            })
            .unwrap();
        assert_eq!(relay.pop(), Some(pcm));
    }

    #[test]
    fn test_bad_base64_dropped_without_error() {
        let (handler, _sink, relay) = test_handler();
        handler
            .handle(ServerEvent::AudioOutput {
                content: Some("!!not base64!!".into()),
                role: None,
            })
            .unwrap();
        assert_eq!(relay.size(), 0);
    }

    #[test]
    fn test_tool_use_answers_in_strict_order() {
        let (handler, sink, _relay) = test_handler();
        handler
            .handle(ServerEvent::ToolUse {
                tool_use_id: Some("use-7".into()),
                tool_name: Some("getDateTool".into()),
                content: Some("{}".into()),
            })
            .unwrap();

        assert_eq!(
            sink.event_names(),
            vec!["contentStart", "toolResult", "contentEnd"]
        );
        let events = sink.events();
        let (start_name, result_name, end_name) = match (&events[0], &events[1], &events[2]) {
            (
                ClientEvent::ContentStart(start),
                ClientEvent::ToolResult(result),
                ClientEvent::ContentEnd(end),
            ) => {
                assert_eq!(start.content_type, "TOOL");
                assert!(!start.interactive);
                assert_eq!(
                    start
                        .tool_result_input_configuration
                        .as_ref()
                        .unwrap()
                        .tool_use_id,
                    "use-7"
                );
                assert_eq!(result.role, "TOOL");
                assert!(result.content.contains("date"));
                (
                    start.content_name.clone(),
                    result.content_name.clone(),
                    end.content_name.clone(),
                )
            }
            _ => panic!("unexpected event shapes"),
        };
        assert_eq!(start_name, result_name);
        assert_eq!(result_name, end_name);
    }

    #[test]
    fn test_tool_use_missing_fields_skipped() {
        let (handler, sink, _relay) = test_handler();
        handler
            .handle(ServerEvent::ToolUse {
                tool_use_id: None,
                tool_name: Some("getDateTool".into()),
                content: None,
            })
            .unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_on_complete_flushes_trace_and_closes_relay() {
        let dir = std::env::temp_dir().join(format!("handler-{}", Uuid::new_v4()));
        let tracer = tracer_in(dir.clone());
        let sink = RecordingSink::new();
        let relay = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let handler = SessionEventHandler::new(
            "prompt-1",
            sink,
            relay.clone(),
            ToolRouter::new(Some(tracer.clone())),
            Some(tracer),
        );

        handler.on_complete();
        assert!(relay.is_closed());
        assert!(dir.join("call-x.txt").exists());
    }

    #[test]
    fn test_on_error_then_complete_flushes_once() {
        let dir = std::env::temp_dir().join(format!("handler-{}", Uuid::new_v4()));
        let tracer = tracer_in(dir.clone());
        let sink = RecordingSink::new();
        let relay = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let handler = SessionEventHandler::new(
            "prompt-1",
            sink,
            relay.clone(),
            ToolRouter::new(Some(tracer.clone())),
            Some(tracer),
        );

        handler.on_error("upstream reset");
        handler.on_complete();

        let body = std::fs::read_to_string(dir.join("call-x.txt")).unwrap();
        assert!(body.contains(":error:upstream reset"));
        assert_eq!(body.matches("end_time").count(), 1);
    }

    #[test]
    fn test_on_complete_then_error_flushes_once() {
        let dir = std::env::temp_dir().join(format!("handler-{}", Uuid::new_v4()));
        let tracer = tracer_in(dir.clone());
        let sink = RecordingSink::new();
        let relay = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let handler = SessionEventHandler::new(
            "prompt-1",
            sink,
            relay.clone(),
            ToolRouter::new(Some(tracer.clone())),
            Some(tracer),
        );

        handler.on_complete();
        handler.on_error("late upstream reset");

        let body = std::fs::read_to_string(dir.join("call-x.txt")).unwrap();
        assert_eq!(body.matches("end_time").count(), 1);
        // The trace was already final; the late error never reaches the file.
        assert!(!body.contains("late upstream reset"));
    }

    #[test]
    fn test_missing_greeting_is_not_fatal() {
        let sink = RecordingSink::new();
        let relay = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let handler = SessionEventHandler::new(
            "prompt-1",
            sink,
            relay.clone(),
            ToolRouter::new(None),
            None,
        )
        .with_greeting(Some(PathBuf::from("/nonexistent/hello.wav")));

        handler.on_start();
        assert_eq!(relay.size(), 0);
        assert!(!relay.is_closed());
    }
}
