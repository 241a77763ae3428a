//! # Caller Audio Publisher
//!
//! Turns raw u-law frames from the telephone leg into audio-input events for
//! the AI session, and implements barge-in: every caller frame that arrives
//! while AI audio is still queued for playback clears that queue first, so
//! the assistant stops "talking over" a caller who has started speaking.
//!
//! The voice-activity judgment itself belongs to the AI service; this layer
//! clears unconditionally on any inbound frame while the playback queue is
//! non-empty. Frames are small (20 ms), so the worst case is one extra clear
//! of an already-empty queue per frame.

use super::relay_queue::AudioRelayQueue;
use super::transcode;
use crate::session::events::{AudioInput, ClientEvent, ContentEnd, ContentStart, ROLE_USER};
use crate::transport::EventSink;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Publishes caller audio into the session's single long-lived audio content
/// block. Owned by the media connection; not shared across threads.
pub struct AudioInputPublisher {
    sink: Arc<dyn EventSink>,
    prompt_name: String,
    content_name: String,
    /// The content block is opened lazily on the first frame.
    start_sent: bool,
    closed: bool,
    playback: Arc<AudioRelayQueue>,
}

impl AudioInputPublisher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        prompt_name: &str,
        playback: Arc<AudioRelayQueue>,
    ) -> Self {
        Self {
            sink,
            prompt_name: prompt_name.to_string(),
            content_name: Uuid::new_v4().to_string(),
            start_sent: false,
            closed: false,
            playback,
        }
    }

    /// Forward one u-law frame from the caller.
    ///
    /// Clears any queued AI playback first (barge-in), opens the audio
    /// content block on the first frame, then transcodes to PCM16 and sends
    /// a base64 audio-input event.
    pub fn write(&mut self, ulaw: &[u8]) -> Result<(), String> {
        if self.closed {
            return Err("Audio input already closed".to_string());
        }

        if self.playback.size() > 0 {
            let discarded = self.playback.clear();
            info!(
                "Caller interruption: cleared {} queued AI audio chunks",
                discarded
            );
        }

        if !self.start_sent {
            debug!("Opening audio content block {}", self.content_name);
            self.sink.send(ClientEvent::ContentStart(ContentStart::audio(
                &self.prompt_name,
                &self.content_name,
            )))?;
            self.start_sent = true;
        }

        let pcm = transcode::ulaw_to_pcm_bytes(ulaw);
        self.sink.send(ClientEvent::AudioInput(AudioInput {
            prompt_name: self.prompt_name.clone(),
            content_name: self.content_name.clone(),
            role: ROLE_USER.to_string(),
            content: BASE64.encode(pcm),
        }))
    }

    /// Close the audio block and signal end of the client stream.
    ///
    /// Safe to call more than once; only the first close emits events.
    pub fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.start_sent {
            self.sink.send(ClientEvent::ContentEnd(ContentEnd {
                prompt_name: self.prompt_name.clone(),
                content_name: self.content_name.clone(),
            }))?;
        }
        self.sink.send(ClientEvent::PromptEnd {
            prompt_name: self.prompt_name.clone(),
        })?;
        self.sink.send(ClientEvent::SessionEnd {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingSink;
    use std::time::Duration;

    fn publisher_with_sink() -> (AudioInputPublisher, Arc<RecordingSink>, Arc<AudioRelayQueue>) {
        let sink = RecordingSink::new();
        let playback = Arc::new(AudioRelayQueue::new(320, Duration::from_millis(20)));
        let publisher = AudioInputPublisher::new(sink.clone(), "prompt-1", playback.clone());
        (publisher, sink, playback)
    }

    #[test]
    fn test_first_write_opens_content_block_once() {
        let (mut publisher, sink, _playback) = publisher_with_sink();
        publisher.write(&[0xFFu8; 160]).unwrap();
        publisher.write(&[0xFFu8; 160]).unwrap();

        assert_eq!(
            sink.event_names(),
            vec!["contentStart", "audioInput", "audioInput"]
        );
    }

    #[test]
    fn test_write_transcodes_and_encodes() {
        let (mut publisher, sink, _playback) = publisher_with_sink();
        publisher.write(&[0x00u8, 0x80]).unwrap();

        let events = sink.events();
        match &events[1] {
            ClientEvent::AudioInput(input) => {
                assert_eq!(input.role, "USER");
                let pcm = BASE64.decode(&input.content).unwrap();
                // Two u-law bytes become two PCM16 samples.
                assert_eq!(pcm, transcode::ulaw_to_pcm_bytes(&[0x00, 0x80]));
            }
            other => panic!("expected audioInput, got {}", other.name()),
        }
    }

    #[test]
    fn test_caller_frame_clears_queued_playback() {
        let (mut publisher, _sink, playback) = publisher_with_sink();
        playback.push(vec![1; 320]);
        playback.push(vec![2; 320]);

        publisher.write(&[0xFFu8; 160]).unwrap();
        assert_eq!(playback.size(), 0);
    }

    #[test]
    fn test_no_clear_when_queue_empty() {
        let (mut publisher, _sink, playback) = publisher_with_sink();
        publisher.write(&[0xFFu8; 160]).unwrap();
        assert_eq!(playback.size(), 0);
        // Queued audio after the frame stays queued.
        playback.push(vec![3; 320]);
        assert_eq!(playback.size(), 320);
    }

    #[test]
    fn test_close_ends_block_and_stream() {
        let (mut publisher, sink, _playback) = publisher_with_sink();
        publisher.write(&[0xFFu8; 160]).unwrap();
        publisher.close().unwrap();
        publisher.close().unwrap();

        assert_eq!(
            sink.event_names(),
            vec![
                "contentStart",
                "audioInput",
                "contentEnd",
                "promptEnd",
                "sessionEnd"
            ]
        );
        assert!(publisher.write(&[0xFF]).is_err());
    }

    #[test]
    fn test_close_without_writes_skips_content_end() {
        let (mut publisher, sink, _playback) = publisher_with_sink();
        publisher.close().unwrap();
        assert_eq!(sink.event_names(), vec!["promptEnd", "sessionEnd"]);
    }
}
