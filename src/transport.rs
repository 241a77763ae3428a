//! # AI Transport Seam
//!
//! The gateway never opens the upstream AI connection itself; it emits
//! `ClientEvent`s into an `EventSink` and receives `ServerEvent`s through
//! the session handler. A production deployment plugs a real streaming
//! connector into this seam; tests plug in a recording sink.

use crate::session::events::ClientEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound half of the AI connection.
///
/// `send` must not block the caller; implementations queue internally.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ClientEvent) -> Result<(), String>;
}

/// `EventSink` backed by an unbounded tokio channel.
///
/// The consumer half is handed to whatever task owns the upstream
/// connection; once that task drops the receiver, further sends fail and the
/// session winds down.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSink for ChannelSink {
    fn send(&self, event: ClientEvent) -> Result<(), String> {
        debug!("Forwarding {} event upstream", event.name());
        self.tx
            .send(event)
            .map_err(|e| format!("AI transport closed: {}", e))
    }
}

/// Create a connected sink/receiver pair.
pub fn channel_sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { tx }), rx)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every event for assertions.
    pub struct RecordingSink {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        pub fn events(&self) -> Vec<ClientEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn event_names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, event: ClientEvent) -> Result<(), String> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::{ContentEnd, ContentStart};

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = channel_sink();
        sink.send(ClientEvent::ContentStart(ContentStart::audio("p", "c")))
            .unwrap();
        sink.send(ClientEvent::ContentEnd(ContentEnd {
            prompt_name: "p".into(),
            content_name: "c".into(),
        }))
        .unwrap();

        assert_eq!(rx.try_recv().unwrap().name(), "contentStart");
        assert_eq!(rx.try_recv().unwrap().name(), "contentEnd");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_fails_after_receiver_dropped() {
        let (sink, rx) = channel_sink();
        drop(rx);
        let result = sink.send(ClientEvent::SessionEnd {});
        assert!(result.is_err());
    }
}
