//! # Media WebSocket Handler
//!
//! The telephone leg of every call. A telephony connector opens one
//! WebSocket per call at `/ws/media`, announces the call with a `start`
//! control message, then streams 8 kHz u-law caller audio as binary frames.
//! AI speech flows back as binary u-law frames on the same connection.
//!
//! ## Protocol:
//! 1. **start** (JSON): call identity (call id, ANI, DNIS) plus any provider
//!    headers; opens the AI session and starts the transmitter
//! 2. **Binary frames**: caller audio, u-law, forwarded to the AI session
//! 3. **ai_event** (JSON): inbound leg of the AI transport seam; the task
//!    owning the upstream connection injects service events here
//! 4. **stop** (JSON) or socket close: tears the session down, flushing the
//!    call trace exactly once
//!
//! Outbound binary frames are paced by the relay queue's frame cadence when
//! idle; bursts of real audio are handed to the telephony peer to pace.

use crate::audio::outbound::AudioInputPublisher;
use crate::audio::transcode;
use crate::session::events::ServerEventFrame;
use crate::session::handler::SessionEventHandler;
use crate::session::Session;
use crate::state::AppState;
use crate::tools::context::ContextResolver;
use crate::tools::datetime::DateTimeResolver;
use crate::tools::end_call::EndCallResolver;
use crate::tools::ToolRouter;
use crate::trace::{CallContext, CallTracer};
use crate::transport::channel_sink;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Control messages exchanged as WebSocket text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MediaMessage {
    /// Call announcement from the telephony connector.
    #[serde(rename = "start")]
    Start {
        /// Provider call id; generated when absent.
        call_id: Option<String>,
        /// Caller number.
        #[serde(default)]
        ani: String,
        /// Called number.
        #[serde(default)]
        dnis: String,
        /// Provider headers (UUI data and the like).
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// One event from the AI service, as the full wire envelope.
    #[serde(rename = "ai_event")]
    AiEvent { event: serde_json::Value },

    /// Orderly call teardown from the connector side.
    #[serde(rename = "stop")]
    Stop {},

    /// Call status updates to the connector.
    #[serde(rename = "status")]
    Status {
        call_id: String,
        status: String,
        message: Option<String>,
    },

    /// Error messages to the connector.
    #[serde(rename = "error")]
    Error { code: String, message: String },

    /// Heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// Everything owned by one in-progress call. The relay queue and end-call
/// flag live on in the transmitter thread's clones.
struct ActiveCall {
    call_id: String,
    publisher: AudioInputPublisher,
    handler: Arc<SessionEventHandler>,
}

/// One actor per telephone connection.
pub struct MediaWebSocket {
    app_state: web::Data<AppState>,
    call: Option<ActiveCall>,
    /// Whether this connection holds a slot in the concurrent-call count.
    admitted: bool,
    last_heartbeat: Instant,
}

/// AI audio ready for the wire, already transcoded to u-law.
#[derive(Message)]
#[rtype(result = "()")]
struct OutboundAudio(Vec<u8>);

/// The relay queue closed: playback is over and the call can end.
#[derive(Message)]
#[rtype(result = "()")]
struct PlaybackEnded;

impl MediaWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            call: None,
            admitted: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &MediaMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("Media error {}: {}", code, message);
        self.send_message(
            ctx,
            &MediaMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Open the AI session and start the telephone transmitter.
    fn handle_start(
        &mut self,
        call_id: Option<String>,
        ani: String,
        dnis: String,
        headers: HashMap<String, String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.call.is_some() {
            self.send_error(ctx, "call_already_started", "This connection already has a call");
            return;
        }
        if !self.app_state.try_begin_call() {
            self.send_error(ctx, "at_capacity", "Concurrent call limit reached");
            ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Again)));
            ctx.stop();
            return;
        }
        self.admitted = true;

        let config = self.app_state.get_config();
        let call_id = call_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(call_id = %call_id, ani = %ani, dnis = %dnis, "Call starting");

        let call_context = CallContext::new(
            call_id.clone(),
            ani,
            dnis,
            config.client.client_id.clone(),
            headers,
        );
        let tracer = Arc::new(CallTracer::new(
            &call_context,
            PathBuf::from(&config.client.trace_dir),
        ));

        let end_call = Arc::new(EndCallResolver::new(Some(tracer.clone())));
        let router = ToolRouter::new(Some(tracer.clone()))
            .with(Arc::new(ContextResolver::new(
                self.app_state.catalog.clone(),
                tracer.variables().clone(),
            )))
            .with(Arc::new(DateTimeResolver::new()))
            .with(end_call.clone());

        // The upstream connector owns the receiver half; until one is
        // plugged in, events are drained here so sends never fail.
        let (sink, mut upstream_rx) = channel_sink();
        tokio::spawn(async move {
            while let Some(event) = upstream_rx.recv().await {
                debug!("Upstream event: {}", event.name());
            }
        });

        let settings = config.session_settings(&call_id);
        let session = match Session::start(
            sink,
            router,
            Some(tracer),
            config.system_prompt(self.app_state.catalog.base_prompt()),
            &settings,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!(call_id = %call_id, "Could not start AI session: {}", e);
                self.send_error(ctx, "session_error", &e);
                self.app_state.end_call();
                self.admitted = false;
                ctx.stop();
                return;
            }
        };

        debug!(call_id = %call_id, prompt = %session.prompt_name, "AI session ready");
        self.spawn_transmitter(&session, end_call.clone(), ctx);

        self.send_message(
            ctx,
            &MediaMessage::Status {
                call_id: call_id.clone(),
                status: "started".to_string(),
                message: Some("AI session established".to_string()),
            },
        );
        self.call = Some(ActiveCall {
            call_id,
            publisher: session.publisher,
            handler: session.handler,
        });
    }

    /// Dedicated thread popping PCM from the relay queue at the media
    /// cadence, transcoding to u-law, and handing frames to the actor.
    fn spawn_transmitter(
        &self,
        session: &Session,
        end_call: Arc<EndCallResolver>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let relay = session.relay.clone();
        let handler = session.handler.clone();
        let addr = ctx.address();

        std::thread::spawn(move || {
            while let Some(chunk) = relay.pop() {
                match transcode::pcm_bytes_to_ulaw(&chunk) {
                    Ok(ulaw) => addr.do_send(OutboundAudio(ulaw)),
                    Err(e) => warn!("Skipping malformed playback chunk: {}", e),
                }
                // An endCall takes effect once the farewell has drained.
                if end_call.is_requested() && relay.size() == 0 {
                    handler.on_complete();
                }
            }
            addr.do_send(PlaybackEnded);
        });
    }

    /// Inject one AI service event into the session.
    fn handle_ai_event(&mut self, event: serde_json::Value, ctx: &mut ws::WebsocketContext<Self>) {
        let call = match &self.call {
            Some(call) => call,
            None => {
                self.send_error(ctx, "no_call", "Send a start message first");
                return;
            }
        };
        match serde_json::from_value::<ServerEventFrame>(event) {
            Ok(frame) => {
                if let Err(e) = call.handler.handle(frame.event) {
                    call.handler.on_error(&e);
                }
            }
            Err(e) => self.send_error(ctx, "bad_event", &format!("Unparsable AI event: {}", e)),
        }
    }

    /// Forward one caller audio frame.
    fn handle_caller_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let failure = match &mut self.call {
            Some(call) => match call.publisher.write(data) {
                Ok(()) => None,
                Err(e) => {
                    let message = format!("Caller audio failed: {}", e);
                    call.handler.on_error(&message);
                    Some(message)
                }
            },
            None => {
                self.send_error(ctx, "no_call", "Send a start message first");
                return;
            }
        };
        if let Some(message) = failure {
            self.send_error(ctx, "audio_error", &message);
        }
    }

    /// Wind the call down. Safe to call multiple times.
    fn teardown(&mut self) {
        if let Some(call) = &mut self.call {
            info!(call_id = %call.call_id, "Call ending");
            if let Err(e) = call.publisher.close() {
                debug!("Audio input close: {}", e);
            }
            // Flushes the trace (once) and closes the relay, which in turn
            // ends the transmitter thread.
            call.handler.on_complete();
        }
        if self.admitted {
            self.app_state.end_call();
            self.admitted = false;
        }
    }
}

impl Actor for MediaWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Media connection opened");

        ctx.run_interval(Duration::from_secs(30), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(60) {
                warn!("Media heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                let ping = MediaMessage::Ping {
                    timestamp: std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                };
                if let Ok(json) = serde_json::to_string(&ping) {
                    ctx.text(json);
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Media connection closed");
        self.teardown();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<MediaMessage>(&text) {
                Ok(MediaMessage::Start {
                    call_id,
                    ani,
                    dnis,
                    headers,
                }) => self.handle_start(call_id, ani, dnis, headers, ctx),
                Ok(MediaMessage::AiEvent { event }) => self.handle_ai_event(event, ctx),
                Ok(MediaMessage::Stop {}) => {
                    self.teardown();
                }
                Ok(MediaMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(_) => warn!("Unexpected control message from connector"),
                Err(e) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", e)),
            },
            Ok(ws::Message::Binary(data)) => self.handle_caller_audio(&data, ctx),
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Media socket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!("Media socket protocol error: {}", e);
                if let Some(call) = &self.call {
                    call.handler.on_error(&format!("Media socket error: {}", e));
                }
                ctx.stop();
            }
        }
    }
}

impl Handler<OutboundAudio> for MediaWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundAudio, ctx: &mut Self::Context) {
        ctx.binary(msg.0);
    }
}

impl Handler<PlaybackEnded> for MediaWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: PlaybackEnded, ctx: &mut Self::Context) {
        if let Some(call) = &self.call {
            self.send_message(
                ctx,
                &MediaMessage::Status {
                    call_id: call.call_id.clone(),
                    status: "ended".to_string(),
                    message: None,
                },
            );
        }
        ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
        ctx.stop();
    }
}

/// HTTP endpoint upgrading to the media WebSocket.
pub async fn media_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New media connection from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(MediaWebSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_parses_with_headers() {
        let raw = r#"{
            "type": "start",
            "call_id": "abc-123",
            "ani": "3001234567",
            "dnis": "6015550100",
            "headers": {"X-Conversation-Id": "conv-9", "uui_monto_deuda": "1500"}
        }"#;
        match serde_json::from_str::<MediaMessage>(raw).unwrap() {
            MediaMessage::Start {
                call_id,
                ani,
                headers,
                ..
            } => {
                assert_eq!(call_id.as_deref(), Some("abc-123"));
                assert_eq!(ani, "3001234567");
                assert_eq!(headers["uui_monto_deuda"], "1500");
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_start_message_defaults() {
        let raw = r#"{"type": "start"}"#;
        match serde_json::from_str::<MediaMessage>(raw).unwrap() {
            MediaMessage::Start {
                call_id,
                ani,
                dnis,
                headers,
            } => {
                assert!(call_id.is_none());
                assert!(ani.is_empty());
                assert!(dnis.is_empty());
                assert!(headers.is_empty());
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_ai_event_wraps_wire_envelope() {
        let raw = r#"{"type": "ai_event", "event": {"event": {"completionEnd": {"stopReason": "END_TURN"}}}}"#;
        match serde_json::from_str::<MediaMessage>(raw).unwrap() {
            MediaMessage::AiEvent { event } => {
                let frame: ServerEventFrame = serde_json::from_value(event).unwrap();
                assert_eq!(frame.event.name(), "completionEnd");
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_status_message_serializes() {
        let msg = MediaMessage::Status {
            call_id: "c1".into(),
            status: "started".into(),
            message: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("started"));
    }
}
