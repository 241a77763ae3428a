//! # Call Tracing
//!
//! Records structured observations for the duration of one call and persists
//! them exactly once at call termination. The trace is the offline analytics
//! artifact correlating what the caller asked for with what the AI did.
//!
//! ## Output format:
//! One entry per line, `{line_number}:{type}:{value}`:
//! ```text
//! 1:call_id:abc123
//! 2:ani:3144779261
//! 3:estado:citas
//! 4:proceso:Centro Medico Norte
//! ```
//!
//! ## Design principles:
//! - Generic: works for any client, no client-specific vocabulary
//! - Non-invasive: only observes data already flowing through the call
//! - Flush-once: `on_complete` and `on_error` may both ask for a flush,
//!   exactly one file write happens

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Immutable per-call identity bundle, created at call accept time.
///
/// `headers` carries whatever metadata the telephony provider attached to the
/// call (custom X- headers and the like); keys are stored lowercased.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: String,
    /// Caller number (ANI).
    pub ani: String,
    /// Called number (DNIS).
    pub dnis: String,
    pub client_id: String,
    pub headers: HashMap<String, String>,
}

impl CallContext {
    pub fn new(
        call_id: impl Into<String>,
        ani: impl Into<String>,
        dnis: impl Into<String>,
        client_id: impl Into<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            ani: ani.into(),
            dnis: dnis.into(),
            client_id: client_id.into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }
}

struct TraceState {
    entries: Vec<String>,
    next_line: u32,
}

/// Accumulates numbered trace entries for one call and flushes them to
/// `{output_dir}/{call_id}.txt` at most once.
///
/// Owned by one call; `record` may be called from both the media thread and
/// the session callback flow, hence the internal lock.
pub struct CallTracer {
    call_id: String,
    /// Variables available for prompt template substitution: provider headers
    /// plus the computed call identifiers.
    variables: HashMap<String, String>,
    state: Mutex<TraceState>,
    start_time: DateTime<Utc>,
    flushed: AtomicBool,
    output_dir: PathBuf,
}

impl CallTracer {
    /// Create a tracer for the given call and record the initial metadata.
    pub fn new(ctx: &CallContext, output_dir: PathBuf) -> Self {
        let mut variables = ctx.headers.clone();
        variables.insert("sip_call_id".to_string(), ctx.call_id.clone());
        variables.insert("ani".to_string(), ctx.ani.clone());
        variables.insert("dnis".to_string(), ctx.dnis.clone());
        variables.insert("client_id".to_string(), ctx.client_id.clone());

        let tracer = Self {
            call_id: ctx.call_id.clone(),
            variables,
            state: Mutex::new(TraceState {
                entries: Vec::new(),
                next_line: 1,
            }),
            start_time: Utc::now(),
            flushed: AtomicBool::new(false),
            output_dir,
        };

        tracer.record("call_id", &ctx.call_id);
        tracer.record("ani", &ctx.ani);
        tracer.record("dnis", &ctx.dnis);
        tracer.record("client_id", &ctx.client_id);
        tracer.record("start_time", &tracer.start_time.to_rfc3339());

        info!(call_id = %ctx.call_id, ani = %ctx.ani, "CallTracer initialized");
        tracer
    }

    /// Record a single `type:value` observation.
    ///
    /// Line breaks in the value are collapsed so they cannot break the
    /// one-entry-per-line format.
    pub fn record(&self, entry_type: &str, value: &str) {
        if entry_type.is_empty() {
            warn!("Skipping trace record with empty type");
            return;
        }

        let sanitized = value.replace(['\r', '\n'], " ");
        let mut state = self.state.lock().unwrap();
        let entry = format!("{}:{}:{}", state.next_line, entry_type, sanitized);
        state.next_line += 1;
        debug!("Trace recorded: {}", entry);
        state.entries.push(entry);
    }

    /// Flush the trace to disk, exactly once.
    ///
    /// The first call appends end metadata and writes the file; later calls
    /// are no-ops and return `false`. I/O failures are logged and swallowed —
    /// losing a trace must never take down an active call.
    pub fn flush(&self) -> bool {
        if self.flushed.swap(true, Ordering::SeqCst) {
            debug!(call_id = %self.call_id, "Trace already flushed, skipping");
            return false;
        }

        let end_time = Utc::now();
        self.record("end_time", &end_time.to_rfc3339());
        let duration = end_time.signed_duration_since(self.start_time);
        self.record("duration_seconds", &duration.num_seconds().to_string());

        if let Err(e) = fs::create_dir_all(&self.output_dir) {
            error!(call_id = %self.call_id, "Could not create trace directory: {}", e);
            return true;
        }

        let file = self.output_dir.join(format!("{}.txt", self.call_id));
        let state = self.state.lock().unwrap();
        let body = state.entries.join("\n");
        match fs::write(&file, body) {
            Ok(()) => info!(
                call_id = %self.call_id,
                entries = state.entries.len(),
                "Trace written to {}",
                file.display()
            ),
            Err(e) => error!(call_id = %self.call_id, "Error writing trace: {}", e),
        }
        true
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Look up a single substitution variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// All substitution variables for this call.
    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// Number of entries recorded so far.
    pub fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_context() -> CallContext {
        let mut headers = HashMap::new();
        headers.insert("X-Conversation-Id".to_string(), "conv-42".to_string());
        headers.insert("uui_monto_deuda".to_string(), "1500".to_string());
        CallContext::new("call-123", "3001234567", "6015550100", "keralty", headers)
    }

    fn temp_trace_dir() -> PathBuf {
        std::env::temp_dir().join(format!("traces-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_initial_metadata_recorded() {
        let tracer = CallTracer::new(&test_context(), temp_trace_dir());
        // call_id, ani, dnis, client_id, start_time
        assert_eq!(tracer.entry_count(), 5);
        assert_eq!(tracer.variable("ani"), Some("3001234567"));
        // Header keys are lowercased.
        assert_eq!(tracer.variable("x-conversation-id"), Some("conv-42"));
    }

    #[test]
    fn test_record_numbers_and_sanitizes() {
        let dir = temp_trace_dir();
        let tracer = CallTracer::new(&test_context(), dir.clone());
        tracer.record("estado", "citas\ncon salto");
        tracer.flush();

        let body = fs::read_to_string(dir.join("call-123.txt")).unwrap();
        assert!(body.contains("6:estado:citas con salto"));
        assert!(body.starts_with("1:call_id:call-123"));
    }

    #[test]
    fn test_flush_exactly_once() {
        let dir = temp_trace_dir();
        let tracer = CallTracer::new(&test_context(), dir.clone());

        assert!(tracer.flush());
        let first = fs::read_to_string(dir.join("call-123.txt")).unwrap();

        // Second flush is a no-op: no new end_time entries, file unchanged.
        assert!(!tracer.flush());
        let second = fs::read_to_string(dir.join("call-123.txt")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.matches("end_time").count(), 1);
    }
}
