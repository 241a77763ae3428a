//! The `endCall` tool.
//!
//! Lets the AI request call termination once the conversation has concluded.
//! Resolving the tool only raises a flag and records the request in the
//! trace; the actual hangup is performed by the media layer, which watches
//! the flag and tears the session down after the farewell audio has played.

use super::{empty_object_schema, Tool, ToolInvocation, ToolResolver};
use crate::trace::CallTracer;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct EndCallResolver {
    requested: AtomicBool,
    tracer: Option<Arc<CallTracer>>,
}

impl EndCallResolver {
    pub fn new(tracer: Option<Arc<CallTracer>>) -> Self {
        Self {
            requested: AtomicBool::new(false),
            tracer,
        }
    }

    /// Whether the AI has asked for the call to end.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl ToolResolver for EndCallResolver {
    fn tool_names(&self) -> Vec<&'static str> {
        vec!["endCall"]
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new(
            "endCall",
            "End the telephone call. Call this only after saying goodbye and \
             confirming the caller needs nothing else.",
            &empty_object_schema(),
        )]
    }

    fn resolve(&self, _invocation: &ToolInvocation, output: &mut Map<String, Value>) {
        self.requested.store(true, Ordering::SeqCst);
        info!("endCall requested by the AI");
        if let Some(tracer) = &self.tracer {
            tracer.record("call_action", "end_requested");
        }
        output.insert("success".into(), Value::Bool(true));
        output.insert(
            "message".into(),
            Value::String("The call will end after your goodbye finishes playing.".into()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_raises_flag() {
        let resolver = EndCallResolver::new(None);
        assert!(!resolver.is_requested());

        let invocation = ToolInvocation {
            tool_use_id: "use-1".into(),
            tool_name: "endCall".into(),
            input_content: "{}".into(),
        };
        let mut output = Map::new();
        resolver.resolve(&invocation, &mut output);

        assert!(resolver.is_requested());
        assert_eq!(output.get("success").unwrap(), &Value::Bool(true));
    }
}
