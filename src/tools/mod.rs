//! # Tool Routing
//!
//! Dispatches tool invocations from the AI service to the resolver that
//! declared the tool, merges every resolver's advertised tool schema into the
//! single configuration sent at prompt start, and performs generic trace
//! extraction over inputs and outputs.
//!
//! ## Architecture:
//! One `ToolRouter` per call, built from a composable set of `ToolResolver`
//! implementations (context loader, date/time, end-call). There is no handler
//! inheritance: adding a tool means registering another resolver. Unknown
//! tool names produce a structured error in the output and never fail the
//! session.

pub mod context;
pub mod datetime;
pub mod end_call;
pub mod template;

use crate::trace::CallTracer;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output keys that represent process steps across client verticals.
///
/// Generic extraction records these into the trace as `proceso` observations.
/// This fixed list is the only vocabulary the router knows; anything
/// client-specific lives in prompt fragments, not in code.
const PROCESS_KEYS: [&str; 18] = [
    // Medical/appointment related (multi-language)
    "center",
    "centre",
    "centro",
    "centro_medico",
    "specialty",
    "especialidad",
    "speciality",
    "appointment_date",
    "fecha_cita",
    "date",
    "procedure",
    "procedimiento",
    // PQRS/complaint related
    "issue_type",
    "tipo_queja",
    "complaint_type",
    "department",
    // Generic
    "selection",
    "choice",
];

/// One tool invocation as received from the AI service.
///
/// Created on receipt of a tool-use event, populated by the routed resolver,
/// converted to a tool-result event, then discarded.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Unique id correlating this invocation with its result.
    pub tool_use_id: String,
    pub tool_name: String,
    /// Opaque serialized parameters, usually a JSON object.
    pub input_content: String,
}

/// Wire shape of one advertised tool: `{"toolSpec": {name, description, inputSchema}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// The AI service expects the JSON Schema as an embedded string, not an object.
#[derive(Debug, Clone, Serialize)]
pub struct InputSchema {
    pub json: String,
}

impl Tool {
    /// Build a tool advertisement from a schema value, serializing the schema
    /// to the embedded-string form the protocol requires.
    pub fn new(name: &str, description: &str, schema: &Value) -> Self {
        Self {
            tool_spec: ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: InputSchema {
                    // Serializing a Value cannot fail.
                    json: serde_json::to_string(schema).unwrap(),
                },
            },
        }
    }
}

/// A minimal `{"type": "object"}` schema for tools that take no parameters.
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// One member of the composable tool set.
///
/// Resolvers run synchronously on the session event flow and write their
/// result into the shared output map; errors are reported through the output
/// (`error` key), not by panicking or failing the session.
pub trait ToolResolver: Send + Sync {
    /// Tool names this resolver handles (exact-match dispatch).
    fn tool_names(&self) -> Vec<&'static str>;

    /// Tool advertisements to merge into the prompt-start configuration.
    fn tools(&self) -> Vec<Tool>;

    /// Resolve one invocation, writing the result into `output`.
    fn resolve(&self, invocation: &ToolInvocation, output: &mut Map<String, Value>);
}

/// Routes tool invocations by exact name match to the registered resolvers.
pub struct ToolRouter {
    resolvers: Vec<Arc<dyn ToolResolver>>,
    by_name: HashMap<&'static str, usize>,
    tracer: Option<Arc<CallTracer>>,
}

impl ToolRouter {
    pub fn new(tracer: Option<Arc<CallTracer>>) -> Self {
        Self {
            resolvers: Vec::new(),
            by_name: HashMap::new(),
            tracer,
        }
    }

    /// Register a resolver. Registration order fixes the advertised tool order.
    pub fn with(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        let index = self.resolvers.len();
        for name in resolver.tool_names() {
            if self.by_name.insert(name, index).is_some() {
                warn!("Tool '{}' registered twice, later resolver wins", name);
            }
        }
        self.resolvers.push(resolver);
        self
    }

    /// Every registered tool name, in registration order.
    pub fn known_tools(&self) -> Vec<&'static str> {
        self.resolvers
            .iter()
            .flat_map(|r| r.tool_names())
            .collect()
    }

    /// Merged tool schema for prompt start, recomputed on demand since the
    /// available contexts can vary by deployment.
    pub fn tool_configuration(&self) -> Vec<Tool> {
        let tools: Vec<Tool> = self.resolvers.iter().flat_map(|r| r.tools()).collect();
        debug!("Merged tool configuration: {} tools", tools.len());
        tools
    }

    /// Dispatch one invocation and return the populated output map.
    ///
    /// Unknown tool names produce an `error` entry plus the list of available
    /// tools; the session is otherwise unaffected.
    pub fn dispatch(&self, invocation: &ToolInvocation) -> Map<String, Value> {
        info!(
            tool = %invocation.tool_name,
            tool_use_id = %invocation.tool_use_id,
            "Tool invoked"
        );

        if let Some(tracer) = &self.tracer {
            tracer.record("tool", &invocation.tool_name);
        }

        let input = parse_input(&invocation.input_content);
        let mut output = Map::new();

        match self.by_name.get(invocation.tool_name.as_str()) {
            Some(&index) => {
                self.resolvers[index].resolve(invocation, &mut output);
            }
            None => {
                warn!("Unknown tool invoked: {}", invocation.tool_name);
                output.insert(
                    "error".to_string(),
                    Value::String(format!("Unknown tool: {}", invocation.tool_name)),
                );
                output.insert(
                    "availableTools".to_string(),
                    Value::Array(
                        self.known_tools()
                            .into_iter()
                            .map(|n| Value::String(n.to_string()))
                            .collect(),
                    ),
                );
            }
        }

        if self.tracer.is_some() {
            self.extract_generic(&invocation.tool_name, &input, &output);
        }

        output
    }

    /// Generic extraction of trace observations from a completed invocation.
    ///
    /// Rules:
    /// 1. `loadContext` input with a `context` field -> `estado`
    /// 2. Output with `contextLoaded: true` and a `contextType` -> `estado`
    /// 3. Known process keys in the output -> `proceso`
    /// 4. The same keys nested under an output `data` object -> `proceso`
    fn extract_generic(&self, tool_name: &str, input: &Map<String, Value>, output: &Map<String, Value>) {
        let tracer = match &self.tracer {
            Some(t) => t,
            None => return,
        };

        if tool_name == "loadContext" {
            if let Some(context) = input.get("context").and_then(Value::as_str) {
                tracer.record("estado", context);
            }
        }

        if output.get("contextLoaded").and_then(Value::as_bool) == Some(true) {
            if let Some(context_type) = output.get("contextType").and_then(Value::as_str) {
                if !context_type.is_empty() {
                    tracer.record("estado", context_type);
                }
            }
        }

        record_process_keys(tracer, output);
        if let Some(Value::Object(nested)) = output.get("data") {
            record_process_keys(tracer, nested);
        }
    }
}

fn record_process_keys(tracer: &CallTracer, map: &Map<String, Value>) {
    for key in PROCESS_KEYS {
        if let Some(value) = map.get(key) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            tracer.record("proceso", &text);
        }
    }
}

/// Parse tool input JSON leniently: anything unparsable becomes an empty map.
fn parse_input(content: &str) -> Map<String, Value> {
    if content.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            warn!("Failed to parse tool input JSON: {}", e);
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{CallContext, CallTracer};
    use std::collections::HashMap as StdHashMap;

    struct EchoResolver;

    impl ToolResolver for EchoResolver {
        fn tool_names(&self) -> Vec<&'static str> {
            vec!["echo"]
        }

        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("echo", "Echoes its input", &empty_object_schema())]
        }

        fn resolve(&self, invocation: &ToolInvocation, output: &mut Map<String, Value>) {
            output.insert(
                "echoed".to_string(),
                Value::String(invocation.input_content.clone()),
            );
        }
    }

    fn invocation(name: &str, content: &str) -> ToolInvocation {
        ToolInvocation {
            tool_use_id: "use-1".to_string(),
            tool_name: name.to_string(),
            input_content: content.to_string(),
        }
    }

    fn test_tracer() -> Arc<CallTracer> {
        let ctx = CallContext::new("call-1", "100", "200", "test", StdHashMap::new());
        Arc::new(CallTracer::new(
            &ctx,
            std::env::temp_dir().join(format!("router-{}", uuid::Uuid::new_v4())),
        ))
    }

    #[test]
    fn test_dispatch_by_exact_name() {
        let router = ToolRouter::new(None).with(Arc::new(EchoResolver));
        let output = router.dispatch(&invocation("echo", "{\"a\":1}"));
        assert_eq!(output.get("echoed").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_unknown_tool_reports_error_without_failing() {
        let router = ToolRouter::new(None).with(Arc::new(EchoResolver));
        let output = router.dispatch(&invocation("noSuchTool", "{}"));
        assert!(output.get("error").unwrap().as_str().unwrap().contains("noSuchTool"));
        assert_eq!(
            output.get("availableTools").unwrap(),
            &serde_json::json!(["echo"])
        );

        // Router keeps working after an unknown tool.
        let output = router.dispatch(&invocation("echo", "{}"));
        assert!(output.contains_key("echoed"));
    }

    #[test]
    fn test_tool_configuration_concatenates_in_order() {
        let router = ToolRouter::new(None)
            .with(Arc::new(EchoResolver))
            .with(Arc::new(datetime::DateTimeResolver::new()));
        let tools = router.tool_configuration();
        assert_eq!(tools[0].tool_spec.name, "echo");
        assert_eq!(tools[1].tool_spec.name, "getDateTool");
        assert_eq!(tools[2].tool_spec.name, "getTimeTool");
    }

    #[test]
    fn test_generic_extraction_records_process_keys() {
        struct CenterResolver;
        impl ToolResolver for CenterResolver {
            fn tool_names(&self) -> Vec<&'static str> {
                vec!["pickCenter"]
            }
            fn tools(&self) -> Vec<Tool> {
                vec![Tool::new("pickCenter", "", &empty_object_schema())]
            }
            fn resolve(&self, _invocation: &ToolInvocation, output: &mut Map<String, Value>) {
                output.insert("centro".into(), Value::String("Centro Norte".into()));
                output.insert(
                    "data".into(),
                    serde_json::json!({ "especialidad": "dermatologia" }),
                );
            }
        }

        let tracer = test_tracer();
        let router = ToolRouter::new(Some(tracer.clone())).with(Arc::new(CenterResolver));
        let before = tracer.entry_count();
        router.dispatch(&invocation("pickCenter", "{}"));
        // "tool" + two "proceso" observations.
        assert_eq!(tracer.entry_count(), before + 3);
    }
}
