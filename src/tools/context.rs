//! # Dynamic Context Loading
//!
//! Keeps the system prompt small by splitting client instructions into named
//! fragments that the AI pulls in on demand through the `loadContext` tool.
//!
//! ## Layout on disk:
//! ```text
//! {prompts_dir}/{client_id}/base-prompt.txt
//! {prompts_dir}/{client_id}/context-citas.txt      -> fragment "citas"
//! {prompts_dir}/{client_id}/context-facturacion.txt -> fragment "facturacion"
//! ```
//!
//! The catalog is discovered once at startup and shared across calls; the
//! resolver is per-call and remembers which fragments it already delivered so
//! a repeated request gets a short acknowledgment instead of the full text
//! again.

use super::template;
use super::{Tool, ToolInvocation, ToolResolver};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const CONTEXT_PREFIX: &str = "context-";
const CONTEXT_SUFFIX: &str = ".txt";

/// Fallback system prompt when a client has no `base-prompt.txt`.
const DEFAULT_BASE_PROMPT: &str = "You are a helpful voice assistant answering \
a telephone call. Keep responses short and conversational. Use the loadContext \
tool to retrieve detailed instructions when the caller states what they need.";

/// Immutable set of prompt fragments for one client, discovered at startup.
pub struct ContextCatalog {
    client_id: String,
    base_prompt: String,
    fragments: HashMap<String, String>,
    /// Fragment names in sorted order, for stable schemas and error messages.
    names: Vec<String>,
}

impl ContextCatalog {
    /// Scan `{prompts_dir}/{client_id}/` for the base prompt and every
    /// `context-*.txt` fragment.
    ///
    /// A missing directory or unreadable file is logged and skipped; an empty
    /// catalog is valid (the tool then reports no available contexts).
    pub fn discover(prompts_dir: &Path, client_id: &str) -> Self {
        let client_dir = prompts_dir.join(client_id);
        let base_prompt = load_base_prompt(prompts_dir, client_id);

        let mut fragments = HashMap::new();
        match fs::read_dir(&client_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let file_name = entry.file_name();
                    let file_name = file_name.to_string_lossy();
                    let name = match fragment_name(&file_name) {
                        Some(name) => name.to_string(),
                        None => continue,
                    };
                    match fs::read_to_string(entry.path()) {
                        Ok(text) => {
                            debug!("Discovered context '{}' ({} bytes)", name, text.len());
                            fragments.insert(name, text);
                        }
                        Err(e) => {
                            warn!("Skipping unreadable context file {}: {}", file_name, e)
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "No prompt directory for client '{}' at {}: {}",
                    client_id,
                    client_dir.display(),
                    e
                );
            }
        }

        let mut names: Vec<String> = fragments.keys().cloned().collect();
        names.sort();
        info!(
            client_id = %client_id,
            contexts = names.len(),
            "Context catalog loaded: [{}]",
            names.join(", ")
        );

        Self {
            client_id: client_id.to_string(),
            base_prompt,
            fragments,
            names,
        }
    }

    /// Build a catalog directly from fragment text, for tests and embedding.
    #[cfg(test)]
    pub fn from_fragments(
        client_id: &str,
        base_prompt: &str,
        fragments: HashMap<String, String>,
    ) -> Self {
        let mut names: Vec<String> = fragments.keys().cloned().collect();
        names.sort();
        Self {
            client_id: client_id.to_string(),
            base_prompt: base_prompt.to_string(),
            fragments,
            names,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The client's system prompt before variable substitution.
    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fragments.get(name).map(String::as_str)
    }

    /// Sorted fragment names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Load `{prompts_dir}/{client_id}/base-prompt.txt`, falling back to the
/// `default-client` directory and finally to a built-in prompt.
fn load_base_prompt(prompts_dir: &Path, client_id: &str) -> String {
    for candidate in [client_id, "default-client"] {
        let path = prompts_dir.join(candidate).join("base-prompt.txt");
        match fs::read_to_string(&path) {
            Ok(text) => {
                info!("Base prompt loaded from {}", path.display());
                return text;
            }
            Err(_) => debug!("No base prompt at {}", path.display()),
        }
    }
    warn!(
        "No base prompt found for client '{}', using built-in default",
        client_id
    );
    DEFAULT_BASE_PROMPT.to_string()
}

/// Extract the fragment name from a `context-{name}.txt` file name.
fn fragment_name(file_name: &str) -> Option<&str> {
    let stem = file_name
        .strip_prefix(CONTEXT_PREFIX)?
        .strip_suffix(CONTEXT_SUFFIX)?;
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

/// Per-call resolver for the `loadContext` tool.
///
/// Delivers a fragment's full text (with variables substituted) on the first
/// request, and only a short acknowledgment on repeats, so a looping model
/// cannot re-inflate the conversation with the same instructions.
pub struct ContextResolver {
    catalog: Arc<ContextCatalog>,
    variables: HashMap<String, String>,
    delivered: Mutex<HashSet<String>>,
}

impl ContextResolver {
    pub fn new(catalog: Arc<ContextCatalog>, variables: HashMap<String, String>) -> Self {
        Self {
            catalog,
            variables,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    fn available_contexts(&self) -> Value {
        Value::Array(
            self.catalog
                .names()
                .iter()
                .map(|n| Value::String(n.clone()))
                .collect(),
        )
    }
}

impl ToolResolver for ContextResolver {
    fn tool_names(&self) -> Vec<&'static str> {
        vec!["loadContext"]
    }

    fn tools(&self) -> Vec<Tool> {
        // The discovered names become the schema enum, so the model can only
        // ask for fragments that exist.
        let schema = json!({
            "type": "object",
            "properties": {
                "context": {
                    "type": "string",
                    "enum": self.catalog.names(),
                    "description": "Name of the context to load"
                }
            },
            "required": ["context"]
        });
        vec![Tool::new(
            "loadContext",
            "Load detailed instructions for a specific topic. Call this as soon \
             as the caller states what they need.",
            &schema,
        )]
    }

    fn resolve(&self, invocation: &ToolInvocation, output: &mut Map<String, Value>) {
        let input: Value = serde_json::from_str(&invocation.input_content).unwrap_or(Value::Null);
        let requested = input.get("context").and_then(Value::as_str);

        let name = match requested {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!("loadContext called without a context parameter");
                output.insert("contextLoaded".into(), Value::Bool(false));
                output.insert(
                    "error".into(),
                    Value::String("Missing required parameter: context".into()),
                );
                output.insert("availableContexts".into(), self.available_contexts());
                return;
            }
        };

        let text = match self.catalog.get(name) {
            Some(text) => text,
            None => {
                warn!("loadContext requested unknown context '{}'", name);
                output.insert("contextLoaded".into(), Value::Bool(false));
                output.insert(
                    "error".into(),
                    Value::String(format!("Context not found: {}", name)),
                );
                output.insert("availableContexts".into(), self.available_contexts());
                return;
            }
        };

        let already = !self.delivered.lock().unwrap().insert(name.to_string());
        output.insert("contextLoaded".into(), Value::Bool(true));
        output.insert("contextType".into(), Value::String(name.to_string()));

        if already {
            debug!("Context '{}' already delivered this call", name);
            output.insert("alreadyLoaded".into(), Value::Bool(true));
            output.insert(
                "message".into(),
                Value::String(format!(
                    "Context '{}' is already loaded. Continue following its instructions.",
                    name
                )),
            );
        } else {
            info!("Delivering context '{}' ({} bytes)", name, text.len());
            let substituted = template::replace_variables(text, &self.variables);
            output.insert("instructions".into(), Value::String(substituted));
            output.insert(
                "message".into(),
                Value::String(format!(
                    "Context '{}' loaded. Follow these instructions now.",
                    name
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_prompts_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prompts-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_catalog() -> Arc<ContextCatalog> {
        let mut fragments = HashMap::new();
        fragments.insert(
            "citas".to_string(),
            "Agendar cita para ${ani} en el centro.".to_string(),
        );
        fragments.insert("facturacion".to_string(), "Facturacion reglas.".to_string());
        Arc::new(ContextCatalog::from_fragments(
            "keralty",
            "base",
            fragments,
        ))
    }

    fn call(resolver: &ContextResolver, input: &str) -> Map<String, Value> {
        let invocation = ToolInvocation {
            tool_use_id: "use-1".into(),
            tool_name: "loadContext".into(),
            input_content: input.into(),
        };
        let mut output = Map::new();
        resolver.resolve(&invocation, &mut output);
        output
    }

    #[test]
    fn test_discover_finds_fragments_and_base_prompt() {
        let dir = temp_prompts_dir();
        let client = dir.join("acme");
        fs::create_dir_all(&client).unwrap();
        fs::write(client.join("base-prompt.txt"), "You are Acme.").unwrap();
        fs::write(client.join("context-citas.txt"), "citas text").unwrap();
        fs::write(client.join("context-pqrs.txt"), "pqrs text").unwrap();
        fs::write(client.join("notes.txt"), "ignored").unwrap();

        let catalog = ContextCatalog::discover(&dir, "acme");
        assert_eq!(catalog.base_prompt(), "You are Acme.");
        assert_eq!(catalog.names(), &["citas".to_string(), "pqrs".to_string()]);
        assert_eq!(catalog.get("citas"), Some("citas text"));
        assert_eq!(catalog.get("notes"), None);
    }

    #[test]
    fn test_discover_missing_client_falls_back_to_default() {
        let dir = temp_prompts_dir();
        let default = dir.join("default-client");
        fs::create_dir_all(&default).unwrap();
        fs::write(default.join("base-prompt.txt"), "Default prompt.").unwrap();

        let catalog = ContextCatalog::discover(&dir, "nobody");
        assert_eq!(catalog.base_prompt(), "Default prompt.");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_discover_nothing_uses_builtin_prompt() {
        let dir = temp_prompts_dir();
        let catalog = ContextCatalog::discover(&dir, "nobody");
        assert!(catalog.base_prompt().contains("loadContext"));
    }

    #[test]
    fn test_first_load_delivers_substituted_text() {
        let mut variables = HashMap::new();
        variables.insert("ani".to_string(), "3001234567".to_string());
        let resolver = ContextResolver::new(test_catalog(), variables);

        let output = call(&resolver, r#"{"context": "citas"}"#);
        assert_eq!(output.get("contextLoaded").unwrap(), &Value::Bool(true));
        assert_eq!(output.get("contextType").unwrap(), "citas");
        assert_eq!(
            output.get("instructions").unwrap(),
            "Agendar cita para 3001234567 en el centro."
        );
    }

    #[test]
    fn test_repeat_load_acknowledges_without_text() {
        let resolver = ContextResolver::new(test_catalog(), HashMap::new());

        call(&resolver, r#"{"context": "citas"}"#);
        let output = call(&resolver, r#"{"context": "citas"}"#);
        assert_eq!(output.get("contextLoaded").unwrap(), &Value::Bool(true));
        assert_eq!(output.get("alreadyLoaded").unwrap(), &Value::Bool(true));
        assert!(!output.contains_key("instructions"));
    }

    #[test]
    fn test_unknown_context_lists_available() {
        let resolver = ContextResolver::new(test_catalog(), HashMap::new());
        let output = call(&resolver, r#"{"context": "nope"}"#);
        assert_eq!(output.get("contextLoaded").unwrap(), &Value::Bool(false));
        assert_eq!(
            output.get("availableContexts").unwrap(),
            &json!(["citas", "facturacion"])
        );
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let resolver = ContextResolver::new(test_catalog(), HashMap::new());
        let output = call(&resolver, "{}");
        assert_eq!(output.get("contextLoaded").unwrap(), &Value::Bool(false));
        assert!(output.contains_key("error"));
    }

    #[test]
    fn test_schema_enumerates_discovered_names() {
        let resolver = ContextResolver::new(test_catalog(), HashMap::new());
        let tools = resolver.tools();
        let schema: Value =
            serde_json::from_str(&tools[0].tool_spec.input_schema.json).unwrap();
        assert_eq!(
            schema["properties"]["context"]["enum"],
            json!(["citas", "facturacion"])
        );
    }
}
