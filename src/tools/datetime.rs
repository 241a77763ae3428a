//! Date and time tools.
//!
//! The AI model has no reliable clock, so scheduling conversations ask the
//! gateway. Both tools take no parameters and answer from the host clock in
//! the configured timezone offset.

use super::{empty_object_schema, Tool, ToolInvocation, ToolResolver};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};

/// Resolver for `getDateTool` and `getTimeTool`.
pub struct DateTimeResolver {
    offset: FixedOffset,
}

impl DateTimeResolver {
    /// Host-local answers at UTC-5 (Colombia), the deployment default.
    pub fn new() -> Self {
        // -5 * 3600 is always a valid offset.
        Self::with_offset(FixedOffset::west_opt(5 * 3600).unwrap())
    }

    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

impl Default for DateTimeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolResolver for DateTimeResolver {
    fn tool_names(&self) -> Vec<&'static str> {
        vec!["getDateTool", "getTimeTool"]
    }

    fn tools(&self) -> Vec<Tool> {
        let schema = empty_object_schema();
        vec![
            Tool::new(
                "getDateTool",
                "Get today's date in YYYY-MM-DD format.",
                &schema,
            ),
            Tool::new("getTimeTool", "Get the current time of day.", &schema),
        ]
    }

    fn resolve(&self, invocation: &ToolInvocation, output: &mut Map<String, Value>) {
        let now = self.now();
        match invocation.tool_name.as_str() {
            "getDateTool" => {
                output.insert("date".into(), Value::String(now.format("%Y-%m-%d").to_string()));
                output.insert(
                    "dayOfWeek".into(),
                    Value::String(now.format("%A").to_string()),
                );
            }
            "getTimeTool" => {
                output.insert("time".into(), Value::String(now.format("%H:%M:%S").to_string()));
            }
            other => {
                output.insert(
                    "error".into(),
                    Value::String(format!("Unsupported tool: {}", other)),
                );
            }
        }
        output.insert("timezone".into(), Value::String(self.offset.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> Map<String, Value> {
        let resolver = DateTimeResolver::new();
        let invocation = ToolInvocation {
            tool_use_id: "use-1".into(),
            tool_name: name.into(),
            input_content: "{}".into(),
        };
        let mut output = Map::new();
        resolver.resolve(&invocation, &mut output);
        output
    }

    #[test]
    fn test_date_tool_shape() {
        let output = call("getDateTool");
        let date = output.get("date").unwrap().as_str().unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
        assert!(output.contains_key("dayOfWeek"));
        assert!(output.contains_key("timezone"));
    }

    #[test]
    fn test_time_tool_shape() {
        let output = call("getTimeTool");
        let time = output.get("time").unwrap().as_str().unwrap();
        assert_eq!(time.len(), 8);
        assert_eq!(&time[2..3], ":");
    }
}
