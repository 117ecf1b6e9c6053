//! Tool framework: the [`Tool`] trait, parameter schemas, and outputs.
//!
//! Tools describe their inputs as typed [`ParameterSchema`] rows; the
//! registry compiles those into the JSON-Schema object providers expect.
//! Descriptions are computed (`String`, not `&str`) so a tool can embed
//! runtime state — the skill tool lists the skills discovered at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use gwydion_llm::ToolDefinition;

use crate::context::ToolContext;
use crate::error::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Schemas
// ─────────────────────────────────────────────────────────────────────────────

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// JSON Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Parse a JSON Schema type name, defaulting to string.
    pub fn from_schema_str(s: &str) -> Self {
        match s {
            "number" | "integer" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::String,
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name.
    pub name: String,
    /// Value type.
    pub param_type: ParamType,
    /// What the parameter means.
    pub description: String,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Default value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Closed set of allowed values, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    /// Create a parameter of the given type.
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required,
            default: None,
            enum_values: None,
        }
    }

    /// Create a string parameter.
    pub fn string(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self::new(name, ParamType::String, description, required)
    }

    /// Set the default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Restrict to a closed set of values.
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Compile parameter rows into a JSON-Schema object
/// (`{type: "object", properties, required}`).
pub fn input_schema(parameters: &[ParameterSchema]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in parameters {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), json!(param.param_type.as_str()));
        if !param.description.is_empty() {
            prop.insert("description".into(), json!(param.description));
        }
        if let Some(default) = &param.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(values) = &param.enum_values {
            prop.insert("enum".into(), json!(values));
        }
        properties.insert(param.name.clone(), Value::Object(prop));

        if param.required {
            required.push(json!(param.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Output
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result text handed back to the model.
    pub content: String,
    /// Whether the execution failed.
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait implemented by every dispatchable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool id (registry key and wire name).
    fn id(&self) -> &str;

    /// What the tool does. May be computed from runtime state.
    fn description(&self) -> String;

    /// Declared parameters.
    fn parameters(&self) -> Vec<ParameterSchema>;

    /// Execute with parsed arguments.
    ///
    /// Failures that the model should see (bad input, missing file, remote
    /// error) come back as `Ok(ToolOutput::error(..))`; an `Err` is treated
    /// the same way by the dispatcher, so either style is acceptable.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Project a tool into the provider-facing definition.
pub fn definition_for(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition::new(
        tool.id(),
        tool.description(),
        input_schema(&tool.parameters()),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool (for tests)
// ─────────────────────────────────────────────────────────────────────────────

/// A scripted tool that records its calls.
#[cfg(test)]
pub struct MockTool {
    id: String,
    output: ToolOutput,
    delay: Option<std::time::Duration>,
    calls: std::sync::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl MockTool {
    /// Create a mock returning a fixed text output.
    pub fn new(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: ToolOutput::text(output),
            delay: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Make the mock fail.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: ToolOutput::error(message),
            delay: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Sleep before responding.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        "A mock tool for testing".to_string()
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(args);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
