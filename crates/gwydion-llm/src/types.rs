//! Canonical message model shared by every provider.
//!
//! These types are wire-agnostic: they carry all semantic data any provider
//! needs, and the adapters project them into provider-specific request
//! shapes on demand. Nothing in this module knows about SSE, HTTP, or a
//! particular vendor's JSON layout.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Roles & Messages
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a message author.
///
/// The system prompt is carried out-of-band on the request, not as an
/// inline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A role-tagged message holding an ordered list of content blocks.
///
/// Block order is preserved across all mutations. Within a session the
/// sequence alternates User/Assistant at the coarse level, with tool-result
/// blocks carried on the User message that answers an Assistant tool-use
/// turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create an assistant message from pre-built content blocks.
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create a user message carrying tool results.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// Append a text block.
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.content.push(ContentBlock::text(text));
    }

    /// Append a tool-use block.
    pub fn push_tool_use(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) {
        self.content.push(ContentBlock::tool_use(id, name, input));
    }

    /// Append a tool-result block.
    pub fn push_tool_result(&mut self, result: ContentBlock) {
        self.content.push(result);
    }

    /// Concatenated text of every text block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-use blocks, in order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// True if the message contains at least one tool-use block.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    /// True if the message is a single text block whose content equals the
    /// whole message text. Adapters use this for the bare-string wire
    /// optimization; it is not a structural rule of the canonical model.
    pub fn is_plain_text(&self) -> bool {
        matches!(self.content.as_slice(), [ContentBlock::Text { .. }])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content Blocks
// ─────────────────────────────────────────────────────────────────────────────

/// A content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Inline natural-language content.
    Text {
        /// The text content.
        text: String,
    },
    /// The model's request to call a tool. `id` is provider-issued, opaque,
    /// and unique within the turn.
    ToolUse {
        /// Provider-issued call id.
        id: String,
        /// Name of the tool to call.
        name: String,
        /// Structured arguments; best-effort conformance to the tool's
        /// declared schema.
        input: serde_json::Value,
    },
    /// The dispatched outcome of a tool call. `tool_use_id` matches exactly
    /// one prior `ToolUse` id in the dialog history.
    ToolResult {
        /// Id of the tool use this result answers.
        tool_use_id: String,
        /// Name of the tool that produced the result. Carried canonically
        /// so history maintenance can tell result kinds apart; adapters
        /// drop it where the wire format has no slot for it.
        tool_name: String,
        /// Result text.
        content: String,
        /// Whether the execution failed.
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(content: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: content.into(),
        }
    }

    /// Create a tool-use block.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a successful tool-result block.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error tool-result block.
    pub fn tool_error(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Definition of a tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique identifier).
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema object describing the input parameters.
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion Request
// ─────────────────────────────────────────────────────────────────────────────

/// A provider-agnostic completion request.
///
/// Adapters project this into their wire format; nothing here is sent
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use.
    pub model: String,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// System prompt, carried out-of-band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Maximum tokens to generate. Adapters that require the field apply
    /// their own default (8192) when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Tools offered to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// Create a new request with the given model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: None,
            temperature: None,
            stop_sequences: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the max token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the stop sequences.
    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }

    /// Add tools to the request.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Usage
// ─────────────────────────────────────────────────────────────────────────────

/// Token usage counters for one turn or one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the input.
    pub input_tokens: u32,
    /// Tokens in the output.
    pub output_tokens: u32,
    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl Usage {
    /// Create usage with the two primary counters.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    /// Total reported tokens: input + output only.
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another turn's usage into this one (pairwise sum).
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello");
        assert!(msg.is_plain_text());
    }

    #[test]
    fn test_message_mutators_preserve_order() {
        let mut msg = Message::assistant("Let me check.");
        msg.push_tool_use("call_1", "read", serde_json::json!({"path": "/x"}));
        msg.push_text("done");

        assert!(matches!(msg.content[0], ContentBlock::Text { .. }));
        assert!(matches!(msg.content[1], ContentBlock::ToolUse { .. }));
        assert!(matches!(msg.content[2], ContentBlock::Text { .. }));
        assert!(!msg.is_plain_text());
    }

    #[test]
    fn test_message_tool_uses() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::text("Working on it."),
            ContentBlock::tool_use("call_1", "read", serde_json::json!({"path": "/a"})),
            ContentBlock::tool_use("call_2", "grep", serde_json::json!({"pattern": "x"})),
        ]);

        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].1, "read");
        assert_eq!(uses[1].0, "call_2");
        assert!(msg.has_tool_use());
    }

    #[test]
    fn test_tool_result_blocks() {
        let ok = ContentBlock::tool_result("call_1", "read", "contents");
        assert!(matches!(
            ok,
            ContentBlock::ToolResult { is_error: false, .. }
        ));

        let err = ContentBlock::tool_error("call_2", "bash", "permission denied");
        match err {
            ContentBlock::ToolResult {
                tool_use_id,
                tool_name,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "call_2");
                assert_eq!(tool_name, "bash");
                assert!(content.contains("permission denied"));
                assert!(is_error);
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("claude-sonnet-4-20250514", vec![Message::user("Hi")])
            .with_system("You are helpful.")
            .with_max_tokens(1024)
            .with_temperature(0.7)
            .with_stop_sequences(vec!["END".to_string()]);

        assert_eq!(request.model, "claude-sonnet-4-20250514");
        assert_eq!(request.max_tokens, Some(1024));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.stop_sequences, vec!["END"]);
        assert!(request.system.is_some());
    }

    #[test]
    fn test_usage_accumulation() {
        let mut total = Usage::default();
        total.add(&Usage::new(100, 50));
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_input_tokens: 7,
            cache_read_input_tokens: 3,
        });

        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 55);
        assert_eq!(total.cache_creation_input_tokens, 7);
        assert_eq!(total.cache_read_input_tokens, 3);
        assert_eq!(total.total(), 165);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut msg = Message::user("read /x please");
        msg.push_tool_result(ContentBlock::tool_result("call_1", "read", "data"));

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.role, Role::User);
        assert_eq!(parsed.content.len(), 2);
        match &parsed.content[1] {
            ContentBlock::ToolResult { tool_name, .. } => assert_eq!(tool_name, "read"),
            _ => panic!("expected ToolResult"),
        }
    }
}
