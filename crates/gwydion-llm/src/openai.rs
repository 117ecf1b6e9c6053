//! OpenAI-family provider adapter.
//!
//! Projects the canonical request into the Chat Completions shape (system
//! prompt as a leading `system` message, tool results as `tool`-role
//! messages) and decodes the unnamed SSE chunk stream, including the
//! `[DONE]` sentinel and index-keyed tool-call argument fragments.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::error::{ProviderError, Result};
use crate::provider::{
    with_retry, EventStream, FinishReason, ModelInfo, Provider, ProviderConfig, StreamEvent,
};
use crate::sse::{self, FrameStream};
use crate::types::{CompletionRequest, ContentBlock, Message, Role, Usage};

/// Default API base URL.
const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Bounded retry of request initiation only.
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI Chat Completions adapter.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    /// Create an adapter from connection settings.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream");
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        for (key, value) in &self.config.extra_headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<ApiErrorEnvelope>(&body) {
            match status {
                401 | 403 => ProviderError::Auth(parsed.error.message),
                _ => ProviderError::status(status, parsed.error.message),
            }
        } else {
            ProviderError::status(status, body)
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo::new("gpt-4o", "GPT-4o", 128_000, 16_384),
            ModelInfo::new("gpt-4o-mini", "GPT-4o mini", 128_000, 16_384),
            ModelInfo::new("gpt-4.1", "GPT-4.1", 1_047_576, 32_768),
        ]
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let wire = WireRequest::from_canonical(&request);
        let url = self.completions_url();

        let response = with_retry(MAX_RETRIES, RETRY_BACKOFF, "openai", || async {
            let response = self
                .add_headers(self.client.post(&url))
                .json(&wire)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::error_from_response(response).await);
            }
            Ok(response)
        })
        .await?;

        tracing::debug!(model = %request.model, "openai stream opened");

        Ok(decode_frames(sse::parse_frames(response.bytes_stream())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Encoding
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
    stream_options: StreamOptions,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    /// Arguments travel as a JSON-encoded string on this wire.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl WireRequest {
    fn from_canonical(request: &CompletionRequest) -> Self {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for message in &request.messages {
            project_message(message, &mut messages);
        }

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            messages,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect(),
        }
    }
}

/// Project one canonical message into wire messages.
///
/// Tool results split into separate `tool`-role messages in block order;
/// assistant tool uses fold into a `tool_calls` array.
fn project_message(message: &Message, out: &mut Vec<WireMessage>) {
    match message.role {
        Role::User => {
            let mut text = String::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        if !text.is_empty() {
                            out.push(WireMessage {
                                role: "user",
                                content: Some(std::mem::take(&mut text)),
                                tool_calls: None,
                                tool_call_id: None,
                            });
                        }
                        out.push(WireMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                    ContentBlock::ToolUse { .. } => {}
                }
            }
            if !text.is_empty() {
                out.push(WireMessage {
                    role: "user",
                    content: Some(text),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }
        Role::Assistant => {
            let text = message.text();
            let tool_calls: Vec<WireToolCall> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(WireToolCall {
                        id: id.clone(),
                        call_type: "function",
                        function: WireFunctionCall {
                            name: name.clone(),
                            arguments: input.to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            out.push(WireMessage {
                role: "assistant",
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            });
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Decoding
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: String,
    name: String,
    json: String,
}

struct DecodeState {
    frames: FrameStream,
    /// Index-keyed argument buffers; BTreeMap keeps the flush order stable.
    tool_buffers: BTreeMap<u32, ToolCallBuffer>,
    /// Events decoded from the current frame but not yet yielded.
    queue: VecDeque<StreamEvent>,
    usage: Usage,
    reason: Option<FinishReason>,
    done: bool,
}

/// Decode unnamed OpenAI SSE chunks into the canonical event sequence.
fn decode_frames(frames: FrameStream) -> EventStream {
    let state = DecodeState {
        frames,
        tool_buffers: BTreeMap::new(),
        queue: VecDeque::new(),
        usage: Usage::default(),
        reason: None,
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            match state.frames.next().await {
                Some(Ok(frame)) => handle_frame(&mut state, &frame),
                Some(Err(e)) => {
                    state.done = true;
                    state.queue.push_back(StreamEvent::StreamError {
                        message: e.to_string(),
                        retryable: false,
                    });
                }
                None => {
                    state.done = true;
                    if state.queue.is_empty() {
                        // Connection dropped without [DONE].
                        finish(&mut state);
                    }
                }
            }
        }
    }))
}

/// Decode one chunk frame, pushing any resulting events onto the queue.
fn handle_frame(state: &mut DecodeState, frame: &sse::SseFrame) {
    if frame.data == "[DONE]" {
        state.done = true;
        finish(state);
        return;
    }

    let chunk: StreamChunk = match serde_json::from_str(&frame.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream chunk");
            return;
        }
    };

    if let Some(usage) = chunk.usage {
        state.usage.input_tokens = usage.prompt_tokens;
        state.usage.output_tokens = usage.completion_tokens;
    }

    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    state.queue.push_back(StreamEvent::TextDelta { text: content });
                }
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let buffer = state.tool_buffers.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    buffer.id = id;
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        buffer.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        buffer.json.push_str(&arguments);
                        state.queue.push_back(StreamEvent::ToolCallDelta {
                            id: buffer.id.clone(),
                            name: buffer.name.clone(),
                            arguments_delta: arguments,
                        });
                    }
                }
            }
        }

        if let Some(raw) = choice.finish_reason.as_deref() {
            state.reason = Some(FinishReason::from_wire(raw));
        }
    }
}

/// Flush assembled tool calls, then the single terminal event.
fn finish(state: &mut DecodeState) {
    for (_, buffer) in std::mem::take(&mut state.tool_buffers) {
        let arguments = parse_arguments(&buffer.json);
        state.queue.push_back(StreamEvent::ToolCallComplete {
            id: buffer.id,
            name: buffer.name,
            arguments,
        });
    }

    state.queue.push_back(StreamEvent::FinishStep {
        reason: state.reason.take().unwrap_or(FinishReason::Stop),
        usage: state.usage,
    });
}

/// Parse assembled argument JSON, downgrading failures to an empty object.
fn parse_arguments(json: &str) -> serde_json::Value {
    if json.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(json).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "malformed tool arguments, downgrading to empty object");
        serde_json::json!({})
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Chunk Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseFrame;
    use crate::types::ToolDefinition;
    use futures::StreamExt;

    fn frames(data: Vec<&str>) -> FrameStream {
        let frames: Vec<std::result::Result<SseFrame, ProviderError>> = data
            .into_iter()
            .map(|d| {
                Ok(SseFrame {
                    event: None,
                    data: d.to_string(),
                })
            })
            .collect();
        Box::pin(futures::stream::iter(frames))
    }

    async fn decode(data: Vec<&str>) -> Vec<StreamEvent> {
        decode_frames(frames(data)).map(|r| r.unwrap()).collect().await
    }

    #[test]
    fn test_completions_url() {
        let provider = OpenAiProvider::new(ProviderConfig::new("key")).unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_system_prompt_prepended() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("hi")])
            .with_system("You are helpful.");
        let wire = WireRequest::from_canonical(&request);

        assert_eq!(wire.messages[0].role, "system");
        assert_eq!(wire.messages[0].content.as_deref(), Some("You are helpful."));
        assert_eq!(wire.messages[1].role, "user");
    }

    #[test]
    fn test_tool_results_become_tool_role_messages() {
        let msg = Message::tool_results(vec![
            ContentBlock::tool_result("c1", "read", "contents"),
            ContentBlock::tool_result("c2", "grep", "matches"),
        ]);
        let request = CompletionRequest::new("gpt-4o", vec![msg]);
        let wire = WireRequest::from_canonical(&request);

        assert_eq!(wire.messages.len(), 2);
        assert_eq!(wire.messages[0].role, "tool");
        assert_eq!(wire.messages[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire.messages[1].tool_call_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_assistant_tool_use_projection() {
        let mut msg = Message::assistant("Checking.");
        msg.push_tool_use("c1", "read", serde_json::json!({"path": "/x"}));
        let request = CompletionRequest::new("gpt-4o", vec![msg]);

        let json = serde_json::to_value(WireRequest::from_canonical(&request)).unwrap();
        let wire_msg = &json["messages"][0];
        assert_eq!(wire_msg["role"], "assistant");
        assert_eq!(wire_msg["tool_calls"][0]["id"], "c1");
        assert_eq!(wire_msg["tool_calls"][0]["type"], "function");
        // Arguments are a JSON-encoded string on this wire.
        let args: serde_json::Value =
            serde_json::from_str(wire_msg["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["path"], "/x");
    }

    #[test]
    fn test_tool_schema_encoding() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("x")]).with_tools(vec![
            ToolDefinition::new(
                "read",
                "Read a file",
                serde_json::json!({"type": "object", "properties": {}}),
            ),
        ]);

        let json = serde_json::to_value(WireRequest::from_canonical(&request)).unwrap();
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "read");
        assert!(json["tools"][0]["function"]["parameters"].is_object());
    }

    #[test]
    fn test_stop_sequences_as_stop_array() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("x")])
            .with_stop_sequences(vec!["END".to_string()]);
        let json = serde_json::to_value(WireRequest::from_canonical(&request)).unwrap();
        assert_eq!(json["stop"][0], "END");
    }

    #[tokio::test]
    async fn test_decode_text_stream() {
        let events = decode(vec![
            r#"{"choices":[{"delta":{"content":"hel"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":2}}"#,
            "[DONE]",
        ])
        .await;

        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "hel"));
        assert!(matches!(&events[1], StreamEvent::TextDelta { text } if text == "lo"));
        match &events[2] {
            StreamEvent::FinishStep { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.input_tokens, 7);
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("expected FinishStep, got {other:?}"),
        }
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_decode_tool_call_fragments() {
        let events = decode(vec![
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"/x\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ])
        .await;

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallComplete {
                    id,
                    name,
                    arguments,
                } => Some((id.clone(), name.clone(), arguments.clone())),
                _ => None,
            })
            .expect("no ToolCallComplete");
        assert_eq!(complete.0, "c1");
        assert_eq!(complete.1, "read");
        assert_eq!(complete.2["path"], "/x");

        // ToolCallComplete precedes the single FinishStep, which is last.
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::FinishStep {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_parallel_tool_calls_flush_in_index_order() {
        let events = decode(vec![
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"a","arguments":"{}"}},{"index":1,"id":"c2","function":{"name":"b","arguments":"{}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ])
        .await;

        let completes: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallComplete { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(completes, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_decode_malformed_arguments_downgrade() {
        let events = decode(vec![
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read","arguments":"{broken"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ])
        .await;

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallComplete { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_decode_finish_without_done_sentinel() {
        let events = decode(vec![
            r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
        ])
        .await;

        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::FinishStep {
                reason: FinishReason::Length,
                ..
            }
        ));
    }
}
