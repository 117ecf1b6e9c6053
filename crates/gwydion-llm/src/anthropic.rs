//! Anthropic-family provider adapter.
//!
//! Projects the canonical request into the Messages API shape, streams the
//! response, and decodes the named SSE events into the canonical event
//! sequence.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ProviderError, Result};
use crate::provider::{
    with_retry, EventStream, FinishReason, ModelInfo, Provider, ProviderConfig, StreamEvent,
};
use crate::sse::{self, FrameStream};
use crate::types::{CompletionRequest, ContentBlock, Message, Role, Usage};

/// Default API base URL.
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Applied when the request leaves `max_tokens` unset; the field is
/// mandatory on this wire.
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Bounded retry of request initiation only; streams are never replayed.
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    /// Create an adapter from connection settings.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        // Connect timeout only: streaming reads have no deadline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream");
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
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo::new("claude-opus-4-20250514", "Claude Opus 4", 200_000, 32_000),
            ModelInfo::new(
                "claude-sonnet-4-20250514",
                "Claude Sonnet 4",
                200_000,
                64_000,
            ),
            ModelInfo::new(
                "claude-3-5-haiku-20241022",
                "Claude Haiku 3.5",
                200_000,
                8_192,
            ),
        ]
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let wire = WireRequest::from_canonical(&request);
        let url = self.messages_url();

        let response = with_retry(MAX_RETRIES, RETRY_BACKOFF, "anthropic", || async {
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

        tracing::debug!(model = %request.model, "anthropic stream opened");

        Ok(decode_frames(sse::parse_frames(response.bytes_stream())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Encoding
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    stream: bool,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    /// Bare-string optimization for single-text-block messages.
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl WireRequest {
    fn from_canonical(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.clone(),
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
            stream: true,
            messages: request.messages.iter().map(WireMessage::from_canonical).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
        }
    }
}

impl WireMessage {
    fn from_canonical(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        if message.is_plain_text() {
            return Self {
                role,
                content: WireContent::Text(message.text()),
            };
        }

        let blocks = message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
                ContentBlock::ToolUse { id, name, input } => WireBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
                // tool_name is canonical-only; this wire has no slot for it.
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    ..
                } => WireBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                },
            })
            .collect();

        Self {
            role,
            content: WireContent::Blocks(blocks),
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
    tool_buffers: HashMap<usize, ToolCallBuffer>,
    usage: Usage,
    reason: Option<FinishReason>,
    done: bool,
}

/// Decode named Anthropic SSE frames into the canonical event sequence.
fn decode_frames(frames: FrameStream) -> EventStream {
    let state = DecodeState {
        frames,
        tool_buffers: HashMap::new(),
        usage: Usage::default(),
        reason: None,
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            match state.frames.next().await {
                Some(Ok(frame)) => {
                    if let Some(event) = handle_frame(&mut state, &frame) {
                        return Some((Ok(event), state));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Ok(StreamEvent::StreamError {
                            message: e.to_string(),
                            retryable: false,
                        }),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    // A well-formed stream ends via message_stop; tolerate a
                    // server that drops the connection after message_delta.
                    if let Some(reason) = state.reason.take() {
                        return Some((
                            Ok(StreamEvent::FinishStep {
                                reason,
                                usage: state.usage,
                            }),
                            state,
                        ));
                    }
                    return Some((
                        Ok(StreamEvent::StreamError {
                            message: "stream ended before message_stop".to_string(),
                            retryable: false,
                        }),
                        state,
                    ));
                }
            }
        }
    }))
}

/// Map one frame to at most one canonical event, updating decode state.
fn handle_frame(state: &mut DecodeState, frame: &sse::SseFrame) -> Option<StreamEvent> {
    let event_name = frame.event.as_deref()?;

    match event_name {
        "message_start" => {
            if let Ok(parsed) = serde_json::from_str::<MessageStartEvent>(&frame.data) {
                state.usage.input_tokens = parsed.message.usage.input_tokens;
                state.usage.cache_creation_input_tokens = parsed
                    .message
                    .usage
                    .cache_creation_input_tokens
                    .unwrap_or(0);
                state.usage.cache_read_input_tokens =
                    parsed.message.usage.cache_read_input_tokens.unwrap_or(0);
            }
            None
        }
        "content_block_start" => {
            if let Ok(parsed) = serde_json::from_str::<ContentBlockStartEvent>(&frame.data) {
                if parsed.content_block.block_type == "tool_use" {
                    state.tool_buffers.insert(
                        parsed.index,
                        ToolCallBuffer {
                            id: parsed.content_block.id.unwrap_or_default(),
                            name: parsed.content_block.name.unwrap_or_default(),
                            json: String::new(),
                        },
                    );
                }
            }
            None
        }
        "content_block_delta" => {
            let parsed = serde_json::from_str::<ContentBlockDeltaEvent>(&frame.data).ok()?;
            match parsed.delta {
                DeltaContent::TextDelta { text } => Some(StreamEvent::TextDelta { text }),
                DeltaContent::InputJsonDelta { partial_json } => {
                    let buffer = state.tool_buffers.get_mut(&parsed.index)?;
                    buffer.json.push_str(&partial_json);
                    Some(StreamEvent::ToolCallDelta {
                        id: buffer.id.clone(),
                        name: buffer.name.clone(),
                        arguments_delta: partial_json,
                    })
                }
            }
        }
        "content_block_stop" => {
            let parsed = serde_json::from_str::<ContentBlockStopEvent>(&frame.data).ok()?;
            let buffer = state.tool_buffers.remove(&parsed.index)?;
            Some(StreamEvent::ToolCallComplete {
                id: buffer.id,
                name: buffer.name,
                arguments: parse_arguments(&buffer.json),
            })
        }
        "message_delta" => {
            if let Ok(parsed) = serde_json::from_str::<MessageDeltaEvent>(&frame.data) {
                if let Some(raw) = parsed.delta.stop_reason.as_deref() {
                    state.reason = Some(FinishReason::from_wire(raw));
                }
                state.usage.output_tokens = parsed.usage.output_tokens;
            }
            None
        }
        "message_stop" => {
            state.done = true;
            Some(StreamEvent::FinishStep {
                reason: state.reason.take().unwrap_or(FinishReason::Stop),
                usage: state.usage,
            })
        }
        "ping" => None,
        "error" => {
            state.done = true;
            let (message, retryable) = match serde_json::from_str::<StreamErrorEvent>(&frame.data) {
                Ok(parsed) => {
                    let retryable = parsed.error.error_type == "overloaded_error";
                    (parsed.error.message, retryable)
                }
                Err(_) => ("unknown streaming error".to_string(), false),
            };
            Some(StreamEvent::StreamError { message, retryable })
        }
        _ => None,
    }
}

/// Parse assembled argument JSON. Empty or malformed fragments downgrade to
/// an empty object; the dispatch turns that into a tool error.
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
// SSE Event Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct MessageStartMessage {
    #[serde(default)]
    usage: MessageStartUsage,
}

#[derive(Debug, Default, Deserialize)]
struct MessageStartUsage {
    #[serde(default)]
    input_tokens: u32,
    cache_creation_input_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: ContentBlockDescriptor,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDescriptor {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaContent {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDeltaBody,
    #[serde(default)]
    usage: MessageDeltaUsage,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamErrorEvent {
    error: StreamErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StreamErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
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
