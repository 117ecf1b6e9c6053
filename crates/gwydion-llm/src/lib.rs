//! Provider abstraction and streaming codec for the Gwydion agent runtime.
//!
//! This crate owns the canonical message model and the uniform interface
//! over heterogeneous LLM wire formats. Two provider families ship here
//! (Anthropic Messages and OpenAI Chat Completions); more register through
//! the [`ProviderRegistry`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Provider trait                          │
//! │  - stream(request) -> Stream<Event>      │
//! └──────────────────────────────────────────┘
//!            │
//!   ┌────────┴─────────┐
//!   ▼                  ▼
//! ┌──────────┐   ┌──────────┐      canonical events:
//! │Anthropic │   │  OpenAI  │ ──►  TextDelta / ToolCallDelta /
//! └──────────┘   └──────────┘      ToolCallComplete / FinishStep
//! ```
//!
//! The canonical model stays wire-agnostic; adapters own their request
//! shapes and SSE decoders.

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod types;

pub use error::{ProviderError, Result};
pub use provider::{
    with_retry, EventStream, FinishReason, MockProvider, MockTurn, ModelInfo, Provider,
    ProviderConfig, ProviderRegistry, SharedProvider, StreamEvent, StreamOutcome,
};
pub use types::{CompletionRequest, ContentBlock, Message, Role, ToolDefinition, Usage};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
