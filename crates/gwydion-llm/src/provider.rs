//! Provider abstraction and the canonical stream event model.
//!
//! Every provider family implements [`Provider`], translating the canonical
//! request into its wire format and decoding its SSE stream into the shared
//! [`StreamEvent`] sequence. The orchestrator consumes only this module's
//! types; vendor shapes never escape the adapters.

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProviderError, Result};
use crate::types::{CompletionRequest, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// Canonical Stream Events
// ─────────────────────────────────────────────────────────────────────────────

/// Why a turn's stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// The model requested tool calls.
    ToolCalls,
    /// The max-token budget was hit.
    Length,
    /// The stream failed.
    Error,
    /// Cooperative cancellation.
    Cancelled,
}

impl FinishReason {
    /// Normalize a provider-specific stop-reason alias.
    ///
    /// Unknown aliases map to `Stop`: providers add reasons over time and an
    /// unrecognized natural finish must not abort the session.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "end_turn" | "stop" | "stop_sequence" => Self::Stop,
            "tool_use" | "tool_calls" => Self::ToolCalls,
            "max_tokens" | "length" => Self::Length,
            _ => Self::Stop,
        }
    }
}

/// Terminal summary of one provider stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Why the stream finished.
    pub finish_reason: FinishReason,
    /// Token usage for the turn.
    pub usage: Usage,
}

/// Canonical events decoded from a provider stream.
///
/// Ordering guarantees: for a given call id every `ToolCallDelta` precedes
/// its `ToolCallComplete`, which precedes `FinishStep`. Exactly one
/// `FinishStep` is emitted per well-formed stream, always last.
/// `StreamError` terminates the stream in place of a `FinishStep`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Partial tool-call materialization; adapters may coalesce fragments.
    ToolCallDelta {
        /// Provider-issued call id.
        id: String,
        /// Tool name.
        name: String,
        /// Raw JSON fragment of the arguments.
        arguments_delta: String,
    },
    /// A tool call whose arguments have been fully assembled and parsed.
    ToolCallComplete {
        /// Provider-issued call id.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments. Empty object when the fragments did not parse;
        /// the dispatch surfaces that as a tool error, not a stream error.
        arguments: serde_json::Value,
    },
    /// Terminal event carrying the finish reason and turn usage.
    FinishStep {
        /// Why the stream finished.
        reason: FinishReason,
        /// Token usage for the turn.
        usage: Usage,
    },
    /// Unrecoverable decoding or transport failure.
    StreamError {
        /// Description of the failure.
        message: String,
        /// Whether re-issuing the request may succeed.
        retryable: bool,
    },
}

/// A pull-based stream of canonical events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Models & Provider Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of a model a provider can serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier used on the wire.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Context window in tokens.
    pub context_window: u32,
    /// Maximum output tokens per turn.
    pub max_output_tokens: u32,
}

impl ModelInfo {
    /// Create a model description.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        context_window: u32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            context_window,
            max_output_tokens,
        }
    }
}

/// Trait implemented by every provider family.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider family name (registry key).
    fn name(&self) -> &str;

    /// Models this provider serves.
    fn models(&self) -> Vec<ModelInfo>;

    /// Look up a model by id.
    fn get_model(&self, id: &str) -> Option<ModelInfo> {
        self.models().into_iter().find(|m| m.id == id)
    }

    /// Issue a streaming completion request.
    ///
    /// The returned stream yields the canonical event sequence; the caller
    /// observes deltas as they arrive and cancels by dropping the stream.
    async fn stream(&self, request: CompletionRequest) -> Result<EventStream>;
}

/// A provider that can be shared across sessions.
pub type SharedProvider = Arc<dyn Provider>;

// ─────────────────────────────────────────────────────────────────────────────
// Retry Helper
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with bounded exponential backoff.
///
/// Retries only errors whose `is_retryable()` is true; everything else is
/// returned immediately. Adapters use this for request initiation — streams
/// that fail mid-flight are never replayed at this layer.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    provider_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        provider = provider_name,
                        attempt = attempt + 1,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings handed to a provider factory.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Override for the provider's base URL.
    pub base_url: Option<String>,
    /// Organization header, where the provider supports one.
    pub organization: Option<String>,
    /// Extra headers attached to every request.
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create a config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the organization.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Attach an extra header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }
}

type ProviderFactory = Box<dyn Fn(ProviderConfig) -> Result<SharedProvider> + Send + Sync>;

/// Registry of provider factories keyed by family name.
///
/// Registration is static: the known families are installed at construction
/// and the set does not change at runtime.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a registry with the built-in families registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        registry.register("anthropic", |config| {
            Ok(Arc::new(crate::anthropic::AnthropicProvider::new(config)?) as SharedProvider)
        });
        registry.register("openai", |config| {
            Ok(Arc::new(crate::openai::OpenAiProvider::new(config)?) as SharedProvider)
        });

        registry
    }

    /// Create an empty registry (test seam).
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a family name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ProviderConfig) -> Result<SharedProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Registered family names.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Construct a provider by family name. Unknown names return `None`.
    pub fn create(&self, name: &str, config: ProviderConfig) -> Option<Result<SharedProvider>> {
        self.factories.get(name).map(|factory| factory(config))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Provider
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted turn for [`MockProvider`].
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    /// Events yielded in order.
    pub events: Vec<StreamEvent>,
    /// When set, the stream never completes after the scripted events;
    /// it pends until the consumer drops it (cancellation tests).
    pub hang_at_end: bool,
}

impl MockTurn {
    /// A turn emitting one text delta and a `Stop` finish.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            events: vec![
                StreamEvent::TextDelta { text: text.into() },
                StreamEvent::FinishStep {
                    reason: FinishReason::Stop,
                    usage: Usage::new(10, 5),
                },
            ],
            hang_at_end: false,
        }
    }

    /// A turn requesting the given tool calls then finishing with
    /// `ToolCalls`.
    pub fn tool_calls(calls: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let mut events: Vec<StreamEvent> = calls
            .into_iter()
            .map(|(id, name, arguments)| StreamEvent::ToolCallComplete {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            })
            .collect();
        events.push(StreamEvent::FinishStep {
            reason: FinishReason::ToolCalls,
            usage: Usage::new(20, 10),
        });
        Self {
            events,
            hang_at_end: false,
        }
    }

    /// A turn from explicit events.
    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            hang_at_end: false,
        }
    }

    /// Keep the stream pending after the scripted events.
    pub fn hanging(mut self) -> Self {
        self.hang_at_end = true;
        self
    }
}

/// A scripted provider for deterministic tests.
///
/// Turns are consumed in order; requesting more turns than scripted yields
/// a transport error. Every request is logged for verification.
pub struct MockProvider {
    turns: std::sync::Mutex<std::collections::VecDeque<MockTurn>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    /// Create a provider with the given scripted turns.
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: std::sync::Mutex::new(turns.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// All requests made so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests made so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo::new("mock-model", "Mock Model", 200_000, 8192)]
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        self.requests.lock().unwrap().push(request);

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::transport("mock provider: no more scripted turns", false))?;

        let scripted = futures::stream::iter(turn.events.into_iter().map(Ok));
        if turn.hang_at_end {
            Ok(Box::pin(scripted.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use futures::StreamExt;

    #[test]
    fn test_finish_reason_normalization() {
        assert_eq!(FinishReason::from_wire("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_use"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_wire("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(FinishReason::from_wire("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_wire("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_wire("anything_else"), FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_turn() {
        let provider = MockProvider::new(vec![MockTurn::text("hello")]);

        let request = CompletionRequest::new("mock-model", vec![Message::user("hi")]);
        let mut stream = provider.stream(request).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "hello"));
        assert!(matches!(
            events[1],
            StreamEvent::FinishStep {
                reason: FinishReason::Stop,
                ..
            }
        ));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_exhausted() {
        let provider = MockProvider::new(vec![]);
        let request = CompletionRequest::new("mock-model", vec![Message::user("hi")]);
        assert!(provider.stream(request).await.is_err());
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_non_retryable() {
        let mut calls = 0u32;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || {
            calls += 1;
            async { Err(ProviderError::status(400, "bad request")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_retries_retryable() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32> = with_retry(3, Duration::from_millis(1), "test", || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::status(500, "flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_registry_known_and_unknown_names() {
        let registry = ProviderRegistry::with_defaults();
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(names, vec!["anthropic", "openai"]);

        assert!(registry
            .create("anthropic", ProviderConfig::new("key"))
            .is_some());
        assert!(registry
            .create("no-such-provider", ProviderConfig::new("key"))
            .is_none());
    }

    #[test]
    fn test_registry_custom_factory() {
        let mut registry = ProviderRegistry::empty();
        registry.register("mock", |_config| {
            Ok(Arc::new(MockProvider::new(vec![])) as SharedProvider)
        });

        let provider = registry
            .create("mock", ProviderConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(provider.name(), "mock");
    }
}
