//! Error types for the agent runtime.
//!
//! Tool-level failures (not-found, bad arguments, permission, execution)
//! are recovered locally by the orchestrator: they become error-flagged
//! tool results and flow back into the next model turn. The variants here
//! surface only when a session loop must end.

use thiserror::Error;

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Provider request or stream failure.
    #[error("provider error: {0}")]
    Provider(#[from] gwydion_llm::ProviderError),

    /// Unrecoverable stream decoding failure reported in-band.
    #[error("stream error: {0}")]
    Stream(String),

    /// MCP operation failure.
    #[error("MCP error: {0}")]
    Mcp(#[from] gwydion_mcp::McpError),

    /// Persistence failure. The orchestrator logs and absorbs these; the
    /// variant exists for callers driving stores directly.
    #[error("store error: {0}")]
    Store(#[from] gwydion_session::StoreError),

    /// Dispatch requested an unregistered tool id.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Parsed arguments do not satisfy the declared parameter constraints.
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// A tool's own failure.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Gated by policy or user refusal.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Cooperative cancellation.
    #[error("cancelled")]
    Cancelled,

    /// The turn-count guard tripped.
    #[error("tool turn limit exceeded ({0} turns)")]
    TurnLimit(u32),
}
