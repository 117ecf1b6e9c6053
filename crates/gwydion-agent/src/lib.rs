//! Session orchestration, tool dispatch, and permissions for the Gwydion
//! agent runtime.
//!
//! This crate ties the runtime together: a [`Session`] drives an LLM
//! provider through the reason→act loop, dispatching streamed tool calls
//! through a shared [`ToolRegistry`] under a [`PermissionEngine`] policy,
//! and persisting history through a pluggable message store.
//!
//! # Architecture
//!
//! ```text
//!  prompt ──► Session ──► Provider stream ──► text deltas ──► observers
//!                │                │
//!                │          tool calls
//!                ▼                ▼
//!        PermissionEngine ──► ToolRegistry ──► workers (fan-out)
//!                                  │
//!          results (request order) ┴──► history ──► next turn
//! ```
//!
//! MCP servers plug in through [`McpToolBridge`], which wraps each remote
//! tool as an ordinary registry entry.

pub mod context;
pub mod error;
pub mod history;
pub mod mcp;
pub mod permission;
pub mod registry;
pub mod session;
pub mod skill;
pub mod tool;
pub mod tools;

pub use context::{
    ChildSessionFn, QuestionHandler, QuestionInfo, QuestionResponse, SharedQuestionHandler,
    ToolContext,
};
pub use error::{AgentError, Result};
pub use history::{TruncateLimits, PRUNED_PLACEHOLDER, TRUNCATED_MARKER};
pub use mcp::{McpToolBridge, MCP_TOOL_PREFIX};
pub use permission::{AgentConfig, AgentType, Permission, PermissionEngine};
pub use registry::ToolRegistry;
pub use session::{ChildSessionFactory, Session, SessionBuilder, SessionConfig};
pub use skill::{SkillInfo, SkillRegistry};
pub use tool::{definition_for, input_schema, ParamType, ParameterSchema, Tool, ToolOutput};
pub use tools::{SkillTool, TaskTool, SKILL_TOOL_ID};
