//! Model Context Protocol client for the Gwydion agent runtime.
//!
//! Speaks JSON-RPC 2.0 to external tool servers over framed stdio pipes or
//! HTTP POST, discovers their tools at runtime, and exposes the protocol
//! operations the agent's tool bridge builds on.
//!
//! # Example
//!
//! ```rust,ignore
//! use gwydion_mcp::{McpClient, McpServerConfig};
//!
//! let client = McpClient::new(
//!     McpServerConfig::stdio("sqlite", "mcp-server-sqlite")
//!         .with_arg("--db")
//!         .with_arg("/path/to/db.sqlite"),
//! );
//! client.connect().await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! let result = client.call_tool("query", Some(json!({"sql": "select 1"}))).await?;
//! ```

pub mod client;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, McpClient, McpServerConfig, ToolsChangedHandler, TransportKind};
pub use error::{McpError, Result};
pub use manager::McpManager;
pub use protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerCapabilities, ServerInfo, ToolContent, ToolInfo, ToolsCapability,
    MCP_PROTOCOL_VERSION,
};
pub use transport::{
    HttpTransport, HttpTransportConfig, McpTransport, NotificationHandler, StdioTransport,
    TransportState,
};
