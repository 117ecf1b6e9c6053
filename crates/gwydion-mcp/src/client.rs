//! MCP client for communicating with a single MCP server.
//!
//! The client layers the MCP handshake and tool operations over a
//! [`McpTransport`], tracking its own state machine: `Disconnected` →
//! `Connecting` → `Initializing` → `Ready`, with `Failed` absorbing any
//! error until explicit teardown. Requests are accepted only when `Ready`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolInfo,
};
use crate::transport::{HttpTransportConfig, McpTransport};

/// Default per-request timeout. A timed-out request fails alone; the
/// connection stays up.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler invoked when the server announces a changed tool set.
pub type ToolsChangedHandler = Box<dyn Fn(&str) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Transport kind for an MCP server connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawn a child process and speak framed stdio.
    #[default]
    Stdio,
    /// POST JSON-RPC messages to a remote endpoint.
    Http,
}

/// Configuration for one MCP server connection.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Transport kind.
    pub transport: TransportKind,
    /// Command to spawn (stdio).
    pub command: String,
    /// Arguments for the command (stdio).
    pub args: Vec<String>,
    /// Environment augmentation for the child (stdio).
    pub env: Vec<(String, String)>,
    /// Endpoint URL (HTTP).
    pub url: Option<String>,
    /// Extra HTTP headers (HTTP).
    pub headers: Vec<(String, String)>,
    /// Per-request timeout override.
    pub request_timeout: Option<Duration>,
}

impl McpServerConfig {
    /// Create a stdio server config.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            url: None,
            headers: Vec::new(),
            request_timeout: None,
        }
    }

    /// Create an HTTP server config.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            command: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            url: Some(url.into()),
            headers: Vec::new(),
            request_timeout: None,
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of an MCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Failed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// An MCP client connected to a single server.
pub struct McpClient {
    config: McpServerConfig,
    transport: Mutex<Option<Arc<McpTransport>>>,
    state: Mutex<ClientState>,
    request_id: AtomicU64,
    server_info: Mutex<Option<ServerInfo>>,
    capabilities: Mutex<ServerCapabilities>,
    tools_changed: Arc<Mutex<Option<ToolsChangedHandler>>>,
    request_timeout: Duration,
}

impl McpClient {
    /// Create a client for the given server. No connection is made until
    /// [`connect`](Self::connect).
    pub fn new(config: McpServerConfig) -> Self {
        let request_timeout = config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        Self {
            config,
            transport: Mutex::new(None),
            state: Mutex::new(ClientState::Disconnected),
            request_id: AtomicU64::new(1),
            server_info: Mutex::new(None),
            capabilities: Mutex::new(ServerCapabilities::default()),
            tools_changed: Arc::new(Mutex::new(None)),
            request_timeout,
        }
    }

    /// Server name from the config.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current client state.
    pub fn state(&self) -> ClientState {
        *self.state.lock().unwrap()
    }

    /// Whether the client accepts requests.
    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready
    }

    /// Server info captured during the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    /// Server capabilities captured during the handshake.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.lock().unwrap().clone()
    }

    /// Install the handler fired on `notifications/tools/list_changed`.
    pub fn on_tools_changed(&self, handler: ToolsChangedHandler) {
        *self.tools_changed.lock().unwrap() = Some(handler);
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap() = state;
    }

    fn transport(&self) -> Result<Arc<McpTransport>> {
        self.transport
            .lock()
            .unwrap()
            .clone()
            .ok_or(McpError::Disconnected)
    }

    /// Bring up the transport and perform the MCP handshake.
    ///
    /// On success the client is `Ready`; on any failure it is `Failed` and
    /// stays so until [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ClientState::Connecting);

        let transport = match self.build_transport() {
            Ok(t) => Arc::new(t),
            Err(e) => {
                self.set_state(ClientState::Failed);
                return Err(e);
            }
        };

        // Route tool-set-change notifications to the observable callback
        // before any request can trigger one.
        let tools_changed = Arc::clone(&self.tools_changed);
        let server_name = self.config.name.clone();
        transport.set_notification_handler(Box::new(move |n: JsonRpcNotification| {
            if n.method == methods::NOTIFY_TOOLS_LIST_CHANGED {
                let guard = tools_changed.lock().unwrap();
                if let Some(handler) = guard.as_ref() {
                    handler(&server_name);
                }
            } else {
                tracing::debug!(method = %n.method, "unhandled server notification");
            }
        }));

        *self.transport.lock().unwrap() = Some(Arc::clone(&transport));

        self.set_state(ClientState::Initializing);
        if let Err(e) = self.initialize(&transport).await {
            tracing::error!(server = %self.config.name, error = %e, "initialize handshake failed");
            self.set_state(ClientState::Failed);
            transport.disconnect().await;
            return Err(e);
        }

        self.set_state(ClientState::Ready);
        tracing::info!(server = %self.config.name, "MCP server ready");
        Ok(())
    }

    fn build_transport(&self) -> Result<McpTransport> {
        match self.config.transport {
            TransportKind::Stdio => {
                McpTransport::spawn_stdio(&self.config.command, &self.config.args, &self.config.env)
            }
            TransportKind::Http => {
                let url = self
                    .config
                    .url
                    .as_ref()
                    .ok_or_else(|| McpError::transport("HTTP transport requires a URL"))?;
                let mut http = HttpTransportConfig::new(url).with_timeout(self.request_timeout);
                for (key, value) in &self.config.headers {
                    http = http.with_header(key, value);
                }
                McpTransport::connect_http(http)
            }
        }
    }

    async fn initialize(&self, transport: &McpTransport) -> Result<()> {
        let params = InitializeParams::default();
        let result = self
            .raw_request(
                transport,
                methods::INITIALIZE,
                Some(serde_json::to_value(&params)?),
            )
            .await?;

        let init: InitializeResult = serde_json::from_value(result)?;
        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );

        *self.server_info.lock().unwrap() = Some(init.server_info);
        *self.capabilities.lock().unwrap() = init.capabilities;

        transport
            .send_notification(&JsonRpcNotification::new(methods::NOTIFY_INITIALIZED, None))
            .await
    }

    /// Issue a request with correlation and the per-request timeout.
    async fn raw_request(
        &self,
        transport: &McpTransport,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = tokio::time::timeout(self.request_timeout, transport.send_request(&request))
            .await
            .map_err(|_| McpError::timeout(method))??;

        response
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))
    }

    /// Issue a request, requiring the `Ready` state.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let state = self.state();
        if state != ClientState::Ready {
            return Err(McpError::NotReady(state.to_string()));
        }
        let transport = self.transport()?;
        self.raw_request(&transport, method, params).await
    }

    /// List the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let result = self.request(methods::TOOLS_LIST, None).await?;
        let list: ListToolsResult = serde_json::from_value(result)?;

        tracing::debug!(
            server = %self.config.name,
            tool_count = list.tools.len(),
            "listed MCP tools"
        );
        Ok(list.tools)
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result = self
            .request(methods::TOOLS_CALL, Some(serde_json::to_value(&params)?))
            .await?;
        let call: CallToolResult = serde_json::from_value(result)?;

        if call.is_error() {
            tracing::warn!(server = %self.config.name, tool = %name, "tool call returned error");
        } else {
            tracing::debug!(server = %self.config.name, tool = %name, "tool call succeeded");
        }
        Ok(call)
    }

    /// Tear down the connection. Pending requests fail with a
    /// transport-disconnected error.
    pub async fn disconnect(&self) {
        // Take the transport out before awaiting so the guard is not held
        // across the suspension point.
        let transport = self.transport.lock().unwrap().take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        self.set_state(ClientState::Disconnected);
        tracing::info!(server = %self.config.name, "MCP client disconnected");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
