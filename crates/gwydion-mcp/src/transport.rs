//! Transport layer for MCP communication.
//!
//! Local servers run as child processes speaking Content-Length framed
//! JSON-RPC over stdio; remote servers take HTTP POSTs with one correlated
//! JSON-RPC response per request (the minimal documented behavior — no
//! persistent SSE stream).
//!
//! The stdio transport owns a dedicated reader task: it parses the framed
//! stream from the child's stdout, routes responses by request id to the
//! awaiting producers, and hands notifications to the installed handler.
//! Pending-request holders live in a mutex-guarded map; an entry is removed
//! under the lock before its holder is completed, so double-completion is
//! impossible.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// How long a disconnect waits for the child to exit after stdin closes
/// before hard-killing it.
const GRACEFUL_EXIT_WAIT: Duration = Duration::from_millis(100);

/// Handler invoked for server-initiated notifications.
pub type NotificationHandler = Box<dyn Fn(JsonRpcNotification) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Transport State
// ─────────────────────────────────────────────────────────────────────────────

/// Connection state of a transport.
///
/// `Failed` absorbs: it persists until explicit teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: TransportState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> TransportState {
        match self.0.load(Ordering::SeqCst) {
            0 => TransportState::Disconnected,
            1 => TransportState::Connecting,
            2 => TransportState::Connected,
            _ => TransportState::Failed,
        }
    }

    fn set(&self, state: TransportState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

type PendingMap = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type HandlerSlot = Arc<std::sync::Mutex<Option<NotificationHandler>>>;

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Stdio transport - communicates with a child process via framed pipes.
pub struct StdioTransport {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pending: PendingMap,
    handler: HandlerSlot,
    state: Arc<StateCell>,
    stopped: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader loop.
    ///
    /// The configured environment augments (does not replace) the inherited
    /// one. The child's stderr goes to the bit bucket so the protocol
    /// channel stays clean.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self> {
        let state = Arc::new(StateCell::new(TransportState::Connecting));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            state.set(TransportState::Failed);
            McpError::spawn_failed(format!("failed to spawn '{command}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;

        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let handler: HandlerSlot = Arc::new(std::sync::Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(reader_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&handler),
            Arc::clone(&state),
            Arc::clone(&stopped),
        ));

        state.set(TransportState::Connected);
        tracing::info!(command, "stdio transport connected");

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
            pending,
            handler,
            state,
            stopped,
        })
    }

    /// Install the notification handler.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    /// Send a request and await its correlated response.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        if self.state.get() != TransportState::Connected {
            return Err(McpError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request.id, tx);

        if let Err(e) = self.write_message(&serde_json::to_value(request)?).await {
            self.pending.lock().unwrap().remove(&request.id);
            return Err(e);
        }

        // The reader loop completes the holder; a dropped sender means the
        // transport went down with the request outstanding.
        rx.await.map_err(|_| McpError::Disconnected)
    }

    /// Send a notification (no response expected).
    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        if self.state.get() != TransportState::Connected {
            return Err(McpError::Disconnected);
        }
        self.write_message(&serde_json::to_value(notification)?)
            .await
    }

    async fn write_message(&self, message: &Value) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::Disconnected)?;
        stdin.write_all(framed.as_bytes()).await?;
        stdin.flush().await?;

        tracing::trace!(content_length = body.len(), "sent MCP message");
        Ok(())
    }

    /// Tear the transport down.
    ///
    /// Sequence: flag stopped, close stdin (the graceful termination signal
    /// for stdio servers), wait briefly for exit, hard-kill if still alive,
    /// join the reader, fail all pending requests.
    pub async fn disconnect(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        // Closing stdin gives the child its EOF.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(GRACEFUL_EXIT_WAIT, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!("child did not exit on stdin close, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(reader) = self.reader.lock().await.take() {
            // The reader ends once the child's stdout closes; the timeout is
            // a backstop against a wedged pipe.
            if tokio::time::timeout(Duration::from_secs(1), reader)
                .await
                .is_err()
            {
                tracing::warn!("reader task did not stop, aborting");
            }
        }

        fail_pending(&self.pending);
        self.state.set(TransportState::Disconnected);
        tracing::info!("stdio transport disconnected");
    }

    /// Whether the child process is still running.
    pub async fn is_connected(&self) -> bool {
        if self.state.get() != TransportState::Connected {
            return false;
        }
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Drop every pending holder so awaiting producers resolve with a
/// transport-disconnected error.
fn fail_pending(pending: &PendingMap) {
    let drained: Vec<_> = pending.lock().unwrap().drain().collect();
    if !drained.is_empty() {
        tracing::debug!(count = drained.len(), "failing pending requests on disconnect");
    }
    // Dropping the senders resolves each receiver with a channel error,
    // surfaced as McpError::Disconnected.
}

/// Parse framed messages from the child's stdout and route them.
async fn reader_loop(
    stdout: ChildStdout,
    pending: PendingMap,
    handler: HandlerSlot,
    state: Arc<StateCell>,
    stopped: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(body)) => {
                let message: Value = match serde_json::from_str(&body) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse framed JSON message");
                        continue;
                    }
                };
                route_message(message, &pending, &handler);
            }
            Ok(None) => {
                if !stopped.load(Ordering::SeqCst) {
                    tracing::warn!("reader: pipe closed unexpectedly");
                    state.set(TransportState::Failed);
                }
                break;
            }
            Err(e) => {
                if !stopped.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "reader: framing error");
                    state.set(TransportState::Failed);
                }
                break;
            }
        }
    }

    // Nothing will complete outstanding holders once the reader is gone.
    fail_pending(&pending);
}

/// Route one incoming message: responses demultiplex by id, notifications
/// go to the installed handler.
fn route_message(message: Value, pending: &PendingMap, handler: &HandlerSlot) {
    match IncomingMessage::classify(message) {
        Some(IncomingMessage::Response(response)) => {
            // Removed under the lock before the holder is signaled.
            let holder = pending.lock().unwrap().remove(&response.id);
            match holder {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    tracing::warn!(id = response.id, "response for unknown request id");
                }
            }
        }
        Some(IncomingMessage::Notification(notification)) => {
            tracing::debug!(method = %notification.method, "notification received");
            let guard = handler.lock().unwrap();
            if let Some(handler) = guard.as_ref() {
                handler(notification);
            }
        }
        None => {
            tracing::warn!("unclassifiable JSON-RPC message");
        }
    }
}

/// Read one `Content-Length` framed message. Returns `None` on EOF.
async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(
                value
                    .trim()
                    .parse()
                    .map_err(|e| McpError::protocol(format!("invalid Content-Length: {e}")))?,
            );
        }
    }

    let content_length =
        content_length.ok_or_else(|| McpError::protocol("missing Content-Length header"))?;

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| McpError::protocol(format!("invalid UTF-8 in message: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// URL of the MCP server endpoint.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Headers attached to every request.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

impl HttpTransportConfig {
    /// Create a config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// HTTP transport - each JSON-RPC message travels as one POST whose body is
/// the correlated JSON-RPC response.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    state: StateCell,
}

impl HttpTransport {
    /// Validate the URL and build the client.
    pub fn connect(config: HttpTransportConfig) -> Result<Self> {
        url::Url::parse(&config.url)
            .map_err(|e| McpError::transport(format!("invalid URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(url = %config.url, "HTTP transport connected");

        Ok(Self {
            client,
            config,
            state: StateCell::new(TransportState::Connected),
        })
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn post(&self, body: String) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(body);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::transport(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::transport(format!("HTTP error {status}: {body}")));
        }
        Ok(response)
    }

    /// Send a request and parse the correlated response from the body.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self.post(serde_json::to_string(request)?).await?;
        let text = response
            .text()
            .await
            .map_err(|e| McpError::transport(format!("failed to read response body: {e}")))?;
        let parsed: JsonRpcResponse = serde_json::from_str(&text)?;

        if parsed.id != request.id {
            return Err(McpError::protocol(format!(
                "response id {} does not match request id {}",
                parsed.id, request.id
            )));
        }
        Ok(parsed)
    }

    /// Send a notification; the response body is ignored.
    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        let _ = self.post(serde_json::to_string(notification)?).await?;
        Ok(())
    }

    /// Mark the transport torn down. Connection pooling is reqwest's concern.
    pub fn disconnect(&self) {
        self.state.set(TransportState::Disconnected);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unified Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport for communicating with an MCP server.
pub enum McpTransport {
    /// Child process over framed stdio.
    Stdio(StdioTransport),
    /// Remote server over HTTP POST.
    Http(HttpTransport),
}

impl McpTransport {
    /// Spawn a stdio transport.
    pub fn spawn_stdio(command: &str, args: &[String], env: &[(String, String)]) -> Result<Self> {
        Ok(Self::Stdio(StdioTransport::spawn(command, args, env)?))
    }

    /// Connect an HTTP transport.
    pub fn connect_http(config: HttpTransportConfig) -> Result<Self> {
        Ok(Self::Http(HttpTransport::connect(config)?))
    }

    /// Install the notification handler. Notifications over HTTP arrive in
    /// response bodies only, so the handler is a stdio concern.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        if let Self::Stdio(t) = self {
            t.set_notification_handler(handler);
        }
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        match self {
            Self::Stdio(t) => t.state(),
            Self::Http(t) => t.state(),
        }
    }

    /// Send a request and await the correlated response.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        match self {
            Self::Stdio(t) => t.send_request(request).await,
            Self::Http(t) => t.send_request(request).await,
        }
    }

    /// Send a notification.
    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        match self {
            Self::Stdio(t) => t.send_notification(notification).await,
            Self::Http(t) => t.send_notification(notification).await,
        }
    }

    /// Tear the transport down.
    pub async fn disconnect(&self) {
        match self {
            Self::Stdio(t) => t.disconnect().await,
            Self::Http(t) => t.disconnect(),
        }
    }

    /// Check if this is a stdio transport.
    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio(_))
    }

    /// Check if this is an HTTP transport.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
