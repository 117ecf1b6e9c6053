//! MCP manager for multi-server lifecycle management.
//!
//! The [`McpManager`] owns the set of configured clients: it connects them,
//! aggregates tool discovery across servers, and tears everything down on
//! shutdown. Servers that fail to connect are logged and skipped so one bad
//! server never blocks the rest.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{McpClient, McpServerConfig};
use crate::error::Result;
use crate::protocol::ToolInfo;

/// Manager for multiple MCP server connections.
#[derive(Default)]
pub struct McpManager {
    /// Server configurations (before connection).
    configs: HashMap<String, McpServerConfig>,
    /// Connected and initialized clients.
    clients: HashMap<String, Arc<McpClient>>,
}

impl McpManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with the given server configurations.
    pub fn with_configs(configs: Vec<McpServerConfig>) -> Self {
        let mut manager = Self::new();
        for config in configs {
            manager.add_server(config);
        }
        manager
    }

    /// Add a server configuration. Connection happens in
    /// [`connect_all`](Self::connect_all). Same-name configs replace.
    pub fn add_server(&mut self, config: McpServerConfig) {
        tracing::debug!(server = %config.name, "adding MCP server configuration");
        self.configs.insert(config.name.clone(), config);
    }

    /// Remove a server by name, disconnecting it if connected.
    pub async fn remove_server(&mut self, name: &str) -> bool {
        if let Some(client) = self.clients.remove(name) {
            client.disconnect().await;
        }
        self.configs.remove(name).is_some()
    }

    /// Names of all configured servers.
    pub fn server_names(&self) -> Vec<&str> {
        self.configs.keys().map(|s| s.as_str()).collect()
    }

    /// Names of all connected servers.
    pub fn connected_server_names(&self) -> Vec<&str> {
        self.clients.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a server is connected.
    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Get a connected client by name.
    pub fn get_client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.get(name).cloned()
    }

    /// Connect and initialize every configured server.
    ///
    /// Returns the number of successfully connected servers; failures are
    /// logged and skipped.
    pub async fn connect_all(&mut self) -> usize {
        let mut connected = 0;

        for (name, config) in &self.configs {
            if self.clients.contains_key(name) {
                tracing::debug!(server = %name, "server already connected, skipping");
                continue;
            }

            let client = Arc::new(McpClient::new(config.clone()));
            match client.connect().await {
                Ok(()) => {
                    self.clients.insert(name.clone(), client);
                    connected += 1;
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect MCP server");
                }
            }
        }

        tracing::info!(
            connected,
            total = self.configs.len(),
            "MCP server connection complete"
        );
        connected
    }

    /// List all tools from all connected servers, keyed by server name.
    pub async fn list_all_tools(&self) -> Result<HashMap<String, Vec<ToolInfo>>> {
        let mut all_tools = HashMap::new();

        for (name, client) in &self.clients {
            match client.list_tools().await {
                Ok(tools) => {
                    all_tools.insert(name.clone(), tools);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to list tools");
                }
            }
        }

        Ok(all_tools)
    }

    /// Disconnect every client.
    pub async fn shutdown_all(&mut self) {
        for (name, client) in self.clients.drain() {
            tracing::info!(server = %name, "shutting down MCP server");
            client.disconnect().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_configs() {
        let mut manager = McpManager::new();
        manager.add_server(McpServerConfig::stdio("a", "cmd-a"));
        manager.add_server(McpServerConfig::stdio("b", "cmd-b"));

        let mut names = manager.server_names();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!manager.is_connected("a"));
    }

    #[test]
    fn test_with_configs() {
        let manager = McpManager::with_configs(vec![
            McpServerConfig::stdio("one", "cmd"),
            McpServerConfig::http("two", "http://localhost:9999/mcp"),
        ]);
        assert_eq!(manager.server_names().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_all_skips_failures() {
        let mut manager = McpManager::new();
        manager.add_server(McpServerConfig::stdio("bad", "no-such-mcp-server-12345"));

        let connected = manager.connect_all().await;
        assert_eq!(connected, 0);
        assert!(manager.connected_server_names().is_empty());
        assert!(manager.get_client("bad").is_none());
    }

    #[tokio::test]
    async fn test_remove_server() {
        let mut manager = McpManager::new();
        manager.add_server(McpServerConfig::stdio("a", "cmd"));
        assert!(manager.remove_server("a").await);
        assert!(!manager.remove_server("a").await);
    }
}
