//! Bridge exposing remote MCP tools as local [`Tool`]s.
//!
//! Each discovered tool registers under `mcp_<server>_<tool>` (underscores:
//! provider tool-name charsets reject most punctuation). The bridge holds a
//! shared reference to its client; a call after disconnect returns a
//! structured tool error, never a crash or a block.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use gwydion_mcp::{McpClient, McpError, ToolInfo};

use crate::context::ToolContext;
use crate::error::Result;
use crate::tool::{ParamType, ParameterSchema, Tool, ToolOutput};

/// Prefix for bridged tool ids.
pub const MCP_TOOL_PREFIX: &str = "mcp";

/// A remote MCP tool wrapped as a local tool.
pub struct McpToolBridge {
    /// Registry id: `mcp_<server>_<tool>`.
    id: String,
    /// Server the tool lives on.
    server_name: String,
    /// The tool's name on that server.
    tool_name: String,
    /// Description from discovery.
    description: String,
    /// Parameters projected from the server's JSON Schema.
    parameters: Vec<ParameterSchema>,
    /// Shared client; the manager owns its lifetime.
    client: Arc<McpClient>,
}

impl McpToolBridge {
    /// Wrap one discovered tool.
    pub fn new(client: Arc<McpClient>, info: &ToolInfo) -> Self {
        let server_name = client.name().to_string();
        let id = format!("{MCP_TOOL_PREFIX}_{server_name}_{}", info.name);

        let description = info
            .description
            .clone()
            .unwrap_or_else(|| format!("MCP tool: {}", info.name));

        Self {
            id,
            server_name,
            tool_name: info.name.clone(),
            description,
            parameters: project_parameters(info.input_schema.as_ref()),
            client,
        }
    }

    /// Discover every tool on a client and wrap each one.
    pub async fn discover(client: Arc<McpClient>) -> std::result::Result<Vec<Self>, McpError> {
        let tools = client.list_tools().await?;
        Ok(tools
            .iter()
            .map(|info| Self::new(Arc::clone(&client), info))
            .collect())
    }

    /// Server the tool lives on.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The tool's name on its server.
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }
}

/// Project a JSON Schema `properties` map into parameter rows.
///
/// Missing `type` defaults to string; missing `description` to empty;
/// `required` membership, `default`, and `enum` carry over when present.
fn project_parameters(schema: Option<&Value>) -> Vec<ParameterSchema> {
    let Some(schema) = schema else {
        return Vec::new();
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| {
            let param_type = prop
                .get("type")
                .and_then(|t| t.as_str())
                .map(ParamType::from_schema_str)
                .unwrap_or(ParamType::String);
            let description = prop
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();

            let mut param = ParameterSchema::new(
                name.clone(),
                param_type,
                description,
                required.contains(&name.as_str()),
            );
            if let Some(default) = prop.get("default") {
                param = param.with_default(default.clone());
            }
            if let Some(values) = prop.get("enum").and_then(|e| e.as_array()) {
                param = param.with_enum(values.clone());
            }
            param
        })
        .collect()
}

#[async_trait]
impl Tool for McpToolBridge {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        if !self.client.is_ready() {
            return Ok(ToolOutput::error(format!(
                "MCP server '{}' is not connected",
                self.server_name
            )));
        }

        tracing::debug!(
            server = %self.server_name,
            tool = %self.tool_name,
            "executing MCP tool"
        );

        let result = match self.client.call_tool(&self.tool_name, Some(args)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    server = %self.server_name,
                    tool = %self.tool_name,
                    error = %e,
                    "MCP tool call failed"
                );
                return Ok(ToolOutput::error(format!("MCP error: {e}")));
            }
        };

        let text = result.text();
        if result.is_error() {
            Ok(ToolOutput::error(if text.is_empty() {
                "MCP tool reported an error".to_string()
            } else {
                text
            }))
        } else {
            Ok(ToolOutput::text(text))
        }
    }
}

impl std::fmt::Debug for McpToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolBridge")
            .field("id", &self.id)
            .field("server_name", &self.server_name)
            .field("tool_name", &self.tool_name)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
