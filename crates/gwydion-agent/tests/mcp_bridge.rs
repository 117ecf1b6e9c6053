//! End-to-end test: MCP server tools bridged into the tool registry.

use std::path::PathBuf;
use std::sync::Arc;

use gwydion_agent::{McpToolBridge, ToolContext, ToolRegistry};
use gwydion_mcp::{McpClient, McpServerConfig};
use serde_json::json;

/// Path to the mock MCP server binary built by the gwydion-mcp package.
fn mock_server_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // crates
    path.pop(); // workspace root
    path.push("target");
    path.push(if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    });
    path.push("mock-mcp-server");
    path
}

#[tokio::test]
async fn test_bridged_ping_round_trip() {
    if !mock_server_path().exists() {
        eprintln!(
            "Skipping test: mock-mcp-server not built. Run `cargo build -p gwydion-mcp` first."
        );
        return;
    }

    let client = Arc::new(McpClient::new(McpServerConfig::stdio(
        "srv",
        mock_server_path().to_string_lossy(),
    )));
    client.connect().await.expect("connect failed");

    // Discovery wraps every server tool as a registry entry.
    let registry = ToolRegistry::new();
    for bridge in McpToolBridge::discover(Arc::clone(&client))
        .await
        .expect("discover failed")
    {
        registry.register(Arc::new(bridge));
    }

    let ping = registry.get("mcp_srv_ping").expect("bridged tool missing");
    let schema = gwydion_agent::input_schema(&ping.parameters());
    assert_eq!(schema["properties"]["msg"]["type"], "string");
    assert_eq!(schema["required"][0], "msg");

    let ctx = ToolContext::new("s1", "m1");
    let out = ping
        .execute(json!({"msg": "X"}), &ctx)
        .await
        .expect("execute failed");
    assert!(!out.is_error);
    assert_eq!(out.content, "pong: X");

    client.disconnect().await;

    // After teardown the bridge degrades to a structured error.
    let out = ping
        .execute(json!({"msg": "again"}), &ctx)
        .await
        .expect("execute failed");
    assert!(out.is_error);
    assert!(out.content.contains("not connected"));
}
