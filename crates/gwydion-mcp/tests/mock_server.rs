//! Mock MCP server for integration testing.
//!
//! A small stdio server that answers initialize, tools/list, and tools/call
//! with Content-Length framing.
//!
//! Usage:
//!   mock-mcp-server [--delay-ms N] [--crash-on TOOL]
//!
//! Options:
//!   --delay-ms N     Add N ms delay to all responses
//!   --crash-on TOOL  Exit with code 1 when TOOL is called
//!
//! Tools:
//!   ping    {msg}        -> "pong: <msg>"
//!   add     {a, b}       -> "<a + b>"
//!   slow    {delay_ms}   -> sleeps, then reports
//!   notify  {}           -> emits notifications/tools/list_changed first

#![allow(dead_code)]

use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

struct ServerConfig {
    delay_ms: u64,
    crash_on: Option<String>,
}

impl ServerConfig {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = Self {
            delay_ms: 0,
            crash_on: None,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--delay-ms" if i + 1 < args.len() => {
                    config.delay_ms = args[i + 1].parse().unwrap_or(0);
                    i += 2;
                }
                "--crash-on" if i + 1 < args.len() => {
                    config.crash_on = Some(args[i + 1].clone());
                    i += 2;
                }
                _ => i += 1,
            }
        }

        config
    }
}

fn write_framed(stdout: &mut impl Write, message: &impl Serialize) {
    let body = serde_json::to_string(message).unwrap();
    write!(stdout, "Content-Length: {}\r\n\r\n{}", body.len(), body).unwrap();
    stdout.flush().unwrap();
}

fn main() {
    let config = ServerConfig::from_args();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());

    loop {
        // Read headers up to the blank line.
        let mut header_line = String::new();
        let mut content_length: Option<usize> = None;

        loop {
            header_line.clear();
            if reader.read_line(&mut header_line).unwrap_or(0) == 0 {
                return; // EOF: parent closed stdin.
            }

            let trimmed = header_line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some(len) = trimmed.strip_prefix("Content-Length:") {
                content_length = Some(len.trim().parse().unwrap());
            }
        }

        let content_length = match content_length {
            Some(len) => len,
            None => continue,
        };

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        let body_str = String::from_utf8(body).unwrap();

        // Notifications have no id; skip them.
        let request: JsonRpcRequest = match serde_json::from_str(&body_str) {
            Ok(req) => req,
            Err(_) => continue,
        };

        if config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(config.delay_ms));
        }

        handle_request(&request, &config, &mut stdout);
    }
}

fn handle_request(request: &JsonRpcRequest, config: &ServerConfig, stdout: &mut impl Write) {
    let result = match request.method.as_str() {
        "initialize" => Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "mock-mcp-server", "version": "1.0.0" }
        })),
        "tools/list" => Some(json!({
            "tools": [
                {
                    "name": "ping",
                    "description": "Reply with pong",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "msg": { "type": "string" } },
                        "required": ["msg"]
                    }
                },
                {
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": { "type": "number" },
                            "b": { "type": "number" }
                        },
                        "required": ["a", "b"]
                    }
                },
                {
                    "name": "slow",
                    "description": "A slow tool for testing timeouts",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "delay_ms": { "type": "number" } }
                    }
                },
                {
                    "name": "notify",
                    "description": "Emit a tools/list_changed notification",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        })),
        "tools/call" => {
            let params = request.params.clone().unwrap_or(json!({}));
            let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(json!({}));

            if config.crash_on.as_deref() == Some(tool_name) {
                std::process::exit(1);
            }

            match tool_name {
                "ping" => {
                    let msg = args.get("msg").and_then(|v| v.as_str()).unwrap_or("");
                    Some(json!({
                        "content": [{ "type": "text", "text": format!("pong: {msg}") }]
                    }))
                }
                "add" => {
                    let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    Some(json!({
                        "content": [{ "type": "text", "text": format!("{}", a + b) }]
                    }))
                }
                "slow" => {
                    let delay = args.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(1000);
                    thread::sleep(Duration::from_millis(delay));
                    Some(json!({
                        "content": [{ "type": "text", "text": format!("slept {delay} ms") }]
                    }))
                }
                "notify" => {
                    // Push the notification before the response so the
                    // client's demultiplexer has to route around it.
                    write_framed(
                        stdout,
                        &json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/tools/list_changed"
                        }),
                    );
                    Some(json!({
                        "content": [{ "type": "text", "text": "notified" }]
                    }))
                }
                _ => Some(json!({
                    "content": [{ "type": "text", "text": format!("Unknown tool: {tool_name}") }],
                    "isError": true
                })),
            }
        }
        _ => None,
    };

    let error = if result.is_none() {
        Some(json!({
            "code": -32601,
            "message": format!("Method not found: {}", request.method)
        }))
    } else {
        None
    };

    write_framed(
        stdout,
        &JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result,
            error,
        },
    );
}
