use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::server::DebugServer;

/// MCP server implementation
///
/// Exposes the crash-dump debugging pipeline as MCP tools over the JSON-RPC
/// 2.0 stdio protocol.
pub(crate) async fn run_mcp_server(server: Arc<DebugServer>) -> Result<()> {
    info!("Starting MCP server on stdio");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read line from stdin")?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {}", trimmed);

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse JSON-RPC request: {}", e);
                let error_response = JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32700,
                        message: format!("Parse error: {}", e),
                    }),
                    id: None,
                };
                write_response(&stdout, &error_response)?;
                continue;
            }
        };

        let shutdown_requested = request.method == "shutdown";
        let response = handle_request(&server, request).await;
        write_response(&stdout, &response)?;

        if shutdown_requested {
            break;
        }
    }

    info!("MCP server shutting down");
    server.shutdown().await;
    Ok(())
}

/// JSON-RPC 2.0 Request
#[derive(Deserialize)]
pub(crate) struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    pub(crate) method: String,
    #[serde(default)]
    pub(crate) params: Option<Value>,
    pub(crate) id: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Serialize)]
pub(crate) struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<JsonRpcError>,
    pub(crate) id: Option<Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Serialize)]
pub(crate) struct JsonRpcError {
    pub(crate) code: i32,
    pub(crate) message: String,
}

/// MCP Tool Definition
#[derive(Serialize)]
struct McpToolDef {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn get_tools() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "open_dump".to_string(),
            description: "Open a Windows crash dump file in a new debugger session".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "dump_path": {
                        "type": "string",
                        "description": "Path to the .dmp file"
                    },
                    "symbols_path": {
                        "type": "string",
                        "description": "Optional symbol search path (-y)"
                    }
                },
                "required": ["dump_path"]
            }),
        },
        McpToolDef {
            name: "open_remote".to_string(),
            description: "Connect the debugger to a remote session".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "connection_string": {
                        "type": "string",
                        "description": "Remote connection string, e.g. tcp:Port=5005,Server=host"
                    },
                    "symbols_path": {
                        "type": "string",
                        "description": "Optional symbol search path (-y)"
                    }
                },
                "required": ["connection_string"]
            }),
        },
        McpToolDef {
            name: "close_session".to_string(),
            description: "Cancel outstanding commands and stop the debugger session".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        },
        McpToolDef {
            name: "list_dumps".to_string(),
            description: "Recursively list *.dmp files under a directory, newest first".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "directory": {
                        "type": "string",
                        "description": "Directory to search"
                    }
                },
                "required": ["directory"]
            }),
        },
        McpToolDef {
            name: "run_command_async".to_string(),
            description: "Queue a debugger command; returns a commandId to poll. \
                          Results are never returned here; poll get_command_status."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Verbatim debugger command line, e.g. !analyze -v"
                    }
                },
                "required": ["command"]
            }),
        },
        McpToolDef {
            name: "get_command_status".to_string(),
            description: "Status of a queued command: queued, executing, completed, \
                          cancelled, or failed; carries the result once completed"
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command_id": {
                        "type": "string",
                        "description": "Id returned by run_command_async"
                    }
                },
                "required": ["command_id"]
            }),
        },
        McpToolDef {
            name: "cancel_command".to_string(),
            description: "Cancel a queued or executing command".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command_id": {
                        "type": "string",
                        "description": "Id returned by run_command_async"
                    }
                },
                "required": ["command_id"]
            }),
        },
        McpToolDef {
            name: "list_commands".to_string(),
            description: "Snapshot of the currently executing and queued commands".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

pub(crate) async fn handle_request(
    server: &Arc<DebugServer>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();

    match request.method.as_str() {
        "initialize" => {
            debug!("Handling initialize");
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {
                        "tools": {},
                        "resources": {}
                    },
                    "serverInfo": {
                        "name": "cdb-mcp",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
                error: None,
                id,
            }
        }
        "notifications/initialized" => {
            debug!("Handling initialized notification");
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: None,
                id: None,
            }
        }
        "tools/list" => {
            debug!("Handling tools/list");
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(serde_json::json!({
                    "tools": get_tools()
                })),
                error: None,
                id,
            }
        }
        "resources/list" => {
            debug!("Handling resources/list");
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(serde_json::json!({
                    "resources": crate::resources::resources()
                })),
                error: None,
                id,
            }
        }
        "resources/read" => {
            debug!("Handling resources/read");
            let uri = request
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            match crate::resources::resource_text(uri) {
                Some(resource) => JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: Some(serde_json::json!({
                        "contents": [
                            {
                                "uri": resource.uri,
                                "mimeType": resource.mime_type,
                                "text": resource.text
                            }
                        ]
                    })),
                    error: None,
                    id,
                },
                None => JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32602,
                        message: format!("Unknown resource: {uri}"),
                    }),
                    id,
                },
            }
        }
        "tools/call" => {
            debug!("Handling tools/call");
            match handle_tool_call(server, request.params).await {
                Ok(result) => JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: Some(result),
                    error: None,
                    id,
                },
                Err(e) => JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32603,
                        message: e.to_string(),
                    }),
                    id,
                },
            }
        }
        "shutdown" => {
            debug!("Handling shutdown");
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(serde_json::json!({})),
                error: None,
                id,
            }
        }
        _ => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", request.method),
            }),
            id,
        },
    }
}

async fn handle_tool_call(server: &Arc<DebugServer>, params: Option<Value>) -> Result<Value> {
    let params = params.context("Missing params for tools/call")?;
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .context("Missing tool name")?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    debug!("Tool call: {} with args: {:?}", name, arguments);

    match name {
        "open_dump" => handle_open_dump(server, arguments).await,
        "open_remote" => handle_open_remote(server, arguments).await,
        "close_session" => handle_close_session(server).await,
        "list_dumps" => handle_list_dumps(arguments),
        "run_command_async" => handle_run_command_async(server, arguments),
        "get_command_status" => handle_get_command_status(server, arguments),
        "cancel_command" => handle_cancel_command(server, arguments),
        "list_commands" => handle_list_commands(server),
        _ => anyhow::bail!("Unknown tool: {}", name),
    }
}

fn text_content(text: String) -> Value {
    serde_json::json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ]
    })
}

fn json_content(payload: &Value) -> Result<Value> {
    Ok(text_content(serde_json::to_string_pretty(payload)?))
}

async fn handle_open_dump(server: &Arc<DebugServer>, args: Value) -> Result<Value> {
    let dump_path = args
        .get("dump_path")
        .and_then(|v| v.as_str())
        .context("Missing dump_path argument")?;
    let symbols_path = args
        .get("symbols_path")
        .and_then(|v| v.as_str())
        .map(String::from);

    match server.open_dump(dump_path, symbols_path).await {
        Ok(message) => Ok(text_content(message)),
        Err(e) => Ok(text_content(format!("Error: {e}"))),
    }
}

async fn handle_open_remote(server: &Arc<DebugServer>, args: Value) -> Result<Value> {
    let connection = args
        .get("connection_string")
        .and_then(|v| v.as_str())
        .context("Missing connection_string argument")?;
    let symbols_path = args
        .get("symbols_path")
        .and_then(|v| v.as_str())
        .map(String::from);

    match server.open_remote(connection, symbols_path).await {
        Ok(message) => Ok(text_content(message)),
        Err(e) => Ok(text_content(format!("Error: {e}"))),
    }
}

async fn handle_close_session(server: &Arc<DebugServer>) -> Result<Value> {
    match server.close_session().await {
        Ok(message) => Ok(text_content(message)),
        Err(e) => Ok(text_content(format!("Error: {e}"))),
    }
}

fn handle_list_dumps(args: Value) -> Result<Value> {
    let directory = args
        .get("directory")
        .and_then(|v| v.as_str())
        .context("Missing directory argument")?;

    match crate::dumps::list_dump_files(std::path::Path::new(directory)) {
        Ok(dumps) => Ok(text_content(crate::dumps::format_dump_listing(&dumps))),
        Err(e) => Ok(text_content(format!("Error: {e}"))),
    }
}

fn handle_run_command_async(server: &Arc<DebugServer>, args: Value) -> Result<Value> {
    let command = args
        .get("command")
        .and_then(|v| v.as_str())
        .context("Missing command argument")?;

    match server.run_command_async(command) {
        Ok(payload) => json_content(&payload),
        Err(e) => Ok(text_content(format!("Error: {e}"))),
    }
}

fn handle_get_command_status(server: &Arc<DebugServer>, args: Value) -> Result<Value> {
    let command_id = args
        .get("command_id")
        .and_then(|v| v.as_str())
        .context("Missing command_id argument")?;

    json_content(&server.command_status(command_id))
}

fn handle_cancel_command(server: &Arc<DebugServer>, args: Value) -> Result<Value> {
    let command_id = args
        .get("command_id")
        .and_then(|v| v.as_str())
        .context("Missing command_id argument")?;

    let cancelled = server.cancel_command(command_id, "cancelled by client");
    json_content(&serde_json::json!({
        "commandId": command_id,
        "cancelled": cancelled,
    }))
}

fn handle_list_commands(server: &Arc<DebugServer>) -> Result<Value> {
    json_content(&server.list_commands())
}

fn write_response(stdout: &std::io::Stdout, response: &JsonRpcResponse) -> Result<()> {
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, response).context("Failed to serialize response")?;
    out.write_all(b"\n")
        .context("Failed to write newline to stdout")?;
    out.flush().context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
#[path = "mcp_server_tests.rs"]
mod tests;
