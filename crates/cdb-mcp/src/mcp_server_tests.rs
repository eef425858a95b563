use super::*;
use cdm_config::ServerConfig;

fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: Some(Value::from(1)),
    }
}

fn test_server() -> Arc<DebugServer> {
    Arc::new(DebugServer::new(ServerConfig::default()))
}

/// The "text" payload of an MCP content response, parsed back as JSON.
fn content_json(result: &Value) -> Value {
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn test_initialize_reports_server_info() {
    let server = test_server();
    let response = handle_request(&server, request("initialize", None)).await;

    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "cdb-mcp");
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_tools_list_exposes_all_tools() {
    let server = test_server();
    let response = handle_request(&server, request("tools/list", None)).await;

    let result = response.result.unwrap();
    let tools = result["tools"].as_array().unwrap();
    let names: Vec<&str> = tools
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "open_dump",
            "open_remote",
            "close_session",
            "list_dumps",
            "run_command_async",
            "get_command_status",
            "cancel_command",
            "list_commands",
        ]
    );
    for tool in tools {
        assert!(tool["inputSchema"]["type"].as_str() == Some("object"));
    }
}

#[tokio::test]
async fn test_resources_list_and_read() {
    let server = test_server();
    let response = handle_request(&server, request("resources/list", None)).await;
    let result = response.result.unwrap();
    assert_eq!(result["resources"].as_array().unwrap().len(), 2);

    let params = serde_json::json!({"uri": "cdb-mcp://docs/workflow"});
    let response = handle_request(&server, request("resources/read", Some(params))).await;
    let result = response.result.unwrap();
    let text = result["contents"][0]["text"].as_str().unwrap();
    assert!(text.contains("open_dump"));

    let params = serde_json::json!({"uri": "cdb-mcp://docs/nope"});
    let response = handle_request(&server, request("resources/read", Some(params))).await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_unknown_method_rejected() {
    let server = test_server();
    let response = handle_request(&server, request("bogus/method", None)).await;
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tool_call_without_params_rejected() {
    let server = test_server();
    let response = handle_request(&server, request("tools/call", None)).await;
    assert_eq!(response.error.unwrap().code, -32603);
}

#[tokio::test]
async fn test_unknown_tool_rejected() {
    let server = test_server();
    let params = serde_json::json!({"name": "bogus_tool", "arguments": {}});
    let response = handle_request(&server, request("tools/call", Some(params))).await;
    let error = response.error.unwrap();
    assert!(error.message.contains("Unknown tool"));
}

#[tokio::test]
async fn test_run_command_async_always_returns_queued() {
    let server = test_server();
    let params = serde_json::json!({
        "name": "run_command_async",
        "arguments": {"command": "version"}
    });
    let response = handle_request(&server, request("tools/call", Some(params))).await;

    let payload = content_json(&response.result.unwrap());
    assert_eq!(payload["status"], "queued");
    assert!(
        payload["commandId"]
            .as_str()
            .is_some_and(|id| id.starts_with("cmd-"))
    );
    assert!(payload["instructions"].as_str().unwrap().contains("get_command_status"));
}

#[tokio::test]
async fn test_open_dump_missing_file_reports_error_text() {
    let server = test_server();
    let params = serde_json::json!({
        "name": "open_dump",
        "arguments": {"dump_path": "/nonexistent/crash.dmp"}
    });
    let response = handle_request(&server, request("tools/call", Some(params))).await;

    // Tool-level failures come back as error text, not JSON-RPC errors.
    let result = response.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Error:"), "{text}");
}

#[tokio::test]
async fn test_open_dump_missing_argument_is_rpc_error() {
    let server = test_server();
    let params = serde_json::json!({"name": "open_dump", "arguments": {}});
    let response = handle_request(&server, request("tools/call", Some(params))).await;
    let error = response.error.unwrap();
    assert!(error.message.contains("dump_path"));
}

#[tokio::test]
async fn test_get_command_status_unknown_id() {
    let server = test_server();
    let params = serde_json::json!({
        "name": "get_command_status",
        "arguments": {"command_id": "cmd-missing"}
    });
    let response = handle_request(&server, request("tools/call", Some(params))).await;

    let payload = content_json(&response.result.unwrap());
    assert_eq!(payload["status"], "not_found");
}

#[tokio::test]
async fn test_cancel_unknown_command_is_false() {
    let server = test_server();
    let params = serde_json::json!({
        "name": "cancel_command",
        "arguments": {"command_id": "cmd-missing"}
    });
    let response = handle_request(&server, request("tools/call", Some(params))).await;

    let payload = content_json(&response.result.unwrap());
    assert_eq!(payload["cancelled"], false);
}

#[tokio::test]
async fn test_list_commands_reports_inactive_session() {
    let server = test_server();
    let params = serde_json::json!({"name": "list_commands", "arguments": {}});
    let response = handle_request(&server, request("tools/call", Some(params))).await;

    let payload = content_json(&response.result.unwrap());
    assert_eq!(payload["sessionActive"], false);
    assert!(payload["queued"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_acknowledged() {
    let server = test_server();
    let response = handle_request(&server, request("shutdown", None)).await;
    assert!(response.result.is_some());
    assert!(response.error.is_none());
}
