//! MCP (Model Context Protocol) JSON-RPC 2.0 stdio front-end.
//!
//! Runs as a sibling process to the admin server, with its own pool
//! instance over the same config and state files. Every search refreshes
//! from the shared state file before dispatching (inside `run_query`), so
//! admin-side changes become visible without IPC.
//!
//! Supported methods:
//! - `initialize` → server capabilities
//! - `tools/list` → tool definitions
//! - `tools/call` → execute a tool
//! - `prompts/list` / `resources/list` → empty (reserved)

use plexpool_pool::{run_health_check, run_query, ClientPool, QueryRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

/// MCP JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// MCP JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// MCP JSON-RPC error.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// MCP tool definition (subset of JSON Schema).
#[derive(Debug, Serialize)]
struct McpToolDef {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn tool_definitions() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "perplexity_search".to_string(),
            description: "Query the answer engine across the session pool. Modes: auto, \
                 pro, reasoning, deep research (quota-limited modes fall back \
                 to auto when exhausted)."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Question to answer"},
                    "mode": {
                        "type": "string",
                        "enum": ["auto", "pro", "reasoning", "deep research"],
                        "default": "auto"
                    },
                    "model": {"type": "string", "description": "Model override (pro/reasoning only)"},
                    "sources": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["web", "scholar", "social"]},
                        "default": ["web"]
                    },
                    "language": {"type": "string", "default": "en-US"},
                    "incognito": {"type": "boolean", "default": false}
                },
                "required": ["query"]
            }),
        },
        McpToolDef {
            name: "pool_status".to_string(),
            description: "Per-client pool status: derived state, quota counters, backoff."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "refresh": {
                        "type": "boolean",
                        "description": "Run a health check before reporting",
                        "default": false
                    }
                }
            }),
        },
    ]
}

/// MCP bridge over stdin/stdout with its own pool instance.
pub struct McpBridge {
    pool: Arc<ClientPool>,
}

impl McpBridge {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Run the MCP JSON-RPC loop over stdin/stdout.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("MCP stdio server started (JSON-RPC 2.0)");

        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut stdout = tokio::io::stdout();
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break; // EOF
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => {
                    debug!(method = %request.method, "MCP request");
                    self.handle_request(request).await
                }
                Err(e) => JsonRpcResponse::err(None, -32700, format!("Parse error: {e}")),
            };

            let json = serde_json::to_string(&response)?;
            stdout.write_all(json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        info!("MCP stdio server shutting down");
        Ok(())
    }

    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => self.handle_tools_call(req.id, req.params).await,
            "prompts/list" => JsonRpcResponse::ok(req.id, serde_json::json!({ "prompts": [] })),
            "resources/list" => {
                JsonRpcResponse::ok(req.id, serde_json::json!({ "resources": [] }))
            }
            "notifications/initialized" => JsonRpcResponse::ok(req.id, serde_json::json!({})),
            _ => JsonRpcResponse::err(req.id, -32601, format!("Method not found: {}", req.method)),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::ok(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": "plexpool",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::ok(id, serde_json::json!({ "tools": tool_definitions() }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return JsonRpcResponse::err(id, -32602, "Missing 'name' parameter"),
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        let outcome = match name.as_str() {
            "perplexity_search" => self.call_search(arguments).await,
            "pool_status" => self.call_pool_status(arguments).await,
            _ => Err(format!("Unknown tool: {name}")),
        };

        match outcome {
            Ok(text) => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false,
                }),
            ),
            Err(message) => {
                error!(tool = %name, error = %message, "MCP tool call failed");
                JsonRpcResponse::ok(
                    id,
                    serde_json::json!({
                        "content": [{ "type": "text", "text": message }],
                        "isError": true,
                    }),
                )
            }
        }
    }

    async fn call_search(&self, arguments: Value) -> Result<String, String> {
        let request: QueryRequest =
            serde_json::from_value(arguments).map_err(|e| format!("Invalid arguments: {e}"))?;
        let response = run_query(&self.pool, request)
            .await
            .map_err(|e| e.to_string())?;
        let answer = response
            .answer
            .as_ref()
            .map(|a| a.text())
            .unwrap_or_default();
        if response.related_queries.is_empty() {
            Ok(answer)
        } else {
            Ok(format!(
                "{answer}\n\nRelated: {}",
                response.related_queries.join("; ")
            ))
        }
    }

    async fn call_pool_status(&self, arguments: Value) -> Result<String, String> {
        let refresh = arguments
            .get("refresh")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if refresh {
            run_health_check(&self.pool, None).await;
        } else {
            self.pool.refresh_from_state().await;
        }
        let statuses = self.pool.statuses().await;
        serde_json::to_string_pretty(&statuses).map_err(|e| e.to_string())
    }
}

/// Run the MCP stdio server as a standalone process.
pub async fn run(config_path: PathBuf, state_path: PathBuf) -> anyhow::Result<()> {
    let pool = Arc::new(ClientPool::load_http(config_path, state_path).await);
    let bridge = McpBridge::new(pool);
    bridge.run().await
}
