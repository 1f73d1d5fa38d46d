//! Remote MCP (Model Context Protocol) client.
//!
//! Tools whose config is the MCP variant point at a server speaking JSON-RPC
//! 2.0 over HTTP. The flow mirrors the stdio handshake: `initialize`,
//! `tools/list` to discover what the server offers, then `tools/call` per
//! invocation. Each discovered tool is registered as an [`McpToolProxy`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{Tool, ToolOutcome};

// ─── JSON-RPC 2.0 types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    #[allow(dead_code)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value, String> {
        if let Some(err) = self.error {
            return Err(format!(
                "MCP error {} ({}): {}",
                err.code,
                err.message,
                err.data.unwrap_or(Value::Null)
            ));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

// ─── MCP tool descriptor ──────────────────────────────────────────────────────

/// A tool exposed by an MCP server, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

// ─── McpHttpClient ────────────────────────────────────────────────────────────

/// Client for one remote MCP server endpoint.
pub struct McpHttpClient {
    client: reqwest::Client,
    server_url: String,
    headers: BTreeMap<String, String>,
    next_id: AtomicU64,
}

impl McpHttpClient {
    pub fn new(server_url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            headers,
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a bearer credential resolved from the tool's credential
    /// reference. The value is held only for the lifetime of this client.
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.headers
            .insert("Authorization".to_string(), format!("Bearer {token}"));
        self
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, String> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let mut http = self.client.post(&self.server_url).json(&req);
        for (name, value) in &self.headers {
            http = http.header(name, value);
        }

        let resp = http
            .send()
            .await
            .map_err(|e| format!("MCP request error: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("MCP server returned {status}"));
        }

        let parsed: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| format!("MCP deserialize error: {e}"))?;
        parsed.into_result()
    }

    /// Complete the MCP handshake and discover the server's tools.
    pub async fn initialize(&self) -> Result<Vec<McpTool>, String> {
        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "switchyard",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        self.call("initialize", Some(init_params)).await?;

        let tools_result = self.call("tools/list", None).await?;
        let tools: Vec<McpTool> = tools_result
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        tracing::info!(
            server = %self.server_url,
            count = tools.len(),
            "MCP server tools discovered"
        );
        Ok(tools)
    }

    /// Call a tool on the server.
    ///
    /// `tools/call` results carry `{ "content": [...], "isError": bool }`.
    pub async fn call_tool(&self, tool_name: &str, input: Value) -> Result<Value, String> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": input
        });
        let result = self.call("tools/call", Some(params)).await?;

        if result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            let msg = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("tool returned an error");
            return Err(msg.to_string());
        }

        Ok(result)
    }
}

// ─── McpToolProxy ─────────────────────────────────────────────────────────────

/// A [`Tool`] that forwards execution to a remote MCP server.
pub struct McpToolProxy {
    /// Name exposed to the model: `<tool id>__<server tool name>`.
    full_name: String,
    tool_name: String,
    description: String,
    input_schema: Value,
    client: Arc<McpHttpClient>,
}

impl McpToolProxy {
    pub fn new(tool_id: &str, tool: &McpTool, client: Arc<McpHttpClient>) -> Self {
        Self {
            full_name: format!("{}__{}", tool_id, tool.name),
            tool_name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        if self.input_schema.is_null() {
            serde_json::json!({"type": "object"})
        } else {
            self.input_schema.clone()
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutcome, String> {
        match self.client.call_tool(&self.tool_name, args).await {
            Ok(value) => Ok(ToolOutcome::ok(value)),
            Err(e) => Ok(ToolOutcome::err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonrpc_request_serializes() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "tools/list".to_string(),
            params: None,
        };
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"jsonrpc\":\"2.0\""));
        assert!(s.contains("\"method\":\"tools/list\""));
        assert!(!s.contains("params"));
    }

    #[test]
    fn jsonrpc_response_error_path() {
        let json = r#"{"id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(err.contains("-32601"));
        assert!(err.contains("Method not found"));
    }

    #[test]
    fn mcp_tool_missing_schema_defaults() {
        let json = r#"{"name":"t"}"#;
        let tool: McpTool = serde_json::from_str(json).unwrap();
        assert!(tool.input_schema.is_null());
        assert!(tool.description.is_empty());
    }

    #[test]
    fn proxy_name_and_schema_fallback() {
        let client = Arc::new(McpHttpClient::new("http://localhost:9/mcp", BTreeMap::new()));
        let tool = McpTool {
            name: "lookup".to_string(),
            description: "Looks things up".to_string(),
            input_schema: Value::Null,
        };
        let proxy = McpToolProxy::new("kb", &tool, client);
        assert_eq!(proxy.name(), "kb__lookup");
        assert_eq!(proxy.parameters_schema()["type"], "object");
    }
}
