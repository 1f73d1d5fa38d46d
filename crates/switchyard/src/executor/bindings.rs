//! Tool bindings for one agent turn.
//!
//! Resolves the agent's tool references into executable [`Tool`]s: MCP
//! configs become HTTP proxies (one per tool the server advertises), function
//! configs become sandbox executions. Credential references are resolved
//! through the store registry and attached as bearer headers; the raw values
//! never leave the binding.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::credentials::CredentialStoreRegistry;
use crate::database::DbPool;
use crate::database::models::{CredentialReference, Tool as ToolRow, ToolConfig, ToolStatus};
use crate::scope::ExecutionScope;
use crate::tools::{FunctionSandboxPool, McpHttpClient, McpToolProxy, Tool, ToolOutcome};

/// A function tool bound to the sandbox pool.
struct FunctionToolBinding {
    id: String,
    description: String,
    config: ToolConfig,
    sandbox: Arc<FunctionSandboxPool>,
}

#[async_trait]
impl Tool for FunctionToolBinding {
    fn name(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "additionalProperties": true})
    }

    async fn execute(&self, args: Value) -> Result<ToolOutcome, String> {
        match self
            .sandbox
            .execute_function_tool(&self.id, &args, &self.config)
            .await
        {
            Ok(value) => Ok(ToolOutcome::ok(value)),
            Err(e) => Ok(ToolOutcome::err(e.to_string())),
        }
    }
}

/// Resolve every tool reference of an agent into executable bindings.
/// Unreachable MCP servers degrade to a recorded `unhealthy` status rather
/// than failing the turn.
pub async fn build_tool_bindings(
    pool: &DbPool,
    scope: &ExecutionScope,
    tool_ids: &[String],
    sandbox: &Arc<FunctionSandboxPool>,
    credentials: &CredentialStoreRegistry,
) -> Vec<Arc<dyn Tool>> {
    let mut bindings: Vec<Arc<dyn Tool>> = Vec::new();

    for tool_id in tool_ids {
        let row = {
            let Ok(mut conn) = pool.get() else { continue };
            match ToolRow::find(&mut conn, &scope.tenant_id, &scope.project_id, tool_id) {
                Ok(Some(row)) => row,
                Ok(None) => {
                    tracing::warn!(tool = %tool_id, "agent references missing tool");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(tool = %tool_id, error = %e, "tool lookup failed");
                    continue;
                }
            }
        };

        if row.status() == ToolStatus::Disabled {
            continue;
        }

        let config = match row.config() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(tool = %tool_id, error = %e, "tool config unreadable");
                continue;
            }
        };

        match config {
            ToolConfig::Function { .. } => {
                bindings.push(Arc::new(FunctionToolBinding {
                    id: row.id.clone(),
                    description: row.name.clone(),
                    config,
                    sandbox: sandbox.clone(),
                }));
            }
            ToolConfig::Mcp {
                server_url,
                headers,
            } => {
                let mut client = McpHttpClient::new(server_url, headers);
                if let Some(reference_id) = &row.credential_reference_id {
                    if let Some(token) =
                        resolve_credential(pool, scope, reference_id, credentials).await
                    {
                        client = client.with_bearer(&token);
                    }
                }
                let client = Arc::new(client);

                match client.initialize().await {
                    Ok(discovered) => {
                        record_tool_health(pool, scope, &row.id, ToolStatus::Healthy, &discovered);
                        for mcp_tool in &discovered {
                            bindings.push(Arc::new(McpToolProxy::new(&row.id, mcp_tool, client.clone())));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(tool = %tool_id, error = %e, "MCP server unreachable");
                        record_tool_health(pool, scope, &row.id, ToolStatus::Unhealthy, &[]);
                    }
                }
            }
        }
    }

    bindings
}

async fn resolve_credential(
    pool: &DbPool,
    scope: &ExecutionScope,
    reference_id: &str,
    credentials: &CredentialStoreRegistry,
) -> Option<String> {
    let reference = {
        let mut conn = pool.get().ok()?;
        CredentialReference::find(&mut conn, &scope.tenant_id, &scope.project_id, reference_id)
            .ok()
            .flatten()?
    };
    let key = reference
        .retrieval_params()
        .and_then(|p| p.get("key").and_then(|k| k.as_str()).map(str::to_string))
        .unwrap_or_else(|| reference.id.clone());

    let store = credentials.get(&reference.credential_store_id).ok()?;
    match store.get(&key).await {
        Ok(secret) => Some(secret.as_str().to_string()),
        Err(e) => {
            tracing::warn!(reference = %reference_id, error = %e, "credential resolution failed");
            None
        }
    }
}

fn record_tool_health(
    pool: &DbPool,
    scope: &ExecutionScope,
    tool_id: &str,
    status: ToolStatus,
    discovered: &[crate::tools::McpTool],
) {
    let Ok(mut conn) = pool.get() else { return };
    let available = if discovered.is_empty() {
        None
    } else {
        serde_json::to_value(discovered).ok()
    };
    if let Err(e) = ToolRow::record_health(
        &mut conn,
        &scope.tenant_id,
        &scope.project_id,
        tool_id,
        status,
        available.as_ref(),
    ) {
        tracing::warn!(tool = %tool_id, error = %e, "failed to record tool health");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::database::init_in_memory;
    use crate::database::models::NewTool;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn function_tools_bind_without_network() {
        let pool = init_in_memory().unwrap();
        let scope = ExecutionScope::new("t", "p", "g");
        {
            let mut conn = pool.get().unwrap();
            let config = ToolConfig::Function {
                execute_code: "module.exports = async () => 1;".to_string(),
                dependencies: BTreeMap::new(),
                timeout_ms: None,
            };
            ToolRow::insert(
                &mut conn,
                &NewTool::new("t", "p", "calc", "Calculator", &config, None).unwrap(),
            )
            .unwrap();
        }

        let sandbox = Arc::new(FunctionSandboxPool::new(SandboxConfig::default()));
        let bindings = build_tool_bindings(
            &pool,
            &scope,
            &["calc".to_string(), "missing".to_string()],
            &sandbox,
            &CredentialStoreRegistry::new(),
        )
        .await;

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name(), "calc");
        assert_eq!(bindings[0].parameters_schema()["type"], "object");
    }

    #[tokio::test]
    async fn unreachable_mcp_marks_unhealthy() {
        let pool = init_in_memory().unwrap();
        let scope = ExecutionScope::new("t", "p", "g");
        {
            let mut conn = pool.get().unwrap();
            let config = ToolConfig::Mcp {
                server_url: "http://127.0.0.1:1/mcp".to_string(),
                headers: BTreeMap::new(),
            };
            ToolRow::insert(
                &mut conn,
                &NewTool::new("t", "p", "kb", "Knowledge base", &config, None).unwrap(),
            )
            .unwrap();
        }

        let sandbox = Arc::new(FunctionSandboxPool::new(SandboxConfig::default()));
        let bindings = build_tool_bindings(
            &pool,
            &scope,
            &["kb".to_string()],
            &sandbox,
            &CredentialStoreRegistry::new(),
        )
        .await;
        assert!(bindings.is_empty());

        let mut conn = pool.get().unwrap();
        let row = ToolRow::find(&mut conn, "t", "p", "kb").unwrap().unwrap();
        assert_eq!(row.status(), ToolStatus::Unhealthy);
        assert!(row.last_health_check.is_some());
    }
}
