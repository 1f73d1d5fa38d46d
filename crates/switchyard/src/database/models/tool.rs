//! Tool definitions.
//!
//! A tool is either a remote MCP server or a user-supplied function executed
//! in the sandbox pool. The variant lives in `config_json` as a tagged JSON
//! document so the ledger stays schema-stable as tool kinds evolve.

use std::collections::BTreeMap;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::tools;
use crate::database::{DbError, now_rfc3339};

/// Health of a tool as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Disabled,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Unknown => "unknown",
            ToolStatus::Healthy => "healthy",
            ToolStatus::Unhealthy => "unhealthy",
            ToolStatus::Disabled => "disabled",
        }
    }
}

impl From<String> for ToolStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "healthy" => ToolStatus::Healthy,
            "unhealthy" => ToolStatus::Unhealthy,
            "disabled" => ToolStatus::Disabled,
            _ => ToolStatus::Unknown,
        }
    }
}

/// The tagged tool configuration variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolConfig {
    /// A remote MCP server reachable over HTTP.
    Mcp {
        #[serde(rename = "serverUrl")]
        server_url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// User-supplied function code executed in the sandbox pool.
    Function {
        #[serde(rename = "executeCode")]
        execute_code: String,
        #[serde(default)]
        dependencies: BTreeMap<String, String>,
        #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tools)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub name: String,
    pub config_json: String,
    pub credential_reference_id: Option<String>,
    pub status: String,
    pub available_tools_json: Option<String>,
    pub last_health_check: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tools)]
pub struct NewTool {
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub name: String,
    pub config_json: String,
    pub credential_reference_id: Option<String>,
    pub status: String,
    pub available_tools_json: Option<String>,
    pub last_health_check: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewTool {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        config: &ToolConfig,
        credential_reference_id: Option<String>,
    ) -> Result<Self, DbError> {
        let config_json = serde_json::to_string(config)
            .map_err(|e| DbError::InvalidData(format!("tool config: {e}")))?;
        let now = now_rfc3339();
        // An empty credential reference carries no information; normalize it
        // away so reads are uniform.
        let credential_reference_id =
            credential_reference_id.filter(|s| !s.trim().is_empty());
        Ok(Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            id: id.into(),
            name: name.into(),
            config_json,
            credential_reference_id,
            status: ToolStatus::Unknown.as_str().to_string(),
            available_tools_json: None,
            last_health_check: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

impl Tool {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<Tool>, DbError> {
        let row = tools::table
            .filter(tools::tenant_id.eq(tenant_id))
            .filter(tools::project_id.eq(project_id))
            .filter(tools::id.eq(id))
            .select(Tool::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewTool) -> Result<(), DbError> {
        diesel::insert_into(tools::table).values(new).execute(conn)?;
        Ok(())
    }

    pub fn config(&self) -> Result<ToolConfig, DbError> {
        serde_json::from_str(&self.config_json)
            .map_err(|e| DbError::InvalidData(format!("tool config: {e}")))
    }

    pub fn status(&self) -> ToolStatus {
        ToolStatus::from(self.status.clone())
    }

    /// Record the outcome of a health probe together with the advertised
    /// tool list, if any.
    pub fn record_health(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
        status: ToolStatus,
        available_tools: Option<&serde_json::Value>,
    ) -> Result<(), DbError> {
        diesel::update(
            tools::table
                .filter(tools::tenant_id.eq(tenant_id))
                .filter(tools::project_id.eq(project_id))
                .filter(tools::id.eq(id)),
        )
        .set((
            tools::status.eq(status.as_str()),
            tools::available_tools_json.eq(available_tools.map(|v| v.to_string())),
            tools::last_health_check.eq(Some(now_rfc3339())),
            tools::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn config_round_trips_through_json_column() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let config = ToolConfig::Function {
            execute_code: "module.exports = async () => 42;".to_string(),
            dependencies: BTreeMap::from([("lodash".to_string(), "4.17.21".to_string())]),
            timeout_ms: Some(5_000),
        };
        let new = NewTool::new("t", "p", "calc", "Calc", &config, None).unwrap();
        Tool::insert(&mut conn, &new).unwrap();

        let row = Tool::find(&mut conn, "t", "p", "calc").unwrap().unwrap();
        assert_eq!(row.config().unwrap(), config);
        assert_eq!(row.status(), ToolStatus::Unknown);
    }

    #[test]
    fn empty_credential_reference_normalized_to_null() {
        let config = ToolConfig::Mcp {
            server_url: "http://localhost:9000/mcp".to_string(),
            headers: BTreeMap::new(),
        };
        let new = NewTool::new("t", "p", "m", "M", &config, Some(String::new())).unwrap();
        assert!(new.credential_reference_id.is_none());
    }

    #[test]
    fn mcp_config_tag_shape() {
        let config = ToolConfig::Mcp {
            server_url: "http://host/mcp".to_string(),
            headers: BTreeMap::new(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "mcp");
        assert_eq!(json["serverUrl"], "http://host/mcp");
    }
}
