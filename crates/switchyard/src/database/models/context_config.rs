//! Context configuration.
//!
//! Per-graph variable definitions whose values are fetched at thread
//! creation (`initialization`) or on every turn (`invocation`) and rendered
//! into the system prompt. The headers schema is an opaque JSON document
//! validated only at request time.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::context_configs;
use crate::database::{DbError, now_rfc3339};

/// When a context variable's fetch fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableTrigger {
    Initialization,
    Invocation,
}

/// How to fetch a context variable's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSpec {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextVariable {
    pub name: String,
    pub trigger: VariableTrigger,
    #[serde(default)]
    pub fetch: Option<FetchSpec>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = context_configs)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub headers_schema_json: Option<String>,
    pub context_variables_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = context_configs)]
pub struct NewContextConfig {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub headers_schema_json: Option<String>,
    pub context_variables_json: Option<String>,
    pub created_at: String,
}

impl NewContextConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
        id: impl Into<String>,
        headers_schema: Option<&serde_json::Value>,
        variables: &[ContextVariable],
    ) -> Result<Self, DbError> {
        let context_variables_json = Some(
            serde_json::to_string(variables)
                .map_err(|e| DbError::InvalidData(format!("context variables: {e}")))?,
        );
        Ok(Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            id: id.into(),
            headers_schema_json: headers_schema.map(|v| v.to_string()),
            context_variables_json,
            created_at: now_rfc3339(),
        })
    }
}

impl ContextConfig {
    pub fn find_for_graph(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
    ) -> Result<Option<ContextConfig>, DbError> {
        let row = context_configs::table
            .filter(context_configs::tenant_id.eq(tenant_id))
            .filter(context_configs::project_id.eq(project_id))
            .filter(context_configs::graph_id.eq(graph_id))
            .select(ContextConfig::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewContextConfig) -> Result<(), DbError> {
        diesel::insert_into(context_configs::table)
            .values(new)
            .execute(conn)?;
        Ok(())
    }

    pub fn variables(&self) -> Vec<ContextVariable> {
        self.context_variables_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}
