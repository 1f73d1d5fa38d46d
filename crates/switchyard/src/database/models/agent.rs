//! Agent definitions.
//!
//! An agent is a configured role inside a graph: a prompt, a description
//! peers see when deciding to hand off, optional tool references, and an
//! optional per-agent conversation-history configuration (stored as opaque
//! JSON and interpreted by the conversation service).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::agents;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = agents)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tool_ids_json: Option<String>,
    pub history_config_json: Option<String>,
    pub models_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = agents)]
pub struct NewAgentDefinition {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tool_ids_json: Option<String>,
    pub history_config_json: Option<String>,
    pub models_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewAgentDefinition {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            id: id.into(),
            name: name.into(),
            description: description.into(),
            prompt: prompt.into(),
            tool_ids_json: None,
            history_config_json: None,
            models_json: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_tools(mut self, tool_ids: &[String]) -> Self {
        self.tool_ids_json = serde_json::to_string(tool_ids).ok();
        self
    }

    pub fn with_history_config(mut self, config_json: impl Into<String>) -> Self {
        self.history_config_json = Some(config_json.into());
        self
    }
}

impl AgentDefinition {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
        id: &str,
    ) -> Result<Option<AgentDefinition>, DbError> {
        let row = agents::table
            .filter(agents::tenant_id.eq(tenant_id))
            .filter(agents::project_id.eq(project_id))
            .filter(agents::graph_id.eq(graph_id))
            .filter(agents::id.eq(id))
            .select(AgentDefinition::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn list_for_graph(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
    ) -> Result<Vec<AgentDefinition>, DbError> {
        let rows = agents::table
            .filter(agents::tenant_id.eq(tenant_id))
            .filter(agents::project_id.eq(project_id))
            .filter(agents::graph_id.eq(graph_id))
            .order(agents::id.asc())
            .select(AgentDefinition::as_select())
            .load(conn)?;
        Ok(rows)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewAgentDefinition) -> Result<(), DbError> {
        diesel::insert_into(agents::table).values(new).execute(conn)?;
        Ok(())
    }

    pub fn delete_for_graph(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
    ) -> Result<usize, DbError> {
        let n = diesel::delete(
            agents::table
                .filter(agents::tenant_id.eq(tenant_id))
                .filter(agents::project_id.eq(project_id))
                .filter(agents::graph_id.eq(graph_id)),
        )
        .execute(conn)?;
        Ok(n)
    }

    /// Tool ids referenced by this agent, decoded from the JSON column.
    pub fn tool_ids(&self) -> Vec<String> {
        self.tool_ids_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn insert_and_find_scoped() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewAgentDefinition::new("t", "p", "g", "router", "Router", "Routes", "You route.")
            .with_tools(&["search".to_string()]);
        AgentDefinition::insert(&mut conn, &new).unwrap();

        let row = AgentDefinition::find(&mut conn, "t", "p", "g", "router")
            .unwrap()
            .unwrap();
        assert_eq!(row.name, "Router");
        assert_eq!(row.tool_ids(), vec!["search".to_string()]);

        // Same id under a different tenant does not resolve.
        assert!(
            AgentDefinition::find(&mut conn, "other", "p", "g", "router")
                .unwrap()
                .is_none()
        );
    }
}
