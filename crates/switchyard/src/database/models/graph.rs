//! Graphs and cross-agent relations.
//!
//! A graph is a topology of agents with a designated entry agent plus
//! `transfer`/`delegate` edges. A relation either points at another agent in
//! the same graph or at an external addressable agent (URL + descriptor).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::{agent_relations, graphs};
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = graphs)]
#[serde(rename_all = "camelCase")]
pub struct AgentGraph {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub name: String,
    pub default_agent_id: String,
    pub models_json: Option<String>,
    pub stop_when_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = graphs)]
pub struct NewAgentGraph {
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub name: String,
    pub default_agent_id: String,
    pub models_json: Option<String>,
    pub stop_when_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewAgentGraph {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        default_agent_id: impl Into<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            id: id.into(),
            name: name.into(),
            default_agent_id: default_agent_id.into(),
            models_json: None,
            stop_when_json: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl AgentGraph {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<AgentGraph>, DbError> {
        let row = graphs::table
            .filter(graphs::tenant_id.eq(tenant_id))
            .filter(graphs::project_id.eq(project_id))
            .filter(graphs::id.eq(id))
            .select(AgentGraph::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewAgentGraph) -> Result<(), DbError> {
        diesel::insert_into(graphs::table).values(new).execute(conn)?;
        Ok(())
    }

    /// Replace a graph definition in place, keeping its creation timestamp.
    pub fn replace(conn: &mut SqliteConnection, new: &NewAgentGraph) -> Result<(), DbError> {
        diesel::update(
            graphs::table
                .filter(graphs::tenant_id.eq(&new.tenant_id))
                .filter(graphs::project_id.eq(&new.project_id))
                .filter(graphs::id.eq(&new.id)),
        )
        .set((
            graphs::name.eq(&new.name),
            graphs::default_agent_id.eq(&new.default_agent_id),
            graphs::models_json.eq(&new.models_json),
            graphs::stop_when_json.eq(&new.stop_when_json),
            graphs::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)?;
        Ok(())
    }
}

// ─── Relations ────────────────────────────────────────────────────────────────

/// Kind of edge between two agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    /// Hand the conversation over; the target becomes the active agent.
    Transfer,
    /// Dispatch a sub-task; the result comes back to the source agent.
    Delegate,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Transfer => "transfer",
            RelationType::Delegate => "delegate",
        }
    }

    pub fn parse(s: &str) -> Option<RelationType> {
        match s {
            "transfer" => Some(RelationType::Transfer),
            "delegate" => Some(RelationType::Delegate),
            _ => None,
        }
    }
}

/// Where a relation points: an agent in the same graph or an external one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    Internal { agent_id: String },
    External { url: String, name: String, description: String },
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = agent_relations)]
#[serde(rename_all = "camelCase")]
pub struct AgentRelation {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub source_agent_id: String,
    pub target_agent_id: Option<String>,
    pub external_url: Option<String>,
    pub external_name: Option<String>,
    pub external_description: Option<String>,
    pub relation_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = agent_relations)]
pub struct NewAgentRelation {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub source_agent_id: String,
    pub target_agent_id: Option<String>,
    pub external_url: Option<String>,
    pub external_name: Option<String>,
    pub external_description: Option<String>,
    pub relation_type: String,
    pub created_at: String,
}

impl NewAgentRelation {
    pub fn internal(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
        source_agent_id: impl Into<String>,
        target_agent_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            id: crate::short_id(),
            source_agent_id: source_agent_id.into(),
            target_agent_id: Some(target_agent_id.into()),
            external_url: None,
            external_name: None,
            external_description: None,
            relation_type: relation_type.as_str().to_string(),
            created_at: now_rfc3339(),
        }
    }

    pub fn external(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
        source_agent_id: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            id: crate::short_id(),
            source_agent_id: source_agent_id.into(),
            target_agent_id: None,
            external_url: Some(url.into()),
            external_name: Some(name.into()),
            external_description: Some(description.into()),
            relation_type: relation_type.as_str().to_string(),
            created_at: now_rfc3339(),
        }
    }
}

impl AgentRelation {
    /// The typed target of this relation. Exactly one of the internal/external
    /// column groups is populated by construction.
    pub fn target(&self) -> Option<RelationTarget> {
        if let Some(agent_id) = &self.target_agent_id {
            return Some(RelationTarget::Internal {
                agent_id: agent_id.clone(),
            });
        }
        match (&self.external_url, &self.external_name) {
            (Some(url), Some(name)) => Some(RelationTarget::External {
                url: url.clone(),
                name: name.clone(),
                description: self.external_description.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    pub fn relation_type(&self) -> Option<RelationType> {
        RelationType::parse(&self.relation_type)
    }

    /// All relations originating from one agent.
    pub fn for_source(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
        source_agent_id: &str,
    ) -> Result<Vec<AgentRelation>, DbError> {
        let rows = agent_relations::table
            .filter(agent_relations::tenant_id.eq(tenant_id))
            .filter(agent_relations::project_id.eq(project_id))
            .filter(agent_relations::graph_id.eq(graph_id))
            .filter(agent_relations::source_agent_id.eq(source_agent_id))
            .select(AgentRelation::as_select())
            .load(conn)?;
        Ok(rows)
    }

    /// Insert a relation; duplicate `(graph, source, target, type)` rows are
    /// rejected by the unique index and surface as a constraint violation.
    pub fn insert(conn: &mut SqliteConnection, new: &NewAgentRelation) -> Result<(), DbError> {
        diesel::insert_into(agent_relations::table)
            .values(new)
            .execute(conn)?;
        Ok(())
    }

    pub fn delete_for_graph(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        graph_id: &str,
    ) -> Result<usize, DbError> {
        let n = diesel::delete(
            agent_relations::table
                .filter(agent_relations::tenant_id.eq(tenant_id))
                .filter(agent_relations::project_id.eq(project_id))
                .filter(agent_relations::graph_id.eq(graph_id)),
        )
        .execute(conn)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn relation_target_variants() {
        let internal = NewAgentRelation::internal("t", "p", "g", "a", "b", RelationType::Transfer);
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();
        AgentRelation::insert(&mut conn, &internal).unwrap();

        let rows = AgentRelation::for_source(&mut conn, "t", "p", "g", "a").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].target(),
            Some(RelationTarget::Internal {
                agent_id: "b".to_string()
            })
        );
        assert_eq!(rows[0].relation_type(), Some(RelationType::Transfer));
    }

    #[test]
    fn duplicate_relation_rejected() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let rel = NewAgentRelation::internal("t", "p", "g", "a", "b", RelationType::Delegate);
        AgentRelation::insert(&mut conn, &rel).unwrap();

        let dup = NewAgentRelation::internal("t", "p", "g", "a", "b", RelationType::Delegate);
        assert!(AgentRelation::insert(&mut conn, &dup).is_err());
    }

    #[test]
    fn relation_type_round_trip() {
        assert_eq!(RelationType::parse("transfer"), Some(RelationType::Transfer));
        assert_eq!(RelationType::parse("delegate"), Some(RelationType::Delegate));
        assert_eq!(RelationType::parse("peer"), None);
    }
}
