//! Execution scope: the resolved identity of a request.

use serde::{Deserialize, Serialize};

/// The `(tenant, project, graph)` a request operates under, plus an optional
/// agent pin. Produced exclusively by the auth resolver; every downstream
/// component treats it as the sole source of tenant identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionScope {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ExecutionScope {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            agent_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// The fallback scope handed out in development/test when no credentials
    /// are presented.
    pub fn dev_fallback() -> Self {
        Self::new("test-tenant", "test-project", "test-graph")
    }
}

impl std::fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.project_id, self.graph_id)
    }
}
