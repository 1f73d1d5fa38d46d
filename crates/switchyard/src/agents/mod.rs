//! Agent registry.
//!
//! Hydrates ledger agent rows into runnable [`RegisteredAgent`]s: the public
//! AgentCard served from `/.well-known/agent.json`, the relation-derived
//! handoff targets, and the enhanced description peers read when deciding to
//! hand off.

mod card;

pub use card::{AgentCard, AgentCapabilities, AgentProvider, AgentSkill};

use crate::database::models::{AgentDefinition, AgentGraph, AgentRelation, RelationTarget, RelationType};
use crate::database::{DbError, DbPool};
use crate::scope::ExecutionScope;

/// A transfer or delegation target as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffTarget {
    /// Internal agent id, or the external agent's URL.
    pub id: String,
    pub name: String,
    pub description: String,
    pub external: bool,
}

/// An agent ready for execution.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub definition: AgentDefinition,
    pub graph: AgentGraph,
    pub transfer_targets: Vec<HandoffTarget>,
    pub delegate_targets: Vec<HandoffTarget>,
}

impl RegisteredAgent {
    /// The base description plus appended sections naming the transfer and
    /// delegation targets. This is what peer agents see.
    pub fn enhanced_description(&self) -> String {
        let mut out = self.definition.description.clone();
        if !self.transfer_targets.is_empty() {
            out.push_str("\n\nYou can transfer the conversation to:");
            for target in &self.transfer_targets {
                out.push_str(&format!("\n- {}: {}", target.name, target.description));
            }
        }
        if !self.delegate_targets.is_empty() {
            out.push_str("\n\nYou can delegate sub-tasks to:");
            for target in &self.delegate_targets {
                out.push_str(&format!("\n- {}: {}", target.name, target.description));
            }
        }
        out
    }

    pub fn transfer_target(&self, id: &str) -> Option<&HandoffTarget> {
        self.transfer_targets.iter().find(|t| t.id == id)
    }

    pub fn delegate_target(&self, id: &str) -> Option<&HandoffTarget> {
        self.delegate_targets.iter().find(|t| t.id == id)
    }
}

/// Looks up agents and assembles their cards and handoff topology.
#[derive(Clone)]
pub struct AgentRegistry {
    pool: DbPool,
}

impl AgentRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolve the agent a request addresses: the scope's pinned agent if
    /// any, otherwise the graph's default agent. `None` when the graph or
    /// agent does not exist under this tenant.
    pub fn get_registered_agent(
        &self,
        scope: &ExecutionScope,
    ) -> Result<Option<RegisteredAgent>, DbError> {
        let mut conn = self.pool.get()?;
        let Some(graph) = AgentGraph::find(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
        )?
        else {
            return Ok(None);
        };
        drop(conn);

        let agent_id = scope
            .agent_id
            .clone()
            .unwrap_or_else(|| graph.default_agent_id.clone());
        self.get_registered_agent_by_id(scope, &agent_id)
    }

    /// Resolve a specific agent within the scope's graph.
    pub fn get_registered_agent_by_id(
        &self,
        scope: &ExecutionScope,
        agent_id: &str,
    ) -> Result<Option<RegisteredAgent>, DbError> {
        let mut conn = self.pool.get()?;
        let Some(graph) = AgentGraph::find(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
        )?
        else {
            return Ok(None);
        };
        let Some(definition) = AgentDefinition::find(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
            agent_id,
        )?
        else {
            return Ok(None);
        };

        let relations = AgentRelation::for_source(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
            agent_id,
        )?;

        let mut transfer_targets = Vec::new();
        let mut delegate_targets = Vec::new();
        for relation in &relations {
            let Some(relation_type) = relation.relation_type() else {
                continue;
            };
            let target = match relation.target() {
                Some(RelationTarget::Internal { agent_id }) => {
                    match AgentDefinition::find(
                        &mut conn,
                        &scope.tenant_id,
                        &scope.project_id,
                        &scope.graph_id,
                        &agent_id,
                    )? {
                        Some(peer) => HandoffTarget {
                            id: peer.id.clone(),
                            name: peer.name.clone(),
                            description: peer.description.clone(),
                            external: false,
                        },
                        None => {
                            tracing::warn!(agent = %agent_id, "relation targets missing agent");
                            continue;
                        }
                    }
                }
                Some(RelationTarget::External {
                    url,
                    name,
                    description,
                }) => HandoffTarget {
                    id: url,
                    name,
                    description,
                    external: true,
                },
                None => continue,
            };
            match relation_type {
                RelationType::Transfer => transfer_targets.push(target),
                RelationType::Delegate => delegate_targets.push(target),
            }
        }

        Ok(Some(RegisteredAgent {
            definition,
            graph,
            transfer_targets,
            delegate_targets,
        }))
    }

    /// The discovery card for a graph, served at `/.well-known/agent.json`.
    pub fn agent_card(
        &self,
        scope: &ExecutionScope,
        base_url: &str,
    ) -> Result<Option<AgentCard>, DbError> {
        let mut conn = self.pool.get()?;
        let Some(graph) = AgentGraph::find(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
        )?
        else {
            return Ok(None);
        };

        let agents = AgentDefinition::list_for_graph(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
        )?;
        drop(conn);

        // The card describes the entry agent, handoff topology included.
        let description = self
            .get_registered_agent_by_id(scope, &graph.default_agent_id)?
            .map(|agent| agent.enhanced_description())
            .unwrap_or_default();

        Ok(Some(AgentCard::for_graph(&graph, &description, base_url, &agents)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;
    use crate::database::models::{NewAgentDefinition, NewAgentGraph, NewAgentRelation};

    fn seeded_registry() -> (AgentRegistry, ExecutionScope) {
        let pool = init_in_memory().unwrap();
        {
            let mut conn = pool.get().unwrap();
            AgentGraph::insert(&mut conn, &NewAgentGraph::new("t", "p", "g", "Support graph", "router"))
                .unwrap();
            AgentDefinition::insert(
                &mut conn,
                &NewAgentDefinition::new(
                    "t", "p", "g", "router", "Router", "Routes requests", "You route.",
                ),
            )
            .unwrap();
            AgentDefinition::insert(
                &mut conn,
                &NewAgentDefinition::new(
                    "t", "p", "g", "support", "Support", "Handles billing", "You support.",
                ),
            )
            .unwrap();
            AgentRelation::insert(
                &mut conn,
                &NewAgentRelation::internal("t", "p", "g", "router", "support", RelationType::Transfer),
            )
            .unwrap();
            AgentRelation::insert(
                &mut conn,
                &NewAgentRelation::external(
                    "t",
                    "p",
                    "g",
                    "router",
                    "https://peer.example/a2a",
                    "researcher",
                    "Deep research",
                    RelationType::Delegate,
                ),
            )
            .unwrap();
        }
        (AgentRegistry::new(pool), ExecutionScope::new("t", "p", "g"))
    }

    #[test]
    fn default_agent_resolution() {
        let (registry, scope) = seeded_registry();
        let agent = registry.get_registered_agent(&scope).unwrap().unwrap();
        assert_eq!(agent.definition.id, "router");
        assert_eq!(agent.transfer_targets.len(), 1);
        assert_eq!(agent.delegate_targets.len(), 1);
        assert!(agent.delegate_targets[0].external);
    }

    #[test]
    fn pinned_agent_resolution() {
        let (registry, scope) = seeded_registry();
        let agent = registry
            .get_registered_agent(&scope.clone().with_agent("support"))
            .unwrap()
            .unwrap();
        assert_eq!(agent.definition.id, "support");
        assert!(agent.transfer_targets.is_empty());
    }

    #[test]
    fn enhanced_description_lists_targets() {
        let (registry, scope) = seeded_registry();
        let agent = registry.get_registered_agent(&scope).unwrap().unwrap();
        let description = agent.enhanced_description();
        assert!(description.starts_with("Routes requests"));
        assert!(description.contains("You can transfer the conversation to:\n- Support: Handles billing"));
        assert!(description.contains("You can delegate sub-tasks to:\n- researcher: Deep research"));
    }

    #[test]
    fn unknown_graph_is_none() {
        let (registry, _) = seeded_registry();
        let other = ExecutionScope::new("t", "p", "missing");
        assert!(registry.get_registered_agent(&other).unwrap().is_none());
    }

    #[test]
    fn card_lists_graph_agents() {
        let (registry, scope) = seeded_registry();
        let card = registry
            .agent_card(&scope, "http://localhost:3081")
            .unwrap()
            .unwrap();
        assert_eq!(card.name, "Support graph");
        assert!(card.capabilities.streaming);
        assert_eq!(card.skills.len(), 2);
        assert_eq!(card.url, "http://localhost:3081/agents/g/a2a");
        // The card carries the entry agent's enhanced description.
        assert!(card.description.contains("You can transfer the conversation to:"));
    }
}
