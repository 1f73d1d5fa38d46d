//! The public agent card served for discovery.

use serde::{Deserialize, Serialize};

use crate::database::models::{AgentDefinition, AgentGraph};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProvider {
    pub organization: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub provider: AgentProvider,
    pub capabilities: AgentCapabilities,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    pub fn for_graph(
        graph: &AgentGraph,
        description: &str,
        base_url: &str,
        agents: &[AgentDefinition],
    ) -> Self {
        Self {
            name: graph.name.clone(),
            description: description.to_string(),
            url: format!("{}/agents/{}/a2a", base_url.trim_end_matches('/'), graph.id),
            version: env!("CARGO_PKG_VERSION").to_string(),
            provider: AgentProvider {
                organization: "switchyard".to_string(),
                url: base_url.trim_end_matches('/').to_string(),
            },
            capabilities: AgentCapabilities { streaming: true },
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills: agents
                .iter()
                .map(|a| AgentSkill {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    description: a.description.clone(),
                })
                .collect(),
        }
    }
}
