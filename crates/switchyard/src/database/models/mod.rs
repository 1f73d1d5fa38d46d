pub mod agent;
pub mod api_key;
pub mod artifact;
pub mod context_config;
pub mod conversation;
pub mod credential;
pub mod graph;
pub mod message;
pub mod project;
pub mod task;
pub mod tool;

pub use agent::{AgentDefinition, NewAgentDefinition};
pub use api_key::{ApiKey, NewApiKey};
pub use artifact::{Artifact, ArtifactPart, NewArtifact};
pub use context_config::{
    ContextConfig, ContextVariable, FetchSpec, NewContextConfig, VariableTrigger,
};
pub use conversation::{Conversation, NewConversation};
pub use credential::{CredentialReference, NewCredentialReference};
pub use graph::{
    AgentGraph, AgentRelation, NewAgentGraph, NewAgentRelation, RelationTarget, RelationType,
};
pub use message::{Message, MessageType, MessageVisibility, NewMessage};
pub use project::{NewProject, Project, ensure_tenant};
pub use task::{NewTask, Task, TaskStatus};
pub use tool::{NewTool, Tool, ToolConfig, ToolStatus};
