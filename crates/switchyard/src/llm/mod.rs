//! Model provider seam.
//!
//! The executor talks to language models through [`ModelProvider`]; the
//! concrete SDKs live behind it. Two drivers ship with the runtime: an
//! OpenAI-compatible HTTP driver and a scripted driver for deterministic
//! tests.
//!
//! The A2A streaming surface emits task-level events, not token deltas, so
//! the trait only needs whole-turn completion.

mod openai_compatible;
mod scripted;
mod types;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use scripted::ScriptedProvider;
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, TokenUsage, ToolCall, ToolSpec,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model response malformed: {0}")]
    Malformed(String),

    #[error("no scripted response left")]
    ScriptExhausted,
}

/// A language model capable of one chat completion with tool calling.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    fn provider_name(&self) -> &str;
}
