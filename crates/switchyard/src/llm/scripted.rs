//! Scripted provider for deterministic tests.
//!
//! Returns a fixed sequence of responses and records every request it saw so
//! tests can assert on the prompts and tool specs the executor built.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError};

#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<Vec<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Responses are served in the given order, one per `complete` call.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        Self {
            responses: Mutex::new(reversed),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in call order.
    pub fn seen_requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|reqs| reqs.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop())
            .ok_or(ProviderError::ScriptExhausted)
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
