//! OpenAI-compatible chat-completions driver.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, OpenRouter, Ollama, local gateways). Tool calls round-trip
//! through the `tools` / `tool_calls` fields; function arguments arrive as a
//! JSON-encoded string and are decoded before they reach the executor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ModelProvider, ProviderError,
    TokenUsage, ToolCall,
};

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    /// JSON-encoded arguments, per the OpenAI dialect.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ─── Provider ─────────────────────────────────────────────────────────────────

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn encode_message(msg: &ChatMessage) -> ApiMessage {
        let role = match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| ApiToolCall {
                        id: c.id.clone(),
                        call_type: "function".to_string(),
                        function: ApiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };
        ApiMessage {
            role: role.to_string(),
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn decode_tool_calls(calls: Option<Vec<ApiToolCall>>) -> Result<Vec<ToolCall>, ProviderError> {
        calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments: Value = serde_json::from_str(&c.function.arguments)
                    .map_err(|e| ProviderError::Malformed(format!("tool call arguments: {e}")))?;
                Ok(ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = ApiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::encode_message).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| ApiTool {
                    tool_type: "function",
                    function: ApiFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!(
                "provider returned {status}: {detail}"
            )));
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response has no choices".into()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: Self::decode_tool_calls(choice.message.tool_calls)?,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_assistant_with_calls() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "call-1".to_string(),
                name: "search".to_string(),
                arguments: serde_json::json!({"q": "rust"}),
            }],
        );
        let api = OpenAiCompatibleProvider::encode_message(&msg);
        let calls = api.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn decode_tool_calls_parses_argument_string() {
        let calls = Some(vec![ApiToolCall {
            id: "c1".to_string(),
            call_type: "function".to_string(),
            function: ApiFunctionCall {
                name: "lookup".to_string(),
                arguments: r#"{"id": 7}"#.to_string(),
            },
        }]);
        let decoded = OpenAiCompatibleProvider::decode_tool_calls(calls).unwrap();
        assert_eq!(decoded[0].arguments["id"], 7);
    }

    #[test]
    fn decode_rejects_garbage_arguments() {
        let calls = Some(vec![ApiToolCall {
            id: "c1".to_string(),
            call_type: "function".to_string(),
            function: ApiFunctionCall {
                name: "lookup".to_string(),
                arguments: "not json".to_string(),
            },
        }]);
        assert!(OpenAiCompatibleProvider::decode_tool_calls(calls).is_err());
    }

    #[test]
    fn response_parse_shape() {
        let raw = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7},
            "model": "gpt-4o-mini"
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.usage.unwrap().total_tokens, 7);
    }
}
