/// LLM Client — the single point of entry for all Claude API calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions MUST go through this module.
///
/// Calls are forced tool calls: the model must answer through one named tool,
/// and callers read the tool's `input` object.
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::{AttemptError, RetryPolicy};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-haiku-4-5";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key is not configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM response did not call tool '{0}'")]
    MissingToolCall(String),
}

impl LlmError {
    /// Rate limits, server errors and transport failures are worth another
    /// attempt; anything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A tool the model can be forced to call, described by a JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolChoice<'a> {
    Tool { name: &'a str },
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    tools: &'a [ToolDefinition],
    tool_choice: ToolChoice<'a>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// The `input` of the first `tool_use` block calling `tool`.
    pub fn tool_input(&self, tool: &str) -> Option<&Value> {
        self.content
            .iter()
            .find(|b| b.block_type == "tool_use" && b.name.as_deref() == Some(tool))
            .and_then(|b| b.input.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// The single LLM client used by all services.
/// Wraps the Anthropic Messages API with retry logic and forced tool use.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(client: Client, api_key: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            retry,
        }
    }

    /// Makes a raw call to the Claude API forcing a call to `tool`.
    /// Retries on 429 (rate limit), 5xx and transport errors per the client's
    /// [`RetryPolicy`].
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        tool: &ToolDefinition,
    ) -> Result<LlmResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            tools: std::slice::from_ref(tool),
            tool_choice: ToolChoice::Tool { name: &tool.name },
        };

        let llm_response = self
            .retry
            .run_if("LLM call", LlmError::is_retryable, |_| {
                self.send(api_key, &request_body)
            })
            .await
            .map_err(|exhausted| match exhausted.last {
                AttemptError::Failed(LlmError::Api { status: 429, .. }) => LlmError::RateLimited {
                    retries: exhausted.attempts,
                },
                AttemptError::Failed(e) => e,
                AttemptError::Timeout(after) => LlmError::Timeout(after),
            })?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }

    /// One attempt, no retries.
    async fn send(
        &self,
        api_key: &str,
        request_body: &AnthropicRequest<'_>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, body);
            // Try to parse error message
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Calls the model and returns the forced tool call's `input` object.
    pub async fn call_tool(
        &self,
        prompt: &str,
        system: &str,
        tool: &ToolDefinition,
    ) -> Result<Value, LlmError> {
        let response = self.call(prompt, system, tool).await?;
        response
            .tool_input(&tool.name)
            .cloned()
            .ok_or_else(|| LlmError::MissingToolCall(tool.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_input_found() {
        let response: LlmResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me tag this."},
                {"type": "tool_use", "id": "toolu_1", "name": "record_tags", "input": {"tags": ["职场"]}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        assert_eq!(
            response.tool_input("record_tags"),
            Some(&json!({"tags": ["职场"]}))
        );
    }

    #[test]
    fn test_tool_input_missing() {
        let response: LlmResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "no tool"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        assert!(response.tool_input("record_tags").is_none());
    }

    #[test]
    fn test_request_forces_named_tool() {
        let tool = ToolDefinition {
            name: "record_tags".to_string(),
            description: "d".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: "s",
            messages: vec![],
            tools: std::slice::from_ref(&tool),
            tool_choice: ToolChoice::Tool { name: &tool.name },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["tool_choice"], json!({"type": "tool", "name": "record_tags"}));
        assert_eq!(value["tools"][0]["input_schema"], json!({"type": "object"}));
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let client = LlmClient::new(Client::new(), None, RetryPolicy::default());
        let tool = ToolDefinition {
            name: "t".to_string(),
            description: String::new(),
            input_schema: json!({}),
        };
        assert!(matches!(
            client.call_tool("p", "s", &tool).await,
            Err(LlmError::MissingApiKey)
        ));
    }

    #[test]
    fn test_retryable_errors() {
        let api = |status| LlmError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(529).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!LlmError::MissingToolCall("t".to_string()).is_retryable());
    }
}
