//! Anthropic Messages API backend.
//!
//! Every [`ToolCall`] becomes one `POST {base_url}/messages` request with a
//! single tool and `tool_choice` forcing that tool. The answer is the
//! `input` of the first `tool_use` content block.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::trait_def::{Backend, BackendError, Purpose, ToolCall};

const API_VERSION: &str = "2023-06-01";

/// Connection and model settings for [`AnthropicBackend`].
#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used for combined selection.
    pub select_model: String,
    /// Model used for patch regeneration.
    pub patch_model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
    pub const DEFAULT_SELECT_MODEL: &str = "claude-haiku-4-5-20251001";
    pub const DEFAULT_PATCH_MODEL: &str = "claude-sonnet-4-6";
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            select_model: Self::DEFAULT_SELECT_MODEL.to_string(),
            patch_model: Self::DEFAULT_PATCH_MODEL.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    fn model_for(&self, purpose: Purpose) -> &str {
        match purpose {
            Purpose::Select => &self.select_model,
            Purpose::Patch => &self.patch_model,
        }
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("base_url", &self.base_url)
            .field("select_model", &self.select_model)
            .field("patch_model", &self.patch_model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    tools: Vec<ToolDef<'a>>,
    tool_choice: ToolChoice<'a>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct ToolDef<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn build_request<'a>(config: &'a AnthropicConfig, call: &'a ToolCall) -> MessagesRequest<'a> {
    MessagesRequest {
        model: config.model_for(call.purpose),
        max_tokens: config.max_tokens,
        tools: vec![ToolDef {
            name: &call.tool_name,
            description: &call.tool_description,
            input_schema: &call.input_schema,
        }],
        tool_choice: ToolChoice {
            kind: "tool",
            name: &call.tool_name,
        },
        messages: vec![Message {
            role: "user",
            content: &call.user_message,
        }],
    }
}

/// Pull the forced tool's input out of a response.
fn extract_tool_input(response: MessagesResponse, tool_name: &str) -> Result<Value, BackendError> {
    response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == tool_name => Some(input),
            _ => None,
        })
        .ok_or_else(|| BackendError::MissingToolOutput(tool_name.to_string()))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend adapter for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self, BackendError> {
        if config.api_key.is_empty() {
            return Err(BackendError::NotConfigured("missing API key".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, BackendError> {
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        let body = build_request(&self.config, call);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        extract_tool_input(parsed, &call.tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(purpose: Purpose) -> ToolCall {
        ToolCall {
            purpose,
            tool_name: "select_and_patch".to_string(),
            tool_description: "pick one".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
            user_message: "User prompt: \"hi\"".to_string(),
        }
    }

    #[test]
    fn request_forces_the_single_tool() {
        let config = AnthropicConfig::new("key");
        let call = call(Purpose::Select);
        let body = serde_json::to_value(build_request(&config, &call)).unwrap();

        assert_eq!(body["model"], AnthropicConfig::DEFAULT_SELECT_MODEL);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["tools"][0]["name"], "select_and_patch");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"], json!({ "type": "tool", "name": "select_and_patch" }));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "User prompt: \"hi\"");
    }

    #[test]
    fn patch_calls_use_the_patch_model() {
        let config = AnthropicConfig::new("key");
        let call = call(Purpose::Patch);
        let body = serde_json::to_value(build_request(&config, &call)).unwrap();
        assert_eq!(body["model"], AnthropicConfig::DEFAULT_PATCH_MODEL);
    }

    #[test]
    fn extracts_tool_input_past_text_blocks() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "thinking out loud" },
                { "type": "tool_use", "id": "t1", "name": "select_and_patch", "input": { "patch": {} } }
            ]
        }))
        .unwrap();
        let input = extract_tool_input(response, "select_and_patch").unwrap();
        assert_eq!(input, json!({ "patch": {} }));
    }

    #[test]
    fn missing_tool_use_is_an_error() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "no tools today" }]
        }))
        .unwrap();
        let err = extract_tool_input(response, "select_and_patch").unwrap_err();
        assert!(matches!(err, BackendError::MissingToolOutput(_)));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = AnthropicBackend::new(AnthropicConfig::new("")).unwrap_err();
        assert!(matches!(err, BackendError::NotConfigured(_)));
    }

    #[test]
    fn debug_hides_api_key() {
        let config = AnthropicConfig::new("sk-secret");
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
