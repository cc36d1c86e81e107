use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::chat::TokenUsage;
use shared::settings::ProviderAuth;
use std::time::Duration;

use crate::backend::{
    CompletionBackend, CompletionRequest, CompletionResponse, ToolCall, ToolDefinition,
};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<OpenAIToolChoice>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

/// OpenAI function-calling tool definition.
#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// `{"type": "function", "function": {"name": ...}}`
#[derive(Debug, Serialize)]
struct OpenAIToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    function: OpenAIToolChoiceFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIToolChoiceFunction {
    name: String,
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    function: OpenAIToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ── Conversion ───────────────────────────────────────────────────────

fn to_openai_tool(tool: &ToolDefinition) -> OpenAITool {
    OpenAITool {
        tool_type: "function".to_string(),
        function: OpenAIFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

fn to_openai_request(request: &CompletionRequest) -> OpenAIRequest {
    let tools: Vec<OpenAITool> = request.tools.iter().map(to_openai_tool).collect();
    OpenAIRequest {
        model: request.model.clone(),
        messages: request
            .messages
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: request.stream,
        tools: if tools.is_empty() { None } else { Some(tools) },
        tool_choice: request.tool_choice.as_ref().map(|name| OpenAIToolChoice {
            choice_type: "function".to_string(),
            function: OpenAIToolChoiceFunction { name: name.clone() },
        }),
    }
}

fn from_openai_response(body: OpenAIResponse) -> CompletionResponse {
    let usage = body
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let Some(choice) = body.choices.into_iter().next() else {
        return CompletionResponse {
            usage,
            ..Default::default()
        };
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    CompletionResponse {
        content: choice.message.content,
        tool_calls,
        usage,
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OpenAIClient {
    http: Client,
    auth_token: String,
    base_url: String,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

impl OpenAIClient {
    pub fn from_auth(auth: &ProviderAuth, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let auth_token = auth
            .resolve_key()
            .ok_or_else(|| anyhow!("No OpenAI authentication configured"))?;

        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            http,
            auth_token,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CompletionBackend for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let req = to_openai_request(&request);
        tracing::debug!(
            model = %req.model,
            messages = req.messages.len(),
            tools = req.tools.as_ref().map_or(0, Vec::len),
            "openai chat completion"
        );

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            if detail.trim().is_empty() {
                return Err(anyhow!("openai error: {}", status));
            }
            return Err(anyhow!("openai error: {}\n{}", status, detail));
        }
        let body: OpenAIResponse = resp.json().await?;
        Ok(from_openai_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::agent_api::ChatMessage;

    #[test]
    fn test_forced_tool_request_shape() {
        let tool = ToolDefinition {
            name: "classify_question".into(),
            description: "classify".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let request = CompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")])
            .force_tool(tool);
        let body = serde_json::to_value(to_openai_request(&request)).unwrap();

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "classify_question");
        assert_eq!(body["tool_choice"]["function"]["name"], "classify_question");
        assert_eq!(body["stream"], false);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_plain_request_omits_tools() {
        let request = CompletionRequest::new("m", vec![ChatMessage::system("s")]).max_tokens(300);
        let body = serde_json::to_value(to_openai_request(&request)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_response_with_tool_call_and_usage() {
        let raw = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "classify_question", "arguments": "{\"type\":\"techSpec\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 7, "total_tokens": 127}
        }"#;
        let parsed = from_openai_response(serde_json::from_str(raw).unwrap());
        assert_eq!(parsed.first_tool_arguments(), Some("{\"type\":\"techSpec\"}"));
        assert_eq!(parsed.usage, TokenUsage::new(120, 7));
        assert_eq!(parsed.content_text(), "");
    }

    #[test]
    fn test_response_without_usage_or_choices() {
        let parsed = from_openai_response(serde_json::from_str(r#"{"choices": []}"#).unwrap());
        assert_eq!(parsed.usage, TokenUsage::default());
        assert!(parsed.content.is_none());
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let auth = ProviderAuth {
            api_key: Some("   ".into()),
        };
        // whitespace key is ignored and only the env fallback could satisfy it
        if std::env::var(shared::settings::API_KEY_ENV).is_err() {
            assert!(OpenAIClient::from_auth(&auth, None, Duration::from_secs(1)).is_err());
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let auth = ProviderAuth::with_key("sk-test");
        let client =
            OpenAIClient::from_auth(&auth, Some("http://localhost:3000/"), Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }
}
