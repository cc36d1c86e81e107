//! Provider-neutral completion request/response types.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::agent_api::ChatMessage;
use shared::chat::TokenUsage;

/// A callable function declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// A function invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON text, exactly as the provider returned it
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    /// Name of the tool the model must call
    pub tool_choice: Option<String>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Declare `tool` and force the model to call it.
    pub fn force_tool(mut self, tool: ToolDefinition) -> Self {
        self.tool_choice = Some(tool.name.clone());
        self.tools = vec![tool];
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    /// `choices[0].message.content`
    pub content: Option<String>,
    /// `choices[0].message.tool_calls`
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage,
        }
    }

    pub fn tool_call(
        name: impl Into<String>,
        arguments: impl Into<String>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                name: name.into(),
                arguments: arguments.into(),
            }],
            usage,
        }
    }

    /// Content with surrounding whitespace removed; empty when absent.
    pub fn content_text(&self) -> &str {
        self.content.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn first_tool_arguments(&self) -> Option<&str> {
        self.tool_calls.first().map(|c| c.arguments.as_str())
    }
}

/// Anything that can answer a chat-completion request.
///
/// Implementations perform exactly one remote call per `complete` and never
/// retry.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
