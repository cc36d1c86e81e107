//! Conversation data model shared by the dispatchers and the history store.
//!
//! Everything here is request-scoped: turns are read from the history store,
//! windowed, filtered and discarded once a dispatcher returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatRole {
    Human,
    #[serde(rename = "AI")]
    Ai,
    System,
}

impl ChatRole {
    /// Role name expected by OpenAI-compatible chat endpoints
    pub fn as_openai_role(&self) -> &'static str {
        match self {
            ChatRole::Human => "user",
            ChatRole::Ai => "assistant",
            ChatRole::System => "system",
        }
    }

    /// Stored representation, also used when history is rendered into prompts
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Human => "Human",
            ChatRole::Ai => "AI",
            ChatRole::System => "System",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Human" => Some(ChatRole::Human),
            "AI" => Some(ChatRole::Ai),
            "System" => Some(ChatRole::System),
            _ => None,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation.
///
/// `sequence_id` is opaque; insertion order is the only ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub text: String,
    pub sequence_id: String,
}

impl ConversationTurn {
    pub fn new(role: ChatRole, text: impl Into<String>, sequence_id: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            sequence_id: sequence_id.into(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Human, text, "")
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Ai, text, "")
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatRole::System, text, "")
    }
}

/// How much history a request wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSize {
    /// Keep the last N turns
    Turns(usize),
    /// Keep everything; only the context filter trims
    Full,
}

/// Input of every dispatcher. Built per call, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub user_input: String,
    pub history: Vec<ConversationTurn>,
    pub system_context: Option<String>,
    pub model_selector: String,
    /// `None` means "use the configured default window"
    pub window_size: Option<WindowSize>,
}

impl AgentRequest {
    pub fn new(user_input: impl Into<String>, model_selector: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            model_selector: model_selector.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_context(mut self, context: impl Into<String>) -> Self {
        self.system_context = Some(context.into());
        self
    }

    pub fn with_window(mut self, window: WindowSize) -> Self {
        self.window_size = Some(window);
        self
    }
}

/// Token counts reported by the completion endpoint (0 when absent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Output of a dispatcher; the caller owns persistence and billing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub output_text: String,
    pub usage: TokenUsage,
    /// Candidate key chosen by the classifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_label: Option<String>,
    /// Alternative phrasings produced in retrieval-expansion mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

impl AgentResult {
    pub fn text(output_text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            output_text: output_text.into(),
            usage,
            ..Default::default()
        }
    }

    /// Result of a dispatcher that decided not to call the model
    pub fn passthrough(output_text: impl Into<String>) -> Self {
        Self::text(output_text, TokenUsage::default())
    }
}

/// One possible classification outcome, supplied per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCandidate {
    pub key: String,
    pub label: String,
}

impl ClassificationCandidate {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// A persisted turn as stored by the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatItem {
    pub data_id: String,
    pub app_id: String,
    pub chat_id: String,
    pub session_user_id: String,
    pub role: ChatRole,
    pub value: String,
    pub time: DateTime<Utc>,
    /// 0 = active; anything else hides the item from history reads
    pub del_flag: i64,
    #[serde(default)]
    pub custom_feedbacks: Vec<String>,
}

impl ChatItem {
    pub fn to_turn(&self) -> ConversationTurn {
        ConversationTurn::new(self.role, self.value.clone(), self.data_id.clone())
    }
}

/// Conversation header kept next to the items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub app_id: String,
    pub title: String,
    pub update_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_names() {
        assert_eq!(serde_json::to_string(&ChatRole::Ai).unwrap(), "\"AI\"");
        assert_eq!(ChatRole::parse("Human"), Some(ChatRole::Human));
        assert_eq!(ChatRole::parse("bot"), None);
        assert_eq!(ChatRole::System.as_openai_role(), "system");
    }

    #[test]
    fn test_request_builder() {
        let request = AgentRequest::new("hello", "gpt-4o-mini")
            .with_system_context("none")
            .with_window(WindowSize::Turns(2));
        assert_eq!(request.system_context.as_deref(), Some("none"));
        assert_eq!(request.window_size, Some(WindowSize::Turns(2)));
        assert!(request.history.is_empty());
    }

    #[test]
    fn test_passthrough_has_zero_usage() {
        let result = AgentResult::passthrough("same");
        assert_eq!(result.usage.total_tokens(), 0);
        assert!(result.resolved_label.is_none());
    }
}
