pub mod chat;
pub mod error;

pub mod settings {
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::env;
    use std::path::Path;
    use std::time::Duration;

    pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

    fn default_history_window() -> usize {
        6
    }

    fn default_request_timeout_secs() -> u64 {
        480
    }

    fn default_history_read_limit() -> usize {
        30
    }

    fn default_ocr_recipient() -> String {
        "西安恒达微波公司".into()
    }

    fn default_max_context() -> usize {
        16000
    }

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    pub struct ProviderAuth {
        pub api_key: Option<String>,
    }

    impl ProviderAuth {
        pub fn with_key(key: impl Into<String>) -> Self {
            Self {
                api_key: Some(key.into()),
            }
        }

        /// Configured key, falling back to `OPENAI_API_KEY`.
        pub fn resolve_key(&self) -> Option<String> {
            self.api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .or_else(|| {
                    tracing::debug!("no api key configured, reading {}", API_KEY_ENV);
                    env::var(API_KEY_ENV).ok()
                })
        }
    }

    /// Endpoint used by the chat, classification and rewrite dispatchers
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    pub struct ProviderSettings {
        pub base_url: Option<String>, // e.g., "https://api.openai.com"
        #[serde(default)]
        pub auth: ProviderAuth,
    }

    /// Per-model capabilities, selected by `AgentRequest::model_selector`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        pub model: String, // e.g., "gpt-4o-mini"
        #[serde(default)]
        pub name: String, // display name, also accepted as selector
        #[serde(default = "default_max_context")]
        pub max_context: usize,
        /// Model supports forced tool calls; picks the structured classifier
        #[serde(default)]
        pub tool_choice: bool,
        /// Overrides the free-text classification template
        #[serde(default)]
        pub function_prompt: Option<String>,
    }

    impl ModelConfig {
        pub fn new(model: impl Into<String>, max_context: usize, tool_choice: bool) -> Self {
            let model = model.into();
            Self {
                name: model.clone(),
                model,
                max_context,
                tool_choice,
                function_prompt: None,
            }
        }

        pub fn matches(&self, selector: &str) -> bool {
            self.model == selector || (!self.name.is_empty() && self.name == selector)
        }
    }

    /// Dedicated endpoint for OCR question generation
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OcrSettings {
        pub model: String,
        pub base_url: Option<String>,
        #[serde(default)]
        pub auth: ProviderAuth,
        /// Company the composed question is addressed to
        #[serde(default = "default_ocr_recipient")]
        pub recipient: String,
    }

    impl Default for OcrSettings {
        fn default() -> Self {
            Self {
                model: "gpt-4o-mini".into(),
                base_url: None,
                auth: ProviderAuth::default(),
                recipient: default_ocr_recipient(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AgentSettings {
        #[serde(default)]
        pub provider: ProviderSettings,
        pub models: Vec<ModelConfig>,
        #[serde(default)]
        pub ocr: OcrSettings,
        #[serde(default = "default_history_window")]
        pub default_history_window: usize,
        #[serde(default = "default_request_timeout_secs")]
        pub request_timeout_secs: u64,
        #[serde(default = "default_history_read_limit")]
        pub history_read_limit: usize,
    }

    impl Default for AgentSettings {
        fn default() -> Self {
            Self {
                provider: ProviderSettings::default(),
                models: vec![
                    ModelConfig::new("gpt-4o-mini", 128000, true),
                    ModelConfig::new("gpt-3.5-turbo", 16000, false),
                ],
                ocr: OcrSettings::default(),
                default_history_window: default_history_window(),
                request_timeout_secs: default_request_timeout_secs(),
                history_read_limit: default_history_read_limit(),
            }
        }
    }

    impl AgentSettings {
        pub fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.request_timeout_secs)
        }

        pub fn from_json(raw: &str) -> Result<Self> {
            let settings: AgentSettings =
                serde_json::from_str(raw).context("invalid agent settings")?;
            if settings.models.is_empty() {
                anyhow::bail!("agent settings must list at least one model");
            }
            Ok(settings)
        }

        pub fn load(path: &Path) -> Result<Self> {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            Self::from_json(&raw)
        }
    }

}

pub mod agent_api {
    use crate::chat::ConversationTurn;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn system(content: impl Into<String>) -> Self {
            Self {
                role: "system".into(),
                content: content.into(),
            }
        }

        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: "user".into(),
                content: content.into(),
            }
        }
    }

    impl From<&ConversationTurn> for ChatMessage {
        fn from(turn: &ConversationTurn) -> Self {
            Self {
                role: turn.role.as_openai_role().to_string(),
                content: turn.text.clone(),
            }
        }
    }
}
