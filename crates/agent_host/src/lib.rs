//! Agent Host - conversational agent dispatch
//!
//! This crate turns a user question plus recent conversation into:
//! - a classification key (which downstream flow should answer it)
//! - a self-contained rewrite of the question, or retrieval phrasings
//! - a consolidated question composed from OCR text
//! - follow-up question suggestions
//!
//! Each dispatcher renders a template, makes one completion call and parses the
//! answer with a deterministic fallback. Persistence and billing stay with the
//! caller.

pub mod classify;
pub mod context_filter;
pub mod dispatch;
pub mod history;
pub mod prompts;
pub mod question;
pub mod rewrite;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{ClassifyDispatcher, ClassifyStrategy};
pub use context_filter::{estimate_tokens, fit_to_context};
pub use dispatch::DispatchSettings;
pub use history::{select_window, DEFAULT_HISTORY_WINDOW};
pub use question::{QuestionDispatcher, QuestionGuide};
pub use rewrite::RewriteDispatcher;

use anyhow::Result;
use providers::registry::{connect_chat_backend, connect_ocr_backend};
use providers::{CompletionBackend, ModelRegistry};
use shared::chat::{AgentRequest, AgentResult, ClassificationCandidate, ConversationTurn};
use shared::error::DispatchResult;
use shared::settings::AgentSettings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds dispatchers for a model selector from one explicit configuration.
pub struct AgentHost {
    settings: DispatchSettings,
    registry: ModelRegistry,
    chat_backend: Arc<dyn CompletionBackend>,
    ocr_backend: Arc<dyn CompletionBackend>,
    ocr_model: String,
    ocr_recipient: String,
}

impl AgentHost {
    /// Connect to the endpoints named in `settings`.
    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        let chat_backend = connect_chat_backend(settings)?;
        let ocr_backend = connect_ocr_backend(settings)?;
        Self::with_backends(settings, chat_backend, ocr_backend)
    }

    pub fn with_backends(
        settings: &AgentSettings,
        chat_backend: Arc<dyn CompletionBackend>,
        ocr_backend: Arc<dyn CompletionBackend>,
    ) -> Result<Self> {
        Ok(Self {
            settings: DispatchSettings::from(settings),
            registry: ModelRegistry::from_settings(settings)?,
            chat_backend,
            ocr_backend,
            ocr_model: settings.ocr.model.clone(),
            ocr_recipient: settings.ocr.recipient.clone(),
        })
    }

    pub fn classifier(&self, selector: &str) -> ClassifyDispatcher {
        ClassifyDispatcher::new(
            self.chat_backend.clone(),
            self.registry.resolve(selector).clone(),
            self.settings.clone(),
        )
    }

    pub fn rewriter(&self, selector: &str) -> RewriteDispatcher {
        RewriteDispatcher::new(
            self.chat_backend.clone(),
            self.registry.resolve(selector).clone(),
            self.settings.clone(),
        )
    }

    /// Dispatcher bound to the dedicated OCR endpoint and model.
    pub fn ocr_questions(&self) -> QuestionDispatcher {
        let max_context = self
            .registry
            .models()
            .iter()
            .find(|m| m.matches(&self.ocr_model))
            .map_or(usize::MAX, |m| m.max_context);
        QuestionDispatcher::new(
            self.ocr_backend.clone(),
            self.ocr_model.clone(),
            max_context,
            self.settings.clone(),
        )
        .with_recipient(&self.ocr_recipient)
    }

    /// Dispatcher for follow-up suggestions on the chat endpoint.
    pub fn guide(&self, selector: &str) -> QuestionDispatcher {
        let model = self.registry.resolve(selector);
        QuestionDispatcher::new(
            self.chat_backend.clone(),
            model.model.clone(),
            model.max_context,
            self.settings.clone(),
        )
    }

    pub async fn classify(
        &self,
        request: &AgentRequest,
        candidates: &[ClassificationCandidate],
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        self.classifier(&request.model_selector)
            .classify(request, candidates, cancel)
            .await
    }

    pub async fn rewrite(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        self.rewriter(&request.model_selector)
            .rewrite(request, cancel)
            .await
    }

    pub async fn generate_question(
        &self,
        raw_text: &str,
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        self.ocr_questions().generate_question(raw_text, cancel).await
    }

    pub async fn question_guide(
        &self,
        selector: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> DispatchResult<QuestionGuide> {
        self.guide(selector).question_guide(history, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use providers::CompletionResponse;
    use shared::chat::TokenUsage;
    use shared::settings::{ModelConfig, ProviderAuth};

    fn settings() -> AgentSettings {
        AgentSettings {
            models: vec![
                ModelConfig::new("tool-model", 16000, true),
                ModelConfig::new("text-model", 4000, false),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_host_builds_with_chat_only_key() {
        let mut settings = settings();
        settings.provider.auth = ProviderAuth::with_key("sk-chat-only");
        let host = AgentHost::from_settings(&settings).unwrap();
        assert_eq!(host.classifier("text-model").strategy_name(), "prompt");
    }

    #[test]
    fn test_strategy_follows_model_capability() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let host = AgentHost::with_backends(&settings(), backend.clone(), backend).unwrap();
        assert_eq!(host.classifier("tool-model").strategy_name(), "tool_choice");
        assert_eq!(host.classifier("text-model").strategy_name(), "prompt");
        assert_eq!(host.classifier("unknown").strategy_name(), "tool_choice");
    }

    #[tokio::test]
    async fn test_ocr_uses_its_own_backend() {
        let chat = Arc::new(ScriptedBackend::new([]));
        let ocr = Arc::new(ScriptedBackend::new([Ok(CompletionResponse::text(
            "生成的问题",
            TokenUsage::new(1, 1),
        ))]));
        let host = AgentHost::with_backends(&settings(), chat.clone(), ocr.clone()).unwrap();
        let result = host
            .generate_question("识别的文字", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output_text, "生成的问题");
        assert_eq!(chat.calls(), 0);
        assert_eq!(ocr.calls(), 1);
        assert_eq!(ocr.last_request().model, "gpt-4o-mini");
        assert!(ocr.last_request().messages[1].content.contains("西安恒达微波公司"));
    }

    #[tokio::test]
    async fn test_rewrite_routes_by_selector() {
        let backend = Arc::new(ScriptedBackend::new([Ok(CompletionResponse::text(
            "改写后的问题",
            TokenUsage::new(10, 5),
        ))]));
        let host = AgentHost::with_backends(&settings(), backend.clone(), backend.clone()).unwrap();
        let request = AgentRequest::new("这个呢", "text-model")
            .with_history(vec![ConversationTurn::human("介质天线"), ConversationTurn::ai("有")]);
        let result = host.rewrite(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.output_text, "改写后的问题");
        assert_eq!(backend.last_request().model, "text-model");
    }
}
