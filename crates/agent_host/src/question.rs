//! Question generation: the OCR question composer and the follow-up
//! question guide.
//!
//! Both degrade silently. A failed call yields an empty result so the chat
//! send flow around them is never blocked; only cancellation is reported.

use providers::{CompletionBackend, CompletionRequest, CompletionResponse};
use shared::agent_api::ChatMessage;
use shared::chat::{AgentResult, ConversationTurn, TokenUsage};
use shared::error::{AgentError, DispatchResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context_filter::fit_to_context;
use crate::dispatch::{invoke, DispatchSettings};
use crate::history::select_window_with_default;
use crate::prompts::{replace_variable, OCR_QUESTION_PROMPT, OCR_SYSTEM_PROMPT, QUESTION_GUIDE_PROMPT};

pub const OCR_MAX_TOKENS: u32 = 4096;

/// Follow-up questions suggested after an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionGuide {
    pub questions: Vec<String>,
    pub usage: TokenUsage,
}

/// Parse the first `[...]` block of `answer` as a JSON string array.
pub fn parse_question_list(answer: &str) -> DispatchResult<Vec<String>> {
    let (Some(start), Some(end)) = (answer.find('['), answer.rfind(']')) else {
        return Err(AgentError::parse("no JSON array in answer"));
    };
    if end < start {
        return Err(AgentError::parse("unbalanced brackets"));
    }
    serde_json::from_str::<Vec<String>>(&answer[start..=end])
        .map_err(|e| AgentError::parse(e.to_string()))
}

pub struct QuestionDispatcher {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    max_context: usize,
    recipient: String,
    settings: DispatchSettings,
}

impl QuestionDispatcher {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        model: impl Into<String>,
        max_context: usize,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            max_context,
            recipient: String::new(),
            settings,
        }
    }

    /// Company named in the OCR question template.
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    /// Compose one consolidated inquiry from upstream OCR text.
    ///
    /// Returns an empty `output_text` on any failure.
    pub async fn generate_question(
        &self,
        raw_text: &str,
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        if raw_text.trim().is_empty() {
            return Ok(AgentResult::passthrough(""));
        }

        let prompt = replace_variable(
            OCR_QUESTION_PROMPT,
            &[("message", raw_text), ("recipient", &self.recipient)],
        );
        let request = CompletionRequest::new(
            &self.model,
            vec![ChatMessage::system(OCR_SYSTEM_PROMPT), ChatMessage::user(prompt)],
        )
        .temperature(0.0)
        .max_tokens(OCR_MAX_TOKENS);

        let Some(response) = self.call_silently(request, cancel, "ocr question").await? else {
            return Ok(AgentResult::passthrough(""));
        };

        let question = response.content_text();
        if question.is_empty() {
            tracing::warn!(model = %self.model, "ocr question came back empty");
        } else {
            tracing::info!(
                model = %self.model,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "ocr question generated"
            );
        }
        Ok(AgentResult::text(question, response.usage))
    }

    /// Suggest three follow-up questions for the recent conversation.
    ///
    /// Returns an empty list on any failure.
    pub async fn question_guide(
        &self,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> DispatchResult<QuestionGuide> {
        let mut turns =
            select_window_with_default(history, None, self.settings.default_history_window);
        turns.push(ConversationTurn::human(QUESTION_GUIDE_PROMPT));
        let turns = fit_to_context(&turns, self.max_context);
        let messages: Vec<ChatMessage> = turns.iter().map(ChatMessage::from).collect();

        let request = CompletionRequest::new(&self.model, messages).temperature(0.1);
        let Some(response) = self.call_silently(request, cancel, "question guide").await? else {
            return Ok(QuestionGuide::default());
        };

        let questions = match parse_question_list(response.content_text()) {
            Ok(questions) => questions,
            Err(err) => {
                tracing::warn!(error = %err, "question guide answer not parseable");
                Vec::new()
            }
        };
        Ok(QuestionGuide {
            questions,
            usage: response.usage,
        })
    }

    /// One call where every failure except cancellation becomes `None`.
    async fn call_silently(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
        what: &str,
    ) -> DispatchResult<Option<CompletionResponse>> {
        match invoke(self.backend.as_ref(), request, &self.settings, cancel).await {
            Ok(response) => Ok(Some(response)),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, what, "completion failed, returning empty result");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PendingBackend, ScriptedBackend};
    use std::time::Duration;

    fn dispatcher(backend: Arc<dyn CompletionBackend>) -> QuestionDispatcher {
        QuestionDispatcher::new(backend, "ocr-model", 16000, DispatchSettings::default())
            .with_recipient("西安恒达微波公司")
    }

    #[tokio::test]
    async fn test_generates_question_from_ocr_text() {
        let backend = Arc::new(ScriptedBackend::new([Ok(CompletionResponse::text(
            "请问是否有工作频率8-18GHz、增益17dBi、2.92接头的喇叭天线？",
            TokenUsage::new(400, 30),
        ))]));
        let result = dispatcher(backend.clone())
            .generate_question("频率 8-18GHz\n增益 17\n接头 2.92", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.output_text.contains("8-18GHz"));
        assert_eq!(result.usage, TokenUsage::new(400, 30));

        let sent = backend.last_request();
        assert_eq!(sent.model, "ocr-model");
        assert_eq!(sent.max_tokens, Some(OCR_MAX_TOKENS));
        assert_eq!(sent.temperature, 0.0);
        assert!(!sent.stream);
        assert_eq!(sent.messages[0].content, OCR_SYSTEM_PROMPT);
        assert!(sent.messages[1].content.contains("频率 8-18GHz\n增益 17"));
        assert!(sent.messages[1].content.contains("向西安恒达微波公司提出"));
    }

    #[tokio::test]
    async fn test_remote_failure_yields_empty_result() {
        let backend = Arc::new(ScriptedBackend::new([Err("connection reset".to_string())]));
        let result = dispatcher(backend)
            .generate_question("some text", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output_text, "");
        assert_eq!(result.usage, TokenUsage::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_empty_result() {
        let settings = DispatchSettings {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let d = QuestionDispatcher::new(Arc::new(PendingBackend), "m", 1000, settings);
        let result = d
            .generate_question("text", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.output_text.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_is_reported() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatcher(Arc::new(PendingBackend))
            .generate_question("text", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_blank_text_skips_call() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let result = dispatcher(backend.clone())
            .generate_question("  \n", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.output_text.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_question_guide_parses_array() {
        let backend = Arc::new(ScriptedBackend::new([Ok(CompletionResponse::text(
            "好的：[\"有哪些型号？\", \"价格多少？\", \"交期多久？\"]",
            TokenUsage::new(80, 20),
        ))]));
        let history = vec![
            ConversationTurn::human("你们有全向天线吗？"),
            ConversationTurn::ai("有的。"),
        ];
        let guide = dispatcher(backend.clone())
            .question_guide(&history, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(guide.questions, vec!["有哪些型号？", "价格多少？", "交期多久？"]);
        assert_eq!(guide.usage, TokenUsage::new(80, 20));

        let sent = backend.last_request();
        assert_eq!(sent.messages.len(), 3);
        assert_eq!(sent.messages[2].content, QUESTION_GUIDE_PROMPT);
    }

    #[tokio::test]
    async fn test_question_guide_degrades_to_empty() {
        let backend = Arc::new(ScriptedBackend::new([
            Ok(CompletionResponse::text("没有问题", TokenUsage::new(10, 2))),
            Err("500".to_string()),
        ]));
        let d = dispatcher(backend);
        let unparsable = d.question_guide(&[], &CancellationToken::new()).await.unwrap();
        assert!(unparsable.questions.is_empty());
        assert_eq!(unparsable.usage, TokenUsage::new(10, 2));
        let failed = d.question_guide(&[], &CancellationToken::new()).await.unwrap();
        assert_eq!(failed, QuestionGuide::default());
    }

    #[test]
    fn test_parse_question_list_errors() {
        assert!(parse_question_list("] [").is_err());
        assert!(parse_question_list("[1, 2]").is_err());
        assert_eq!(parse_question_list("[]").unwrap(), Vec::<String>::new());
    }
}
