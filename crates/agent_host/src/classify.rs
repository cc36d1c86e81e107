//! Question classification.
//!
//! Two strategies, chosen once per model configuration:
//! - [`ToolChoiceStrategy`] forces a `classify_question` function call whose only
//!   argument is an enum of candidate keys
//! - [`PromptStrategy`] renders the free-text template and looks for a candidate
//!   key or label in the answer
//!
//! Whatever the strategy returns, a key that is not one of the candidates
//! resolves to the **last** candidate. Callers put their catch-all bucket last.

use async_trait::async_trait;
use providers::{CompletionBackend, CompletionRequest, ToolDefinition};
use serde::Deserialize;
use shared::agent_api::ChatMessage;
use shared::chat::{AgentRequest, AgentResult, ClassificationCandidate, ConversationTurn, TokenUsage};
use shared::error::{AgentError, DispatchResult};
use shared::settings::ModelConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context_filter::fit_to_context;
use crate::dispatch::{invoke, DispatchSettings};
use crate::history::select_window_with_default;
use crate::prompts::{
    replace_variable, CLASSIFY_BACKGROUND_QUESTION, CLASSIFY_FUNCTION_DESCRIPTION,
    CLASSIFY_FUNCTION_NAME, CLASSIFY_JSON_PROMPT, CLASSIFY_SYSTEM_PROMPT,
};

/// Everything a strategy needs for one classification.
pub struct ClassifyInput<'a> {
    pub model: &'a ModelConfig,
    pub history: &'a [ConversationTurn],
    pub system_context: Option<&'a str>,
    pub user_input: &'a str,
    pub candidates: &'a [ClassificationCandidate],
}

/// Raw strategy outcome before the default-bucket fallback is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub key: Option<String>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ClassifyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(
        &self,
        input: ClassifyInput<'_>,
        cancel: &CancellationToken,
    ) -> DispatchResult<Selection>;
}

#[derive(Debug, Deserialize)]
struct ClassifyArguments {
    #[serde(rename = "type")]
    kind: String,
}

/// Structured call: the model must invoke `classify_question`.
pub struct ToolChoiceStrategy {
    backend: Arc<dyn CompletionBackend>,
    settings: DispatchSettings,
}

impl ToolChoiceStrategy {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: DispatchSettings) -> Self {
        Self { backend, settings }
    }
}

pub fn classify_tool(candidates: &[ClassificationCandidate]) -> ToolDefinition {
    let described = candidates
        .iter()
        .map(|c| format!("{}，返回：'{}'", c.label, c.key))
        .collect::<Vec<_>>()
        .join("；");
    let keys: Vec<&str> = candidates.iter().map(|c| c.key.as_str()).collect();

    ToolDefinition {
        name: CLASSIFY_FUNCTION_NAME.to_string(),
        description: CLASSIFY_FUNCTION_DESCRIPTION.to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "description": format!("问题类型。下面是几种可选的问题类型: {described}"),
                    "enum": keys
                }
            },
            "required": ["type"]
        }),
    }
}

/// Parse `{"type": "<key>"}` out of the tool call arguments.
pub fn parse_tool_arguments(arguments: &str) -> DispatchResult<String> {
    serde_json::from_str::<ClassifyArguments>(arguments)
        .map(|args| args.kind)
        .map_err(|e| AgentError::parse(e.to_string()))
}

#[async_trait]
impl ClassifyStrategy for ToolChoiceStrategy {
    fn name(&self) -> &'static str {
        "tool_choice"
    }

    async fn select(
        &self,
        input: ClassifyInput<'_>,
        cancel: &CancellationToken,
    ) -> DispatchResult<Selection> {
        let question = match input.system_context.filter(|c| !c.trim().is_empty()) {
            Some(context) => replace_variable(
                CLASSIFY_BACKGROUND_QUESTION,
                &[("systemPrompt", context), ("question", input.user_input)],
            ),
            None => input.user_input.to_string(),
        };

        let mut turns = Vec::with_capacity(input.history.len() + 2);
        turns.push(ConversationTurn::system(CLASSIFY_SYSTEM_PROMPT));
        turns.extend_from_slice(input.history);
        turns.push(ConversationTurn::human(question));
        let turns = fit_to_context(&turns, input.model.max_context);
        let messages: Vec<ChatMessage> = turns.iter().map(ChatMessage::from).collect();

        let request = CompletionRequest::new(&input.model.model, messages)
            .temperature(0.0)
            .force_tool(classify_tool(input.candidates));
        let response = invoke(self.backend.as_ref(), request, &self.settings, cancel).await?;

        let key = match response.first_tool_arguments() {
            Some(arguments) => match parse_tool_arguments(arguments) {
                Ok(key) => Some(key),
                Err(err) => {
                    tracing::warn!(error = %err, "model may not support tool calls");
                    None
                }
            },
            None => {
                tracing::warn!(model = %input.model.model, "no tool call in classification response");
                None
            }
        };

        Ok(Selection {
            key,
            usage: response.usage,
        })
    }
}

/// Free-text call using the JSON-ish classification template.
pub struct PromptStrategy {
    backend: Arc<dyn CompletionBackend>,
    settings: DispatchSettings,
}

impl PromptStrategy {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: DispatchSettings) -> Self {
        Self { backend, settings }
    }
}

pub fn render_prompt(input: &ClassifyInput<'_>) -> String {
    let type_list = input
        .candidates
        .iter()
        .map(|c| format!(r#"{{"questionType": "{}", "typeId": "{}"}}"#, c.label, c.key))
        .collect::<Vec<_>>()
        .join("\n");
    let history = input
        .history
        .iter()
        .map(|t| format!("{}:{}", t.role, t.text))
        .collect::<Vec<_>>()
        .join("\n");
    let system_prompt = input
        .system_context
        .filter(|c| !c.is_empty())
        .unwrap_or("null");
    let template = input
        .model
        .function_prompt
        .as_deref()
        .unwrap_or(CLASSIFY_JSON_PROMPT);

    replace_variable(
        template,
        &[
            ("systemPrompt", system_prompt),
            ("typeList", &type_list),
            ("history", &history),
            ("question", input.user_input),
        ],
    )
}

/// First candidate whose key or label occurs in `answer`.
pub fn match_answer<'a>(
    answer: &str,
    candidates: &'a [ClassificationCandidate],
) -> Option<&'a ClassificationCandidate> {
    candidates.iter().find(|c| {
        (!c.key.is_empty() && answer.contains(&c.key))
            || (!c.label.is_empty() && answer.contains(&c.label))
    })
}

#[async_trait]
impl ClassifyStrategy for PromptStrategy {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn select(
        &self,
        input: ClassifyInput<'_>,
        cancel: &CancellationToken,
    ) -> DispatchResult<Selection> {
        let prompt = render_prompt(&input);
        let request = CompletionRequest::new(&input.model.model, vec![ChatMessage::user(prompt)])
            .temperature(0.01);
        let response = invoke(self.backend.as_ref(), request, &self.settings, cancel).await?;

        let answer = response.content_text();
        let key = match_answer(answer, input.candidates).map(|c| c.key.clone());
        if key.is_none() {
            tracing::warn!(answer, "classification answer matched no candidate");
        }

        Ok(Selection {
            key,
            usage: response.usage,
        })
    }
}

/// Candidate with `key`, or the last candidate (default bucket).
pub fn resolve_candidate<'a>(
    candidates: &'a [ClassificationCandidate],
    key: Option<&str>,
) -> Option<&'a ClassificationCandidate> {
    key.and_then(|k| candidates.iter().find(|c| c.key == k))
        .or_else(|| candidates.last())
}

pub struct ClassifyDispatcher {
    model: ModelConfig,
    settings: DispatchSettings,
    strategy: Box<dyn ClassifyStrategy>,
}

impl ClassifyDispatcher {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        model: ModelConfig,
        settings: DispatchSettings,
    ) -> Self {
        let strategy: Box<dyn ClassifyStrategy> = if model.tool_choice {
            Box::new(ToolChoiceStrategy::new(backend, settings.clone()))
        } else {
            Box::new(PromptStrategy::new(backend, settings.clone()))
        };
        Self {
            model,
            settings,
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn classify(
        &self,
        request: &AgentRequest,
        candidates: &[ClassificationCandidate],
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        if request.user_input.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        if candidates.is_empty() {
            return Err(AgentError::NoCandidates);
        }

        let history = select_window_with_default(
            &request.history,
            request.window_size,
            self.settings.default_history_window,
        );
        let input = ClassifyInput {
            model: &self.model,
            history: &history,
            system_context: request.system_context.as_deref(),
            user_input: &request.user_input,
            candidates,
        };
        let selection = self.strategy.select(input, cancel).await?;

        let Some(chosen) = resolve_candidate(candidates, selection.key.as_deref()) else {
            return Err(AgentError::NoCandidates);
        };
        if selection.key.as_deref() != Some(chosen.key.as_str()) {
            tracing::warn!(
                returned = ?selection.key,
                fallback = %chosen.key,
                "classification fell back to default candidate"
            );
        }
        tracing::info!(
            strategy = self.strategy.name(),
            model = %self.model.model,
            key = %chosen.key,
            input_tokens = selection.usage.input_tokens,
            output_tokens = selection.usage.output_tokens,
            "question classified"
        );

        Ok(AgentResult {
            output_text: chosen.label.clone(),
            usage: selection.usage,
            resolved_label: Some(chosen.key.clone()),
            alternatives: Vec::new(),
        })
    }
}
