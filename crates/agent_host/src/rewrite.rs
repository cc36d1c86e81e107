//! Coreference resolution / query rewriting.
//!
//! Rewrites the user's question so it stands on its own, pulling product names
//! and parameters in from the recent conversation. When the system context
//! starts with [`EXPANSION_MARKER`] the same dispatcher instead produces up to
//! three alternative phrasings for semantic search.

use providers::{CompletionBackend, CompletionRequest};
use regex::Regex;
use shared::agent_api::ChatMessage;
use shared::chat::{AgentRequest, AgentResult, ChatRole, ConversationTurn};
use shared::error::{AgentError, DispatchResult};
use shared::settings::ModelConfig;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

use crate::context_filter::fit_to_context;
use crate::dispatch::{invoke, DispatchSettings};
use crate::history::select_window_with_default;
use crate::prompts::{
    replace_variable, CUSTOMER_QUESTION_PREFIX, EXPANSION_MARKER, EXPANSION_SYSTEM_PROMPT,
    EXPANSION_TASK_PROMPT, REWRITE_SYSTEM_PROMPT, REWRITE_TASK_PROMPT,
};

/// System context value that disables rewriting.
pub const NO_CONTEXT_SENTINEL: &str = "none";

pub const REWRITE_MAX_TOKENS: u32 = 300;

pub const MAX_ALTERNATIVES: usize = 3;

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[.、)]|[-*•])(\s*)").expect("list marker pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// One self-contained question
    Rewrite,
    /// Up to three phrasings to widen retrieval
    Expansion,
}

/// Split the system context into mode and background text.
pub fn parse_system_context(context: Option<&str>) -> (RewriteMode, Option<&str>) {
    match context {
        Some(ctx) => match ctx.strip_prefix(EXPANSION_MARKER) {
            Some(rest) => {
                let rest = rest.trim();
                (RewriteMode::Expansion, (!rest.is_empty()).then_some(rest))
            }
            None => (RewriteMode::Rewrite, (!ctx.is_empty()).then_some(ctx)),
        },
        None => (RewriteMode::Rewrite, None),
    }
}

/// True when the request has nothing to resolve against.
pub fn should_short_circuit(request: &AgentRequest) -> bool {
    match request.system_context.as_deref() {
        Some(NO_CONTEXT_SENTINEL) => true,
        Some(ctx) if !ctx.is_empty() => false,
        _ => request.history.is_empty(),
    }
}

/// Few-shot block: optional background line, then `Q:`/`A:` history lines.
pub fn render_histories(background: Option<&str>, history: &[ConversationTurn]) -> String {
    let system_few_shot = background
        .map(|bg| format!("Q: 对话背景。\nA: {bg}\n"))
        .unwrap_or_default();
    let history_few_shot = history
        .iter()
        .map(|turn| {
            let role = if turn.role == ChatRole::Human { "Q" } else { "A" };
            format!("{role}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("{system_few_shot}{history_few_shot}").trim().to_string()
}

/// Pull quoted phrasings (one per line) out of an expansion answer.
///
/// When no line is quoted, plain lines are used after list markers are
/// stripped. Otherwise unquoted lines (preambles, notes) are ignored.
pub fn parse_alternatives(answer: &str) -> Vec<String> {
    let lines: Vec<(&str, bool)> = answer
        .lines()
        .map(|line| {
            let line = strip_list_marker(line.trim());
            let inner = strip_quotes(line);
            (inner.trim(), inner.len() != line.len())
        })
        .collect();
    let any_quoted = lines.iter().any(|(_, quoted)| *quoted);

    let mut out: Vec<String> = Vec::new();
    for (unquoted, quoted) in lines {
        if any_quoted && !quoted {
            continue;
        }
        if unquoted.is_empty() || out.iter().any(|existing| existing == unquoted) {
            continue;
        }
        out.push(unquoted.to_string());
        if out.len() == MAX_ALTERNATIVES {
            break;
        }
    }
    out
}

/// Drop `1.`, `2、`, `-` style markers. A marker glued to text (`2.4GHz`) is
/// only a marker when a quote follows.
fn strip_list_marker(line: &str) -> &str {
    if let Some(caps) = LIST_MARKER.captures(line) {
        let rest = &line[caps[0].len()..];
        if !caps[1].is_empty() || rest.starts_with(['"', '“', '\'', '「']) {
            return rest;
        }
    }
    line
}

fn strip_quotes(line: &str) -> &str {
    for (open, close) in [('"', '"'), ('“', '”'), ('\'', '\''), ('「', '」')] {
        if let Some(inner) = line
            .strip_prefix(open)
            .and_then(|rest| rest.trim_end_matches([',', '，']).strip_suffix(close))
        {
            return inner;
        }
    }
    line
}

pub struct RewriteDispatcher {
    backend: Arc<dyn CompletionBackend>,
    model: ModelConfig,
    settings: DispatchSettings,
}

impl RewriteDispatcher {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        model: ModelConfig,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            backend,
            model,
            settings,
        }
    }

    pub async fn rewrite(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult<AgentResult> {
        if request.user_input.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        if should_short_circuit(request) {
            tracing::debug!("no context to resolve against, question passed through");
            return Ok(AgentResult::passthrough(request.user_input.clone()));
        }

        let (mode, background) = parse_system_context(request.system_context.as_deref());
        let window = select_window_with_default(
            &request.history,
            request.window_size,
            self.settings.default_history_window,
        );
        let history = fit_to_context(&window, self.model.max_context);
        let histories = render_histories(background, &history);
        let query = request.user_input.replacen(CUSTOMER_QUESTION_PREFIX, "", 1);

        let (system, task) = match mode {
            RewriteMode::Rewrite => (REWRITE_SYSTEM_PROMPT, REWRITE_TASK_PROMPT),
            RewriteMode::Expansion => (EXPANSION_SYSTEM_PROMPT, EXPANSION_TASK_PROMPT),
        };
        let user = replace_variable(task, &[("query", &query), ("histories", &histories)]);

        let completion = CompletionRequest::new(
            &self.model.model,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .temperature(0.0)
        .max_tokens(REWRITE_MAX_TOKENS);
        let response = invoke(self.backend.as_ref(), completion, &self.settings, cancel).await?;

        let answer = response.content_text();
        if answer.is_empty() {
            return Err(AgentError::EmptyResponse);
        }

        let result = match mode {
            RewriteMode::Rewrite => AgentResult::text(answer, response.usage),
            RewriteMode::Expansion => {
                let alternatives = parse_alternatives(answer);
                if alternatives.is_empty() {
                    return Err(AgentError::EmptyResponse);
                }
                AgentResult {
                    output_text: alternatives.join("\n"),
                    usage: response.usage,
                    resolved_label: None,
                    alternatives,
                }
            }
        };

        tracing::info!(
            mode = ?mode,
            model = %self.model.model,
            history_turns = history.len(),
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            "question rewritten"
        );
        Ok(result)
    }
}
