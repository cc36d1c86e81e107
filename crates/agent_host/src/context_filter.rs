//! Context token filter
//!
//! Trims a turn list so it fits a model's context budget.
//!
//! Strategy:
//! - Estimate each turn's cost from its byte length (≈ 4 bytes per token) plus a
//!   fixed per-message overhead
//! - Leading `System` turns are pinned; their cost comes off the budget first
//! - Keep the longest suffix of the remaining turns that fits
//! - The most recent turn is always kept, even when it alone is over budget

use shared::chat::{ChatRole, ConversationTurn};

/// Role and framing tokens every message costs on top of its text
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate tokens for text (rough approximation: 4 bytes ≈ 1 token)
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn turn_tokens(turn: &ConversationTurn) -> usize {
    estimate_tokens(&turn.text) + MESSAGE_OVERHEAD_TOKENS
}

pub fn total_tokens(turns: &[ConversationTurn]) -> usize {
    turns.iter().map(turn_tokens).sum()
}

/// Drop turns from the oldest end until the estimate fits `max_tokens`.
pub fn fit_to_context(turns: &[ConversationTurn], max_tokens: usize) -> Vec<ConversationTurn> {
    let pinned = turns
        .iter()
        .take_while(|t| t.role == ChatRole::System)
        .count();
    let (system, rest) = turns.split_at(pinned);
    if rest.is_empty() {
        return turns.to_vec();
    }

    let budget = max_tokens.saturating_sub(total_tokens(system));
    let last = rest.len() - 1;
    let mut used = turn_tokens(&rest[last]);
    let mut start = last;

    for idx in (0..last).rev() {
        let cost = turn_tokens(&rest[idx]);
        if used + cost > budget {
            break;
        }
        used += cost;
        start = idx;
    }

    if start > 0 {
        tracing::debug!(
            dropped = start,
            kept = rest.len() - start,
            budget,
            "trimmed history to fit context"
        );
    }

    system.iter().chain(&rest[start..]).cloned().collect()
}
