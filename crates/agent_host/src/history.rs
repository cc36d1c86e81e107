//! History windowing: picks the recent turns a dispatcher gets to see.

use shared::chat::{ConversationTurn, WindowSize};

/// Window used when a request does not ask for one.
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Most recent turns of `history`, oldest first.
///
/// `None` applies [`DEFAULT_HISTORY_WINDOW`].
pub fn select_window(
    history: &[ConversationTurn],
    window: Option<WindowSize>,
) -> Vec<ConversationTurn> {
    select_window_with_default(history, window, DEFAULT_HISTORY_WINDOW)
}

/// Same as [`select_window`] with a configured default.
pub fn select_window_with_default(
    history: &[ConversationTurn],
    window: Option<WindowSize>,
    default_window: usize,
) -> Vec<ConversationTurn> {
    match window.unwrap_or(WindowSize::Turns(default_window)) {
        WindowSize::Full => history.to_vec(),
        WindowSize::Turns(n) => {
            let start = history.len().saturating_sub(n);
            history[start..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::chat::ChatRole;

    fn history(len: usize) -> Vec<ConversationTurn> {
        (0..len)
            .map(|i| {
                let role = if i % 2 == 0 { ChatRole::Human } else { ChatRole::Ai };
                ConversationTurn::new(role, format!("turn {i}"), i.to_string())
            })
            .collect()
    }

    #[test]
    fn test_window_returns_min_of_n_and_len_most_recent_in_order() {
        for len in 0..9 {
            let h = history(len);
            for n in 0..11 {
                let window = select_window(&h, Some(WindowSize::Turns(n)));
                assert_eq!(window.len(), n.min(len));
                assert_eq!(window.as_slice(), &h[len - window.len()..]);
            }
        }
    }

    #[test]
    fn test_default_window_is_six() {
        let h = history(10);
        let window = select_window(&h, None);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0].sequence_id, "4");
        assert_eq!(window[5].sequence_id, "9");
    }

    #[test]
    fn test_full_window_keeps_everything() {
        let h = history(40);
        assert_eq!(select_window(&h, Some(WindowSize::Full)), h);
    }

    #[test]
    fn test_configured_default() {
        let h = history(10);
        assert_eq!(select_window_with_default(&h, None, 2).len(), 2);
        assert!(select_window(&h, Some(WindowSize::Turns(0))).is_empty());
    }
}
