use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde_json::Value;
use services::{ChatStore, NewChatItem, SaveChat};
use shared::chat::{AgentRequest, ChatRole, ClassificationCandidate, ConversationTurn, WindowSize};
use shared::settings::AgentSettings;
use std::path::{Path, PathBuf};

pub const DEFAULT_APP_ID: &str = "default";

/// Which stored chat a command works on, and how much of it to send.
#[derive(Args, Debug, Clone)]
pub struct Conversation {
    #[arg(long, default_value = DEFAULT_APP_ID)]
    pub app_id: String,
    #[arg(long)]
    pub chat_id: Option<String>,
    /// Model selector (model id or display name)
    #[arg(short, long, default_value = "")]
    pub model: String,
    /// Number of recent turns to send; `full` sends everything loaded
    #[arg(short, long, value_parser = parse_window)]
    pub window: Option<WindowSize>,
}

impl Conversation {
    pub fn history(&self, store: &ChatStore, settings: &AgentSettings) -> Result<Vec<ConversationTurn>> {
        match self.chat_id.as_deref() {
            Some(chat_id) => store.history(&self.app_id, chat_id, settings.history_read_limit),
            None => Ok(Vec::new()),
        }
    }

    pub fn request(
        &self,
        store: &ChatStore,
        settings: &AgentSettings,
        question: String,
    ) -> Result<AgentRequest> {
        let mut request =
            AgentRequest::new(question, &self.model).with_history(self.history(store, settings)?);
        request.window_size = self.window;
        Ok(request)
    }

    /// Store a question and its answer. Without a chat id nothing is written.
    pub fn record(&self, store: &ChatStore, human: &str, ai: &str) -> Result<()> {
        let Some(chat_id) = self.chat_id.clone() else {
            tracing::warn!("--record needs --chat-id, skipping");
            return Ok(());
        };
        store.save_chat(&SaveChat {
            app_id: self.app_id.clone(),
            chat_id,
            session_user_id: None,
            content: vec![
                NewChatItem::new(ChatRole::Human, human),
                NewChatItem::new(ChatRole::Ai, ai),
            ],
        })?;
        Ok(())
    }
}

pub fn parse_window(raw: &str) -> Result<WindowSize, String> {
    if raw.eq_ignore_ascii_case("full") {
        return Ok(WindowSize::Full);
    }
    raw.parse::<usize>()
        .map(WindowSize::Turns)
        .map_err(|_| format!("expected a turn count or `full`, got `{raw}`"))
}

/// `key=label`; a bare `key` uses the key as its label.
pub fn parse_candidate(raw: &str) -> Result<ClassificationCandidate> {
    let (key, label) = raw.split_once('=').unwrap_or((raw, raw));
    let key = key.trim();
    if key.is_empty() {
        bail!("candidate `{raw}` has an empty key");
    }
    Ok(ClassificationCandidate::new(key, label.trim()))
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "Chat Assist", "ChatAssist")
}

/// Explicit path, else `settings.json` in the config dir, else defaults.
pub fn load_settings(path: Option<&Path>) -> Result<AgentSettings> {
    if let Some(path) = path {
        return AgentSettings::load(path);
    }
    match project_dirs().map(|p| p.config_dir().join("settings.json")) {
        Some(path) if path.exists() => AgentSettings::load(&path),
        _ => {
            tracing::debug!("no settings file, using defaults");
            Ok(AgentSettings::default())
        }
    }
}

pub fn data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine a data directory, pass --data-dir"))
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let value: Value = serde_json::to_value(value).context("serialising output")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn conversation(chat_id: Option<&str>) -> Conversation {
        Conversation {
            app_id: DEFAULT_APP_ID.into(),
            chat_id: chat_id.map(String::from),
            model: "gpt-4o-mini".into(),
            window: Some(WindowSize::Turns(2)),
        }
    }

    #[test]
    fn test_parse_candidate() {
        let c = parse_candidate("antenna=天线产品咨询").unwrap();
        assert_eq!(c.key, "antenna");
        assert_eq!(c.label, "天线产品咨询");

        let bare = parse_candidate("other").unwrap();
        assert_eq!(bare.label, "other");

        assert!(parse_candidate("=label").is_err());
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("full").unwrap(), WindowSize::Full);
        assert_eq!(parse_window("4").unwrap(), WindowSize::Turns(4));
        assert!(parse_window("many").is_err());
    }

    #[test]
    fn test_record_then_request_loads_history() {
        let dir = TempDir::new().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        let settings = AgentSettings::default();
        let conv = conversation(Some("c1"));

        conv.record(&store, "介质天线有吗", "有的").unwrap();
        let request = conv.request(&store, &settings, "这个呢".into()).unwrap();
        assert_eq!(request.user_input, "这个呢");
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[0].role, ChatRole::Human);
        assert_eq!(request.window_size, Some(WindowSize::Turns(2)));
    }

    #[test]
    fn test_without_chat_id_nothing_is_stored() {
        let store = ChatStore::open_in_memory().unwrap();
        let conv = conversation(None);
        conv.record(&store, "q", "a").unwrap();
        assert!(conv
            .history(&store, &AgentSettings::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_explicit_settings_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"models":[{"model":"qwen-plus","tool_choice":false}]}"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.models[0].model, "qwen-plus");
        assert!(load_settings(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = data_dir(Some(PathBuf::from("/tmp/chat"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/chat"));
    }
}
