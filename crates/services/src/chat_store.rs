//! Chat history store backed by SQLite.
//!
//! Items are never physically removed: deleting one sets `del_flag = 1`, and
//! history reads only return items whose flag is 0.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use shared::chat::{ChatItem, ChatRole, ChatSummary, ConversationTurn};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Session user recorded when the caller does not supply one
pub const DEFAULT_SESSION_USER: &str = "root";

const DATA_ID_LEN: usize = 22;
const TITLE_CHARS: usize = 20;

static QUOTE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("block pattern is valid"));

/// A turn to persist; `data_id` is generated when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatItem {
    pub data_id: Option<String>,
    pub role: ChatRole,
    pub value: String,
}

impl NewChatItem {
    pub fn new(role: ChatRole, value: impl Into<String>) -> Self {
        Self {
            data_id: None,
            role,
            value: value.into(),
        }
    }
}

/// One user/AI exchange to store after dispatch completes.
#[derive(Debug, Clone)]
pub struct SaveChat {
    pub app_id: String,
    pub chat_id: String,
    pub session_user_id: Option<String>,
    pub content: Vec<NewChatItem>,
}

pub fn generate_data_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DATA_ID_LEN)
        .map(char::from)
        .collect()
}

/// Title from the first item, else the second, else `"Chat"`.
pub fn chat_title(content: &[NewChatItem]) -> String {
    let first = content
        .first()
        .map(|item| QUOTE_BLOCK.replace_all(&item.value, "").trim().to_string())
        .unwrap_or_default();
    let source = if !first.is_empty() {
        first
    } else {
        content
            .get(1)
            .map(|item| item.value.trim().to_string())
            .unwrap_or_default()
    };
    if source.is_empty() {
        "Chat".to_string()
    } else {
        source.chars().take(TITLE_CHARS).collect()
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ChatItem> {
    let role: String = row.get(4)?;
    let role = ChatRole::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown chat role {role}"),
            )),
        )
    })?;
    let feedbacks: String = row.get(8)?;
    Ok(ChatItem {
        data_id: row.get(0)?,
        app_id: row.get(1)?,
        chat_id: row.get(2)?,
        session_user_id: row.get(3)?,
        role,
        value: row.get(5)?,
        time: millis_to_utc(row.get(6)?),
        del_flag: row.get(7)?,
        custom_feedbacks: serde_json::from_str(&feedbacks).unwrap_or_default(),
    })
}

pub struct ChatStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl ChatStore {
    /// Open (or create) `chat_history.db` under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("chat_history.db");
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;

        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chats (
                app_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                session_user_id TEXT NOT NULL DEFAULT 'root',
                title TEXT NOT NULL,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (app_id, chat_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data_id TEXT UNIQUE NOT NULL,
                app_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                session_user_id TEXT NOT NULL DEFAULT 'root',
                role TEXT NOT NULL,
                value TEXT NOT NULL DEFAULT '',
                time INTEGER NOT NULL,
                del_flag INTEGER NOT NULL DEFAULT 0,
                custom_feedbacks TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_items_chat
             ON chat_items(app_id, chat_id, data_id)",
            [],
        )?;

        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Newest `limit` active items of a chat, oldest first.
    pub fn get_chat_items(
        &self,
        app_id: &str,
        chat_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatItem>> {
        let Some(chat_id) = chat_id.filter(|c| !c.is_empty()) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data_id, app_id, chat_id, session_user_id, role, value, time, del_flag, custom_feedbacks
             FROM chat_items
             WHERE app_id = ?1 AND chat_id = ?2 AND del_flag = 0
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let mut items = stmt
            .query_map(params![app_id, chat_id, limit as i64], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        items.reverse();
        Ok(items)
    }

    /// Active history as dispatcher turns.
    pub fn history(&self, app_id: &str, chat_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .get_chat_items(app_id, Some(chat_id), limit)?
            .iter()
            .map(ChatItem::to_turn)
            .collect())
    }

    /// Insert the non-empty items of an exchange and refresh the chat header.
    ///
    /// Returns the data ids written.
    pub fn save_chat(&self, chat: &SaveChat) -> Result<Vec<String>> {
        let valid: Vec<&NewChatItem> = chat
            .content
            .iter()
            .filter(|item| !item.value.is_empty())
            .collect();
        if valid.is_empty() {
            bail!("No valid content to save");
        }

        let session_user = chat
            .session_user_id
            .as_deref()
            .unwrap_or(DEFAULT_SESSION_USER);
        let title = chat_title(&chat.content);
        let now = Utc::now().timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(valid.len());
        for item in valid {
            let data_id = item.data_id.clone().unwrap_or_else(generate_data_id);
            tx.execute(
                "INSERT INTO chat_items (data_id, app_id, chat_id, session_user_id, role, value, time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    data_id,
                    chat.app_id,
                    chat.chat_id,
                    session_user,
                    item.role.as_str(),
                    item.value,
                    now
                ],
            )?;
            ids.push(data_id);
        }
        tx.execute(
            "INSERT INTO chats (app_id, chat_id, session_user_id, title, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(app_id, chat_id) DO UPDATE SET title = excluded.title, update_time = excluded.update_time",
            params![chat.app_id, chat.chat_id, session_user, title, now],
        )?;
        tx.commit()?;

        tracing::debug!(chat_id = %chat.chat_id, items = ids.len(), "chat saved");
        Ok(ids)
    }

    /// Soft-delete one item. Missing ids are a no-op.
    pub fn delete_chat_item(&self, app_id: &str, chat_id: &str, data_id: &str) -> Result<bool> {
        if chat_id.is_empty() || data_id.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE chat_items SET del_flag = 1
             WHERE app_id = ?1 AND chat_id = ?2 AND data_id = ?3",
            params![app_id, chat_id, data_id],
        )?;
        Ok(updated > 0)
    }

    /// Append custom feedback labels to an item.
    pub fn add_custom_feedbacks(
        &self,
        chat_id: &str,
        data_id: &str,
        feedbacks: &[String],
    ) -> Result<()> {
        if chat_id.is_empty() || data_id.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT custom_feedbacks FROM chat_items WHERE chat_id = ?1 AND data_id = ?2",
                params![chat_id, data_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(existing) = existing else {
            tracing::warn!(chat_id, data_id, "feedback target not found");
            return Ok(());
        };

        let mut all: Vec<String> = serde_json::from_str(&existing).unwrap_or_default();
        all.extend(feedbacks.iter().cloned());
        tx.execute(
            "UPDATE chat_items SET custom_feedbacks = ?1 WHERE chat_id = ?2 AND data_id = ?3",
            params![serde_json::to_string(&all)?, chat_id, data_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn chat_summary(&self, app_id: &str, chat_id: &str) -> Result<Option<ChatSummary>> {
        let conn = self.conn.lock();
        let summary = conn
            .query_row(
                "SELECT chat_id, app_id, title, update_time FROM chats WHERE app_id = ?1 AND chat_id = ?2",
                params![app_id, chat_id],
                |row| {
                    Ok(ChatSummary {
                        chat_id: row.get(0)?,
                        app_id: row.get(1)?,
                        title: row.get(2)?,
                        update_time: millis_to_utc(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }
}
