//! Durable chat-log archive.
//!
//! Session memory is process-local and never expires. When a conversation
//! is finished, [`archive_session`] copies it into a [`SessionStore`] under a
//! freshly allocated numeric session id, titles it, and clears the memory.
//!
//! | Store | Backing | Use |
//! |-------|---------|-----|
//! | [`InMemorySessionStore`] | `Mutex<Vec<_>>` | tests, ephemeral servers |
//! | [`SqliteSessionStore`] | `sqlx` SQLite | CLI and server default |

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use health_rag_core::memory::SessionMemory;
use health_rag_core::models::{ChatTurn, Role};
use health_rag_core::{RagError, Result};

use crate::db::{self, store_err};
use crate::migrate;

/// Titles are the first user message cut to this many chars.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTitle {
    pub session_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub session_id: i64,
    pub sender: String,
    pub message: String,
    /// Unix seconds.
    pub created_at: i64,
}

/// Session allocation and chat-log persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Allocate a new numeric session id for `user_id`.
    async fn get_new_session_id(&self, user_id: &str) -> Result<i64>;
    async fn create_chat_title(&self, session_id: i64, user_id: &str, title: &str) -> Result<()>;
    async fn insert_chat_log(&self, session_id: i64, user_id: &str, sender: Role, message: &str) -> Result<()>;
    /// Titled sessions for `user_id`, newest first.
    async fn get_chat_titles(&self, user_id: &str) -> Result<Vec<ChatTitle>>;
    /// Every log entry of one session, in insertion order.
    async fn get_session_chat(&self, user_id: &str, session_id: i64) -> Result<Vec<ChatLogEntry>>;

    /// Allocate a session, write every turn, then title it.
    ///
    /// Listings only show titled sessions, so a failure part way through
    /// leaves nothing visible in [`get_chat_titles`](Self::get_chat_titles).
    async fn archive(&self, user_id: &str, title: &str, turns: &[ChatTurn]) -> Result<i64> {
        let session_id = self.get_new_session_id(user_id).await?;
        for turn in turns {
            self.insert_chat_log(session_id, user_id, turn.role, &turn.content).await?;
        }
        self.create_chat_title(session_id, user_id, title).await?;
        Ok(session_id)
    }
}

// ============ In-memory ============

#[derive(Default)]
struct StoreState {
    sessions: Vec<(i64, String, Option<String>)>,
    logs: Vec<(String, ChatLogEntry)>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    state: Mutex<StoreState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_new_session_id(&self, user_id: &str) -> Result<i64> {
        let mut state = self.state();
        let id = state.sessions.len() as i64 + 1;
        state.sessions.push((id, user_id.to_string(), None));
        Ok(id)
    }

    async fn create_chat_title(&self, session_id: i64, user_id: &str, title: &str) -> Result<()> {
        let mut state = self.state();
        let session = state
            .sessions
            .iter_mut()
            .find(|(id, owner, _)| *id == session_id && owner == user_id)
            .ok_or_else(|| RagError::Store(format!("session {} not allocated for user {}", session_id, user_id)))?;
        session.2 = Some(title.to_string());
        Ok(())
    }

    async fn insert_chat_log(&self, session_id: i64, user_id: &str, sender: Role, message: &str) -> Result<()> {
        self.state().logs.push((
            user_id.to_string(),
            ChatLogEntry {
                session_id,
                sender: sender.as_str().to_string(),
                message: message.to_string(),
                created_at: Utc::now().timestamp(),
            },
        ));
        Ok(())
    }

    async fn get_chat_titles(&self, user_id: &str) -> Result<Vec<ChatTitle>> {
        let state = self.state();
        Ok(state
            .sessions
            .iter()
            .rev()
            .filter(|(_, owner, _)| owner == user_id)
            .filter_map(|(id, _, title)| {
                title.as_ref().map(|t| ChatTitle {
                    session_id: *id,
                    title: t.clone(),
                })
            })
            .collect())
    }

    async fn get_session_chat(&self, user_id: &str, session_id: i64) -> Result<Vec<ChatLogEntry>> {
        let state = self.state();
        Ok(state
            .logs
            .iter()
            .filter(|(owner, entry)| owner == user_id && entry.session_id == session_id)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

// ============ SQLite ============

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_new_session_id(&self, user_id: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO chat_sessions (user_id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn create_chat_title(&self, session_id: i64, user_id: &str, title: &str) -> Result<()> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ? WHERE session_id = ? AND user_id = ?")
            .bind(title)
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(RagError::Store(format!(
                "session {} not allocated for user {}",
                session_id, user_id
            )));
        }
        Ok(())
    }

    async fn insert_chat_log(&self, session_id: i64, user_id: &str, sender: Role, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_logs (session_id, user_id, sender, message, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(sender.as_str())
        .bind(message)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_chat_titles(&self, user_id: &str) -> Result<Vec<ChatTitle>> {
        let rows = sqlx::query(
            "SELECT session_id, title FROM chat_sessions \
             WHERE user_id = ? AND title IS NOT NULL ORDER BY session_id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|row| ChatTitle {
                session_id: row.get("session_id"),
                title: row.get("title"),
            })
            .collect())
    }

    async fn get_session_chat(&self, user_id: &str, session_id: i64) -> Result<Vec<ChatLogEntry>> {
        let rows = sqlx::query(
            "SELECT session_id, sender, message, created_at FROM chat_logs \
             WHERE user_id = ? AND session_id = ? ORDER BY id",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|row| ChatLogEntry {
                session_id: row.get("session_id"),
                sender: row.get("sender"),
                message: row.get("message"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn archive(&self, user_id: &str, title: &str, turns: &[ChatTurn]) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now().timestamp();

        let session_id = sqlx::query("INSERT INTO chat_sessions (user_id, title, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(title)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .last_insert_rowid();

        for turn in turns {
            sqlx::query(
                "INSERT INTO chat_logs (session_id, user_id, sender, message, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(user_id)
            .bind(turn.role.as_str())
            .bind(turn.content.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(session_id)
    }
}

/// First user message, cut to [`TITLE_MAX_CHARS`] chars.
pub fn chat_title(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .find(|t| t.role == Role::User)
        .map(|t| t.content.trim().chars().take(TITLE_MAX_CHARS).collect())
        .unwrap_or_default()
}

/// Copy the session `memory_key` into `store` for `user_id`, then clear it.
///
/// Returns the allocated session id, or `None` when there was nothing to
/// archive. Memory is reset only after the store has committed the whole
/// conversation, so a failed archive can simply be retried.
pub async fn archive_session(
    store: &dyn SessionStore,
    memory: &SessionMemory,
    user_id: &str,
    memory_key: &str,
) -> Result<Option<i64>> {
    let turns = memory.to_prompt_history(memory_key);
    if turns.is_empty() {
        return Ok(None);
    }

    let session_id = store.archive(user_id, &chat_title(&turns), &turns).await?;
    memory.reset(memory_key);

    info!(user_id, memory_key, session_id, turns = turns.len(), "archived session");
    Ok(Some(session_id))
}
