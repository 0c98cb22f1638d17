use sqlx::SqlitePool;
use tracing::debug;

use health_rag_core::Result;

use crate::db::store_err;

/// Create the archive tables if they do not exist. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per archived conversation; the rowid is the session id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            sender TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(session_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id)")
        .execute(pool)
        .await
        .map_err(store_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_logs_session ON chat_logs(session_id, id)")
        .execute(pool)
        .await
        .map_err(store_err)?;

    debug!("session archive migrations applied");
    Ok(())
}
