//! SQLite history backend.
//!
//! One table per persona. Rows are ordered by their autoincrement id, which
//! is the insertion order; `created_at` is informational.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection};
use tracing::info;

use super::{ConversationTurn, HistoryStore, NewTurn, Role, TurnKind};
use crate::error::StoreError;

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

impl ToSql for TurnKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TurnKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteHistoryStore {
    /// Open (or create) the database file and the persona's table.
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        validate_table(table)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened history database {} (table {table})", path.display());
        Self::with_connection(conn, table)
    }

    #[cfg(test)]
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        validate_table(table)?;
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                kind        TEXT NOT NULL,
                translation TEXT,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_user_idx ON {table} (user_id, id);"
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, turn: &NewTurn) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let sql = format!(
            "INSERT INTO {} (user_id, role, content, kind, translation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.table
        );
        let turn = turn.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                &sql,
                params![
                    turn.user_id,
                    turn.role,
                    turn.content,
                    turn.kind,
                    turn.translation,
                    Utc::now()
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let conn = self.conn.clone();
        let sql = format!(
            "SELECT user_id, role, content, kind, translation, created_at
             FROM {} WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            self.table
        );
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || -> Result<Vec<ConversationTurn>, StoreError> {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id, limit], |row| {
                Ok(ConversationTurn {
                    user_id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    kind: row.get(3)?,
                    translation: row.get(4)?,
                    created_at: row.get::<_, DateTime<Utc>>(5)?,
                })
            })?;
            let mut turns = rows.collect::<Result<Vec<_>, _>>()?;
            // Newest-first from the query; callers want oldest-first.
            turns.reverse();
            Ok(turns)
        })
        .await?
    }
}
