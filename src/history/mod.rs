//! Conversation history: an append-only log of per-user turns.
//!
//! Backends implement [`HistoryStore`]; the pipeline talks to them through
//! [`HistoryLog`], which makes persistence best-effort. Write failures are
//! logged and dropped. Read failures degrade to an empty context.

mod memory;
mod sqlite;
mod supabase;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;
pub use supabase::SupabaseHistoryStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// Modality of the user's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Text,
    Audio,
}

impl TurnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

impl FromStr for TurnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            other => Err(format!("unknown turn kind {other:?}")),
        }
    }
}

/// A turn as submitted for insertion. The store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTurn {
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub kind: TurnKind,
    /// Japanese payload of an assistant turn; the English text is `content`.
    pub translation: Option<String>,
}

impl NewTurn {
    pub fn user(user_id: &str, content: &str, kind: TurnKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            kind,
            translation: None,
        }
    }

    pub fn assistant(user_id: &str, english: &str, japanese: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::Assistant,
            content: english.to_string(),
            kind: TurnKind::Text,
            translation: (!japanese.is_empty()).then(|| japanese.to_string()),
        }
    }
}

/// A persisted, immutable turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub kind: TurnKind,
    #[serde(default)]
    pub translation: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert one turn. Turns are never updated afterwards.
    async fn append(&self, turn: &NewTurn) -> Result<(), StoreError>;

    /// Up to `limit` most recent turns for `user_id`, oldest first.
    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}

/// Best-effort front for a [`HistoryStore`].
#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn HistoryStore>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Persist a turn; failures are logged and swallowed.
    pub async fn record(&self, turn: NewTurn) {
        match self.store.append(&turn).await {
            Ok(()) => debug!("Saved {} turn for {}", turn.role, turn.user_id),
            Err(e) => warn!("Failed to save {} turn for {}: {e}", turn.role, turn.user_id),
        }
    }

    /// Recent context for a user; a failed read yields no context.
    pub async fn context(&self, user_id: &str, limit: usize) -> Vec<ConversationTurn> {
        match self.store.recent(user_id, limit).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Failed to load history for {user_id}, continuing without context: {e}");
                Vec::new()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FailingHistoryStore;
    use super::*;

    #[test]
    fn assistant_turn_embeds_translation() {
        let turn = NewTurn::assistant("U1", "Hello!", "こんにちは！");
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.content, "Hello!");
        assert_eq!(turn.translation.as_deref(), Some("こんにちは！"));

        let bare = NewTurn::assistant("U1", "Hello!", "");
        assert_eq!(bare.translation, None);
    }

    #[test]
    fn role_and_kind_round_trip_through_strings() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!("audio".parse::<TurnKind>().unwrap(), TurnKind::Audio);
        assert!("system".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn failed_read_degrades_to_empty_context() {
        let log = HistoryLog::new(Arc::new(FailingHistoryStore));
        assert!(log.context("U1", 10).await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_swallowed() {
        let log = HistoryLog::new(Arc::new(FailingHistoryStore));
        log.record(NewTurn::user("U1", "hi", TurnKind::Text)).await;
    }
}
