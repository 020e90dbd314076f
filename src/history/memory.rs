use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{ConversationTurn, HistoryStore, NewTurn};
use crate::error::StoreError;

/// Process-local history, lost on restart. Used for development and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    turns: Mutex<HashMap<String, Vec<ConversationTurn>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored turn for a user, oldest first.
    #[cfg(test)]
    pub fn all(&self, user_id: &str) -> Vec<ConversationTurn> {
        let turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.get(user_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, turn: &NewTurn) -> Result<(), StoreError> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let log = turns.entry(turn.user_id.clone()).or_default();

        // Keep timestamps non-decreasing even if the wall clock steps back.
        let now = Utc::now();
        let created_at = match log.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        log.push(ConversationTurn {
            user_id: turn.user_id.clone(),
            role: turn.role,
            content: turn.content.clone(),
            kind: turn.kind,
            translation: turn.translation.clone(),
            created_at,
        });
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let Some(log) = turns.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}
