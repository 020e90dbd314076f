//! PostgREST history backend for a managed Supabase table.
//!
//! Expected schema (created outside this service):
//!
//! ```sql
//! create table emma_turns (
//!     id          bigserial primary key,
//!     user_id     text not null,
//!     role        text not null,
//!     content     text not null,
//!     kind        text not null,
//!     translation text,
//!     created_at  timestamptz not null default now()
//! );
//! ```

use async_trait::async_trait;

use super::{ConversationTurn, HistoryStore, NewTurn};
use crate::error::{check_status, StoreError, UpstreamError};
use crate::supabase::SupabaseClient;

const SERVICE: &str = "supabase-rest";

pub struct SupabaseHistoryStore {
    client: SupabaseClient,
    table: String,
}

impl SupabaseHistoryStore {
    pub fn new(client: SupabaseClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    fn path(&self) -> String {
        format!("rest/v1/{}", self.table)
    }
}

#[async_trait]
impl HistoryStore for SupabaseHistoryStore {
    async fn append(&self, turn: &NewTurn) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(&self.path())
            .header("Prefer", "return=minimal")
            .json(turn)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        check_status(SERVICE, resp).await?;
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let resp = self
            .client
            .get(&self.path())
            .query(&[
                ("select", "user_id,role,content,kind,translation,created_at".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc,id.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;

        let mut turns: Vec<ConversationTurn> = check_status(SERVICE, resp)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::invalid(SERVICE, e.to_string()))?;
        turns.reverse();
        Ok(turns)
    }
}
