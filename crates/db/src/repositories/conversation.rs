use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use sokoni_core::domain::conversation::{ConversationState, MessageRole, ThreadKey};
use sokoni_core::stores::{CheckpointStore, StoreError};

use super::{decode_error, unavailable};
use crate::DbPool;

/// Conversation checkpoints persisted as a JSON snapshot per thread.
///
/// Saves are optimistic: the row's `turn_index` column is the fencing
/// token, so two overlapping turns for one thread cannot silently
/// overwrite each other's context merges.
pub struct SqlCheckpointRepository {
    pool: DbPool,
}

impl SqlCheckpointRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conversation_id(&self, thread: &ThreadKey) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM conversations WHERE tenant_id = ?1 AND channel_address = ?2",
        )
        .bind(thread.tenant_id.0.to_string())
        .bind(&thread.channel_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.map(|row| row.get::<String, _>("id")))
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointRepository {
    async fn load(&self, thread: &ThreadKey) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query(
            "SELECT state FROM conversations WHERE tenant_id = ?1 AND channel_address = ?2",
        )
        .bind(thread.tenant_id.0.to_string())
        .bind(&thread.channel_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.get("state");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|error| decode_error(format!("conversation state: {error}")))
    }

    async fn save(
        &self,
        thread: &ThreadKey,
        state: &ConversationState,
        expected_turn: u32,
    ) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(state)
            .map_err(|error| decode_error(format!("conversation state: {error}")))?;
        let step = serde_json::to_value(state.current_step)
            .ok()
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| "greeting".to_string());
        let mode = serde_json::to_value(state.mode)
            .ok()
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| "chatting".to_string());

        if expected_turn == 0 {
            let inserted = sqlx::query(
                "INSERT INTO conversations \
                     (id, tenant_id, customer_id, channel_address, turn_index, current_step, mode, state) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(tenant_id, channel_address) DO NOTHING",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(thread.tenant_id.0.to_string())
            .bind(state.customer_id.0.to_string())
            .bind(&thread.channel_address)
            .bind(state.turn_index as i64)
            .bind(&step)
            .bind(&mode)
            .bind(&snapshot)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

            if inserted.rows_affected() == 1 {
                return Ok(());
            }
        }

        let updated = sqlx::query(
            "UPDATE conversations \
             SET state = ?1, turn_index = ?2, current_step = ?3, mode = ?4, \
                 updated_at = datetime('now') \
             WHERE tenant_id = ?5 AND channel_address = ?6 AND turn_index = ?7",
        )
        .bind(&snapshot)
        .bind(state.turn_index as i64)
        .bind(&step)
        .bind(&mode)
        .bind(thread.tenant_id.0.to_string())
        .bind(&thread.channel_address)
        .bind(expected_turn as i64)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let found = sqlx::query(
            "SELECT turn_index FROM conversations WHERE tenant_id = ?1 AND channel_address = ?2",
        )
        .bind(thread.tenant_id.0.to_string())
        .bind(&thread.channel_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(|row| row.get::<i64, _>("turn_index") as u32)
        .unwrap_or(0);

        Err(StoreError::CheckpointConflict { expected: expected_turn, found })
    }

    async fn append_message(
        &self,
        thread: &ThreadKey,
        role: MessageRole,
        text: &str,
        media_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let Some(conversation_id) = self.conversation_id(thread).await? else {
            return Err(StoreError::NotFound(format!(
                "conversation for thread {}",
                thread.channel_address
            )));
        };

        let role = match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, media_url) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(role)
        .bind(text)
        .bind(media_url)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }
}
