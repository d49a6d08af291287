use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::messages::models::StoredMessage;
use crate::messages::repositories::MessageStore;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> StoredMessage {
        StoredMessage {
            chat_id: row.get("chat_id"),
            message_id: row.get("message_id"),
            text: row.get("text"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn put(&self, message: &StoredMessage) -> ChatSyncResult<()> {
        sqlx::query(
            "insert into chat_messages (chat_id, message_id, text, created_at)
             values ($1, $2, $3, $4)
             on conflict (chat_id, message_id) do update set
               text = excluded.text,
               created_at = excluded.created_at,
               stored_at = now()",
        )
        .bind(&message.chat_id)
        .bind(&message.message_id)
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, chat_id: &str) -> ChatSyncResult<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "select chat_id, message_id, text, created_at from chat_messages
             where chat_id = $1
             order by created_at asc, message_id asc",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Self::map_row).collect())
    }

    async fn get(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<Option<StoredMessage>> {
        let row = sqlx::query(
            "select chat_id, message_id, text, created_at from chat_messages
             where chat_id = $1 and message_id = $2",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Storage(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }

    async fn delete(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<bool> {
        let result = sqlx::query("delete from chat_messages where chat_id = $1 and message_id = $2")
            .bind(chat_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ChatSyncError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
