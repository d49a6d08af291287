use async_trait::async_trait;

use crate::messages::models::StoredMessage;
use chatsync_common::error::ChatSyncResult;

/// Per-chat message log. Writes are idempotent by key and are not
/// transactional with the relational index.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or overwrite the message with the same `(chat_id, message_id)`.
    async fn put(&self, message: &StoredMessage) -> ChatSyncResult<()>;

    /// All messages of a chat, oldest first.
    async fn list(&self, chat_id: &str) -> ChatSyncResult<Vec<StoredMessage>>;

    async fn get(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<Option<StoredMessage>>;

    /// Returns `true` if a message was removed.
    async fn delete(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<bool>;
}
