use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::messages::models::StoredMessage;
use crate::messages::repositories::MessageStore;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

#[derive(Default)]
pub struct InMemoryMessageStore {
    chats: Mutex<HashMap<String, HashMap<String, StoredMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> ChatSyncResult<std::sync::MutexGuard<'_, HashMap<String, HashMap<String, StoredMessage>>>>
    {
        self.chats
            .lock()
            .map_err(|_| ChatSyncError::Internal("message store mutex poisoned".to_string()))
    }

    /// Total number of stored messages across all chats.
    pub fn len(&self) -> ChatSyncResult<usize> {
        Ok(self.lock()?.values().map(HashMap::len).sum())
    }

    pub fn is_empty(&self) -> ChatSyncResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn put(&self, message: &StoredMessage) -> ChatSyncResult<()> {
        self.lock()?
            .entry(message.chat_id.clone())
            .or_default()
            .insert(message.message_id.clone(), message.clone());
        tracing::debug!(
            chat_id = %message.chat_id,
            message_id = %message.message_id,
            "stored message"
        );
        Ok(())
    }

    async fn list(&self, chat_id: &str) -> ChatSyncResult<Vec<StoredMessage>> {
        let chats = self.lock()?;
        let mut messages: Vec<StoredMessage> = chats
            .get(chat_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Ok(messages)
    }

    async fn get(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<Option<StoredMessage>> {
        Ok(self
            .lock()?
            .get(chat_id)
            .and_then(|m| m.get(message_id))
            .cloned())
    }

    async fn delete(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<bool> {
        Ok(self
            .lock()?
            .get_mut(chat_id)
            .map(|m| m.remove(message_id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn message(chat_id: &str, message_id: &str, hours: i64) -> StoredMessage {
        StoredMessage {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            text: format!("text {message_id}"),
            created_at: Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap() + Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn same_key_overwrites() {
        let store = InMemoryMessageStore::new();
        store.put(&message("chat_1", "m1", 0)).await.unwrap();
        let mut edited = message("chat_1", "m1", 0);
        edited.text = "edited".to_string();
        store.put(&edited).await.unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let got = store.get("chat_1", "m1").await.unwrap().unwrap();
        assert_eq!(got.text, "edited");
    }

    #[tokio::test]
    async fn list_sorts_by_timestamp_ascending() {
        let store = InMemoryMessageStore::new();
        store.put(&message("chat_1", "b", 3)).await.unwrap();
        store.put(&message("chat_1", "a", 1)).await.unwrap();
        store.put(&message("chat_2", "c", 0)).await.unwrap();

        let ids: Vec<String> = store
            .list("chat_1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_removed() {
        let store = InMemoryMessageStore::new();
        store.put(&message("chat_1", "m1", 0)).await.unwrap();

        assert!(store.delete("chat_1", "m1").await.unwrap());
        assert!(!store.delete("chat_1", "m1").await.unwrap());
        assert!(!store.delete("chat_9", "m1").await.unwrap());
        assert!(store.is_empty().unwrap());
    }
}
