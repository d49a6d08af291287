use async_trait::async_trait;
use chatsync_common::error::ChatSyncResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, overwriting any previous blob. Returns the key.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> ChatSyncResult<String>;

    async fn get(&self, key: &str) -> ChatSyncResult<Option<Blob>>;

    /// Returns whether a blob was removed.
    async fn delete(&self, key: &str) -> ChatSyncResult<bool>;
}
