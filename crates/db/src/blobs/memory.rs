use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::blobs::repositories::{Blob, BlobStore};
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Blob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ChatSyncResult<std::sync::MutexGuard<'_, HashMap<String, Blob>>> {
        self.blobs
            .lock()
            .map_err(|_| ChatSyncError::Internal("blob store mutex poisoned".to_string()))
    }

    pub fn keys(&self) -> ChatSyncResult<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> ChatSyncResult<String> {
        self.lock()?.insert(
            key.to_string(),
            Blob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> ChatSyncResult<Option<Blob>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> ChatSyncResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }
}
