use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::blobs::repositories::{Blob, BlobStore};
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

/// Blobs as files under a root directory. The content type is kept in a
/// sidecar file next to the blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> ChatSyncResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ChatSyncError::Validation(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn sidecar(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(CONTENT_TYPE_SUFFIX);
        PathBuf::from(name)
    }
}

fn storage_err(e: std::io::Error) -> ChatSyncError {
    ChatSyncError::Storage(e.to_string())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> ChatSyncResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        tokio::fs::write(&path, data).await.map_err(storage_err)?;
        tokio::fs::write(Self::sidecar(&path), content_type)
            .await
            .map_err(storage_err)?;

        tracing::debug!(key, path = %path.display(), "blob written");
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> ChatSyncResult<Option<Blob>> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        let content_type = match tokio::fs::read_to_string(Self::sidecar(&path)).await {
            Ok(ct) => ct,
            Err(e) if e.kind() == ErrorKind::NotFound => "application/octet-stream".to_string(),
            Err(e) => return Err(storage_err(e)),
        };
        Ok(Some(Blob { data, content_type }))
    }

    async fn delete(&self, key: &str) -> ChatSyncResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(storage_err(e)),
        }
        match tokio::fs::remove_file(Self::sidecar(&path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(storage_err(e)),
        }
    }
}
