use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use uuid::Uuid;

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use chatsync_db::blobs::repositories::BlobStore;
use chatsync_db::blobs::{avatar_key, AVATAR_CONTENT_TYPE};
use chatsync_db::deals::repositories::CustomerRepository;

#[derive(Debug, Clone)]
pub struct AvatarJob {
    pub customer_id: Uuid,
    pub customer_external_id: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone)]
pub struct AvatarRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for AvatarRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

struct Worker {
    http: Client,
    blobs: Arc<dyn BlobStore>,
    customers: Arc<dyn CustomerRepository>,
    retry: AvatarRetry,
}

impl Worker {
    async fn upload(&self, job: &AvatarJob) -> ChatSyncResult<String> {
        let response = self
            .http
            .get(&job.avatar_url)
            .send()
            .await
            .map_err(|e| ChatSyncError::Storage(format!("avatar download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatSyncError::Storage(format!(
                "avatar download returned {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatSyncError::Storage(format!("avatar download failed: {e}")))?;

        let key = self
            .blobs
            .upload(
                &avatar_key(&job.customer_external_id),
                bytes.to_vec(),
                AVATAR_CONTENT_TYPE,
            )
            .await?;
        self.customers.set_avatar_key(job.customer_id, &key).await?;
        Ok(key)
    }

    async fn upload_with_retry(&self, job: AvatarJob) {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.upload(&job).await {
                Ok(key) => {
                    tracing::debug!(customer = %job.customer_external_id, key, "avatar stored");
                    return;
                }
                Err(e) if attempt < attempts => {
                    let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        customer = %job.customer_external_id,
                        attempt,
                        error = %e,
                        "avatar upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        customer = %job.customer_external_id,
                        attempts,
                        error = %e,
                        "giving up on avatar upload"
                    );
                }
            }
        }
    }
}

/// Copies customer avatars into the blob store off the sync path.
///
/// Each job runs on its own task; the caller never waits for it and its
/// outcome never touches deal status. `drain` lets a process wait for the
/// outstanding jobs before exiting.
pub struct AvatarUploader {
    worker: Arc<Worker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AvatarUploader {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        customers: Arc<dyn CustomerRepository>,
        retry: AvatarRetry,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            worker: Arc::new(Worker {
                http,
                blobs,
                customers,
                retry,
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn enqueue(&self, job: AvatarJob) {
        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(async move { worker.upload_with_retry(job).await });
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.retain(|t| !t.is_finished());
                tasks.push(handle);
            }
            Err(_) => tracing::warn!("avatar task list poisoned, upload left untracked"),
        }
    }

    /// Wait for every queued upload. Returns how many were awaited.
    pub async fn drain(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return 0,
        };
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "avatar task panicked");
            }
        }
        count
    }
}
