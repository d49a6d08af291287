use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sync::models::SyncRun;
use chatsync_common::error::ChatSyncResult;

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    /// Any run in {pending, running}. At most one exists.
    async fn find_incomplete(&self) -> ChatSyncResult<Option<SyncRun>>;

    /// Create a pending run. Fails with `Validation` if an incomplete run exists.
    async fn create(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<SyncRun>;

    async fn get(&self, run_id: &str) -> ChatSyncResult<Option<SyncRun>>;

    async fn mark_running(&self, run_id: &str) -> ChatSyncResult<SyncRun>;

    async fn save_cursor(&self, run_id: &str, cursor: &str) -> ChatSyncResult<()>;

    async fn increment_processed(&self, run_id: &str) -> ChatSyncResult<()>;

    /// Mark completed and clear any error left by a previous failed attempt.
    async fn mark_completed(&self, run_id: &str) -> ChatSyncResult<SyncRun>;

    async fn mark_failed(&self, run_id: &str, error_message: &str) -> ChatSyncResult<SyncRun>;

    /// Most recently started runs first.
    async fn list_recent(&self, limit: i64) -> ChatSyncResult<Vec<SyncRun>>;
}
