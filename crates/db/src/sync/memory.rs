use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::models::{RunStatus, SyncRun};
use crate::sync::repositories::SyncRunRepository;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

#[derive(Default)]
pub struct InMemorySyncRunRepository {
    runs: Mutex<Vec<SyncRun>>,
}

impl InMemorySyncRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run as-is, e.g. to simulate state left behind by a crash.
    pub fn seed(&self, run: SyncRun) -> ChatSyncResult<()> {
        self.lock()?.push(run);
        Ok(())
    }

    fn lock(&self) -> ChatSyncResult<std::sync::MutexGuard<'_, Vec<SyncRun>>> {
        self.runs
            .lock()
            .map_err(|_| ChatSyncError::Internal("sync run store mutex poisoned".to_string()))
    }

    fn update<F>(&self, run_id: &str, apply: F) -> ChatSyncResult<SyncRun>
    where
        F: FnOnce(&mut SyncRun),
    {
        let mut runs = self.lock()?;
        let run = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| ChatSyncError::NotFound(format!("sync run not found: {run_id}")))?;
        apply(run);
        run.updated_at = Utc::now();
        Ok(run.clone())
    }
}

#[async_trait]
impl SyncRunRepository for InMemorySyncRunRepository {
    async fn find_incomplete(&self) -> ChatSyncResult<Option<SyncRun>> {
        Ok(self
            .lock()?
            .iter()
            .find(|r| r.status.is_incomplete())
            .cloned())
    }

    async fn create(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<SyncRun> {
        let mut runs = self.lock()?;
        if let Some(active) = runs.iter().find(|r| r.status.is_incomplete()) {
            return Err(ChatSyncError::Validation(format!(
                "cannot create run {run_id}: run {} is still {}",
                active.run_id,
                active.status.as_str()
            )));
        }
        if runs.iter().any(|r| r.run_id == run_id) {
            return Err(ChatSyncError::Validation(format!(
                "run id already exists: {run_id}"
            )));
        }

        let now = Utc::now();
        let run = SyncRun {
            id: Uuid::new_v4(),
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            cursor: String::new(),
            cutoff_date,
            processed_count: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
        };
        runs.push(run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: &str) -> ChatSyncResult<Option<SyncRun>> {
        Ok(self.lock()?.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn mark_running(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
        let current = self.get(run_id).await?;
        if matches!(current, Some(ref r) if r.status == RunStatus::Completed) {
            return Err(ChatSyncError::Validation(format!(
                "run {run_id} already completed"
            )));
        }
        self.update(run_id, |r| r.status = RunStatus::Running)
    }

    async fn save_cursor(&self, run_id: &str, cursor: &str) -> ChatSyncResult<()> {
        self.update(run_id, |r| r.cursor = cursor.to_string())
            .map(|_| ())
    }

    async fn increment_processed(&self, run_id: &str) -> ChatSyncResult<()> {
        self.update(run_id, |r| r.processed_count += 1).map(|_| ())
    }

    async fn mark_completed(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
        self.update(run_id, |r| {
            r.status = RunStatus::Completed;
            r.last_error = None;
        })
    }

    async fn mark_failed(&self, run_id: &str, error_message: &str) -> ChatSyncResult<SyncRun> {
        self.update(run_id, |r| {
            r.status = RunStatus::Failed;
            r.last_error = Some(error_message.to_string());
        })
    }

    async fn list_recent(&self, limit: i64) -> ChatSyncResult<Vec<SyncRun>> {
        let mut runs = self.lock()?.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }
}
