use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{RunStatus, SyncRun};
use crate::sync::repositories::SyncRunRepository;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

const RUN_COLUMNS: &str = "id, run_id, status, cursor_value, cutoff_date, processed_count, \
     last_error, started_at, updated_at";

#[derive(Clone)]
pub struct PgSyncRunRepository {
    pool: PgPool,
}

impl PgSyncRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> ChatSyncResult<SyncRun> {
        let status_raw: String = row.get("status");
        let status = RunStatus::from_str(&status_raw).map_err(ChatSyncError::Internal)?;

        Ok(SyncRun {
            id: row.get("id"),
            run_id: row.get("run_id"),
            status,
            cursor: row.get("cursor_value"),
            cutoff_date: row.get("cutoff_date"),
            processed_count: row.get("processed_count"),
            last_error: row.get("last_error"),
            started_at: row.get("started_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn not_found(run_id: &str) -> ChatSyncError {
        ChatSyncError::NotFound(format!("sync run not found: {run_id}"))
    }
}

#[async_trait]
impl SyncRunRepository for PgSyncRunRepository {
    async fn find_incomplete(&self) -> ChatSyncResult<Option<SyncRun>> {
        let row = sqlx::query(&format!(
            "select {RUN_COLUMNS} from sync_runs
             where status in ('pending', 'running')
             order by started_at desc
             limit 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn create(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<SyncRun> {
        let row = sqlx::query(&format!(
            "insert into sync_runs (id, run_id, status, cutoff_date)
             values ($1, $2, 'pending', $3)
             returning {RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(cutoff_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ChatSyncError::Validation(
                format!("cannot create run {run_id}: {}", db.message()),
            ),
            other => ChatSyncError::Database(other.to_string()),
        })?;

        Self::map_row(row)
    }

    async fn get(&self, run_id: &str) -> ChatSyncResult<Option<SyncRun>> {
        let row = sqlx::query(&format!(
            "select {RUN_COLUMNS} from sync_runs where run_id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn mark_running(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
        let row = sqlx::query(&format!(
            "update sync_runs
             set status = 'running', updated_at = $1
             where run_id = $2 and status != 'completed'
             returning {RUN_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None if self.get(run_id).await?.is_some() => Err(ChatSyncError::Validation(
                format!("run {run_id} already completed"),
            )),
            None => Err(Self::not_found(run_id)),
        }
    }

    async fn save_cursor(&self, run_id: &str, cursor: &str) -> ChatSyncResult<()> {
        let result = sqlx::query(
            "update sync_runs set cursor_value = $1, updated_at = $2 where run_id = $3",
        )
        .bind(cursor)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(run_id));
        }
        Ok(())
    }

    async fn increment_processed(&self, run_id: &str) -> ChatSyncResult<()> {
        let result = sqlx::query(
            "update sync_runs
             set processed_count = processed_count + 1, updated_at = $1
             where run_id = $2",
        )
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(run_id));
        }
        Ok(())
    }

    async fn mark_completed(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
        let row = sqlx::query(&format!(
            "update sync_runs
             set status = 'completed', last_error = null, updated_at = $1
             where run_id = $2
             returning {RUN_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(Self::not_found(run_id)),
        }
    }

    async fn mark_failed(&self, run_id: &str, error_message: &str) -> ChatSyncResult<SyncRun> {
        let row = sqlx::query(&format!(
            "update sync_runs
             set status = 'failed', last_error = $1, updated_at = $2
             where run_id = $3
             returning {RUN_COLUMNS}"
        ))
        .bind(error_message)
        .bind(Utc::now())
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(Self::not_found(run_id)),
        }
    }

    async fn list_recent(&self, limit: i64) -> ChatSyncResult<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            "select {RUN_COLUMNS} from sync_runs order by started_at desc limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::schema::ensure_schema;

    // These tests share the single-incomplete-run index, so each one first
    // finishes whatever incomplete run a previous test left behind.
    async fn test_repo() -> Option<PgSyncRunRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        sqlx::query("update sync_runs set status = 'failed' where status in ('pending', 'running')")
            .execute(&pool)
            .await
            .ok()?;
        Some(PgSyncRunRepository::new(pool))
    }

    #[tokio::test]
    async fn create_then_resume_lifecycle() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run_id = format!("run-{}", Uuid::new_v4());

        let created = repo.create(&run_id, None).await.expect("create");
        assert_eq!(created.status, RunStatus::Pending);
        assert_eq!(created.cursor, "");

        let found = repo.find_incomplete().await.expect("find").expect("incomplete");
        assert_eq!(found.run_id, run_id);

        repo.mark_running(&run_id).await.expect("running");
        repo.save_cursor(&run_id, "Mg==").await.expect("cursor");
        repo.increment_processed(&run_id).await.expect("inc");
        repo.increment_processed(&run_id).await.expect("inc");

        let done = repo.mark_completed(&run_id).await.expect("complete");
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.cursor, "Mg==");
        assert_eq!(done.processed_count, 2);
        assert!(repo.find_incomplete().await.expect("find").is_none());
    }

    #[tokio::test]
    async fn second_incomplete_run_is_rejected() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let first = format!("run-{}", Uuid::new_v4());
        let second = format!("run-{}", Uuid::new_v4());

        repo.create(&first, None).await.expect("first");
        let err = repo.create(&second, None).await.unwrap_err();
        assert!(matches!(err, ChatSyncError::Validation(_)));

        repo.mark_failed(&first, "cleanup").await.expect("fail");
    }

    #[tokio::test]
    async fn mark_failed_records_error_and_completion_clears_it() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run_id = format!("run-{}", Uuid::new_v4());
        repo.create(&run_id, None).await.expect("create");

        let failed = repo
            .mark_failed(&run_id, "connection timeout")
            .await
            .expect("fail");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("connection timeout"));

        repo.mark_running(&run_id).await.expect("resume");
        let done = repo.mark_completed(&run_id).await.expect("complete");
        assert!(done.last_error.is_none());
    }

    #[tokio::test]
    async fn completed_run_cannot_be_marked_running() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run_id = format!("run-{}", Uuid::new_v4());
        repo.create(&run_id, None).await.expect("create");
        repo.mark_completed(&run_id).await.expect("complete");

        let err = repo.mark_running(&run_id).await.unwrap_err();
        assert!(matches!(err, ChatSyncError::Validation(_)));
        let err = repo.mark_running("missing-run").await.unwrap_err();
        assert!(matches!(err, ChatSyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_cursor_on_unknown_run_is_not_found() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let err = repo.save_cursor("missing-run", "abc").await.unwrap_err();
        assert!(matches!(err, ChatSyncError::NotFound(_)));
    }
}
