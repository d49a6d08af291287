use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::lock::repositories::DistributedLock;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

/// Lock rows in `sync_locks`. Acquisition is a single upsert that only
/// overwrites an expired holder, so two callers can never both see success.
#[derive(Clone)]
pub struct PgDistributedLock {
    pool: PgPool,
}

impl PgDistributedLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expiry_after(ttl: Duration) -> ChatSyncResult<chrono::DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| ChatSyncError::Validation(format!("invalid lock ttl: {e}")))?;
    Ok(Utc::now() + ttl)
}

#[async_trait]
impl DistributedLock for PgDistributedLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool> {
        let expires_at = expiry_after(ttl)?;
        let row = sqlx::query(
            "insert into sync_locks (lock_key, owner, expires_at)
             values ($1, $2, $3)
             on conflict (lock_key) do update
               set owner = excluded.owner, expires_at = excluded.expires_at
               where sync_locks.expires_at < $4
             returning lock_key",
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool> {
        let expires_at = expiry_after(ttl)?;
        let result = sqlx::query(
            "update sync_locks set expires_at = $1
             where lock_key = $2 and owner = $3 and expires_at >= $4",
        )
        .bind(expires_at)
        .bind(key)
        .bind(owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> ChatSyncResult<bool> {
        let result = sqlx::query("delete from sync_locks where lock_key = $1 and owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| ChatSyncError::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}
