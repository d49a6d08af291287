use std::time::Duration;

use async_trait::async_trait;
use chatsync_common::error::ChatSyncResult;

/// Named mutual-exclusion token with a time-to-live.
///
/// Contention is not an error: `try_acquire` returns `false` and the caller
/// is expected to skip its work. An expired token may be taken over by any
/// owner.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Atomically take `key` for `owner` if it is free or expired.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool>;

    /// Push the expiry of a lock `owner` still holds. Returns `false` when the
    /// lock was lost (expired and taken, or released).
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool>;

    /// Drop `key` only if `owner` still holds it. Returns `false` when the
    /// lock had already passed to someone else (or was gone).
    async fn release(&self, key: &str, owner: &str) -> ChatSyncResult<bool>;
}
