use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::lock::repositories::DistributedLock;
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

struct Holder {
    owner: String,
    expires_at: Instant,
}

/// Process-local lock table. Only excludes callers sharing this instance.
#[derive(Default)]
pub struct InMemoryLock {
    holders: Mutex<HashMap<String, Holder>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ChatSyncResult<std::sync::MutexGuard<'_, HashMap<String, Holder>>> {
        self.holders
            .lock()
            .map_err(|_| ChatSyncError::Internal("lock table mutex poisoned".to_string()))
    }

    /// Current owner of `key`, if held and unexpired.
    pub fn holder(&self, key: &str) -> ChatSyncResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .get(key)
            .filter(|h| h.expires_at > now)
            .map(|h| h.owner.clone()))
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool> {
        let mut holders = self.lock()?;
        let now = Instant::now();
        if let Some(current) = holders.get(key) {
            if current.expires_at > now {
                return Ok(false);
            }
        }
        holders.insert(
            key.to_string(),
            Holder {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> ChatSyncResult<bool> {
        let mut holders = self.lock()?;
        let now = Instant::now();
        match holders.get_mut(key) {
            Some(h) if h.owner == owner && h.expires_at > now => {
                h.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> ChatSyncResult<bool> {
        let mut holders = self.lock()?;
        match holders.get(key) {
            Some(h) if h.owner == owner => {
                holders.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
