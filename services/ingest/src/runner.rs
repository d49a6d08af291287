use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use chatsync_config::AppConfig;
use chatsync_db::lock::repositories::DistributedLock;
use chatsync_db::sync::models::{RunStatus, SyncRun};
use chatsync_db::sync::repositories::SyncRunRepository;

use crate::engine::{EngineReport, SyncEngine};

const MAX_BACKOFF_EXPONENT: u32 = 4;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub lock_key: String,
    pub owner: String,
    pub lock_ttl: Duration,
    pub renew_interval: Option<Duration>,
    pub run_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl RunnerConfig {
    pub fn from_app(config: &AppConfig, owner: String) -> Self {
        Self {
            lock_key: config.lock_key.clone(),
            owner,
            lock_ttl: config.lock_ttl(),
            renew_interval: config.lock_renew_interval(),
            run_timeout: config.run_timeout(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Delay before attempt `attempt + 1`: doubles per failure, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.retry_delay * 2u32.pow(exponent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { run: SyncRun, report: EngineReport },
    /// Another holder owns the lock; nothing was touched.
    Skipped,
}

/// Owns the run lifecycle around a [`SyncEngine`]: lock, resume-or-create,
/// PENDING → RUNNING → COMPLETED/FAILED, and the bounded outer retry.
pub struct SyncRunner {
    engine: SyncEngine,
    runs: Arc<dyn SyncRunRepository>,
    lock: Arc<dyn DistributedLock>,
    config: RunnerConfig,
}

impl SyncRunner {
    pub fn new(
        engine: SyncEngine,
        runs: Arc<dyn SyncRunRepository>,
        lock: Arc<dyn DistributedLock>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            engine,
            runs,
            lock,
            config,
        }
    }

    /// One attempt. The lock is released on every exit path once taken.
    pub async fn run_once(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<RunOutcome> {
        let acquired = self
            .lock
            .try_acquire(&self.config.lock_key, &self.config.owner, self.config.lock_ttl)
            .await?;
        if !acquired {
            tracing::info!(lock_key = %self.config.lock_key, "another sync is running, skipping");
            return Ok(RunOutcome::Skipped);
        }

        let heartbeat = self.spawn_heartbeat();
        let result = self.run_locked(run_id, cutoff_date).await;
        if let Some(handle) = heartbeat {
            handle.abort();
        }

        match self
            .lock
            .release(&self.config.lock_key, &self.config.owner)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                lock_key = %self.config.lock_key,
                "sync lock expired and passed to another owner before release"
            ),
            Err(e) => {
                tracing::error!(lock_key = %self.config.lock_key, error = %e, "failed to release sync lock")
            }
        }
        result
    }

    /// Retry failed attempts up to `max_attempts`, sleeping with backoff in
    /// between. The lock is not held while sleeping.
    pub async fn run_with_retry(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<RunOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_once(run_id, cutoff_date).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        run_id,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "sync attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(run_id, attempts = attempt, error = %e, "sync failed, giving up");
                    return Err(e);
                }
            }
        }
    }

    async fn run_locked(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<RunOutcome> {
        let run = self.load_or_create(run_id, cutoff_date).await?;
        let run = self.runs.mark_running(&run.run_id).await?;

        let result = match tokio::time::timeout(self.config.run_timeout, self.engine.run(&run)).await
        {
            Ok(result) => result,
            Err(_) => Err(ChatSyncError::Timeout(format!(
                "run {} exceeded {}s",
                run.run_id,
                self.config.run_timeout.as_secs()
            ))),
        };

        match result {
            Ok(report) => {
                let run = self.runs.mark_completed(&run.run_id).await?;
                tracing::info!(
                    run_id = %run.run_id,
                    processed = run.processed_count,
                    "sync completed"
                );
                Ok(RunOutcome::Completed { run, report })
            }
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "sync run failed");
                if let Err(mark_err) = self.runs.mark_failed(&run.run_id, &e.to_string()).await {
                    tracing::error!(run_id = %run.run_id, error = %mark_err, "could not record run failure");
                }
                Err(e)
            }
        }
    }

    /// Resume an incomplete run if one exists, otherwise reopen a FAILED run
    /// with this id, otherwise create a new one.
    pub async fn load_or_create(
        &self,
        run_id: &str,
        cutoff_date: Option<DateTime<Utc>>,
    ) -> ChatSyncResult<SyncRun> {
        if let Some(existing) = self.runs.find_incomplete().await? {
            let bound = chrono::Duration::from_std(self.config.lock_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            if existing.is_stale(Utc::now(), bound) {
                tracing::warn!(
                    run_id = %existing.run_id,
                    updated_at = %existing.updated_at,
                    "resuming a run that looks crashed"
                );
            }
            if existing.run_id != run_id {
                tracing::info!(
                    requested = run_id,
                    resumed = %existing.run_id,
                    "incomplete run found, resuming it instead"
                );
            }
            tracing::info!(run_id = %existing.run_id, cursor = %existing.cursor, "resuming sync run");
            return Ok(existing);
        }

        if let Some(previous) = self.runs.get(run_id).await? {
            return match previous.status {
                RunStatus::Completed => Err(ChatSyncError::Validation(format!(
                    "run {run_id} already completed"
                ))),
                _ => {
                    tracing::info!(run_id, cursor = %previous.cursor, "retrying failed run");
                    Ok(previous)
                }
            };
        }

        self.runs.create(run_id, cutoff_date).await
    }

    fn spawn_heartbeat(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.renew_interval?;
        let lock = Arc::clone(&self.lock);
        let key = self.config.lock_key.clone();
        let owner = self.config.owner.clone();
        let ttl = self.config.lock_ttl;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match lock.renew(&key, &owner, ttl).await {
                    Ok(true) => tracing::debug!(lock_key = %key, "sync lock renewed"),
                    Ok(false) => {
                        tracing::warn!(lock_key = %key, "sync lock lost, stopping renewal");
                        return;
                    }
                    Err(e) => tracing::warn!(lock_key = %key, error = %e, "sync lock renewal failed"),
                }
            }
        }))
    }
}
