use std::env;
use std::str::FromStr;
use std::time::Duration;

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

/// Which family of store adapters to construct at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mock" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub message_store_url: Option<String>,
    pub lock_key: String,
    pub lock_ttl_secs: u64,
    /// Zero disables lease renewal.
    pub lock_renew_secs: u64,
    pub run_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub cutoff_date: Option<DateTime<Utc>>,
    pub run_id: Option<String>,
    pub avatar_dir: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads and validates the sync settings.
    pub fn from_env() -> ChatSyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let store_backend: StoreBackend = get_var_or("STORE_BACKEND", "memory")
            .parse()
            .map_err(ChatSyncError::Config)?;

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ChatSyncError::Config(
                "DATABASE_URL is required when STORE_BACKEND=postgres".to_string(),
            ));
        }
        let message_store_url = env::var("MESSAGE_STORE_URL")
            .ok()
            .or_else(|| database_url.clone());

        let cutoff_date = match env::var("SYNC_CUTOFF_DATE").ok() {
            Some(raw) if !raw.trim().is_empty() => Some(parse_cutoff_date(&raw)?),
            _ => None,
        };

        let config = Self {
            store_backend,
            database_url,
            message_store_url,
            lock_key: get_var_or("SYNC_LOCK_KEY", "sync_chats_lock"),
            lock_ttl_secs: parse_var("SYNC_LOCK_TTL_SECS", "3600")?,
            lock_renew_secs: parse_var("SYNC_LOCK_RENEW_SECS", "0")?,
            run_timeout_secs: parse_var("SYNC_RUN_TIMEOUT_SECS", "3000")?,
            max_attempts: parse_var("SYNC_MAX_ATTEMPTS", "3")?,
            retry_delay_secs: parse_var("SYNC_RETRY_DELAY_SECS", "60")?,
            cutoff_date,
            run_id: env::var("SYNC_RUN_ID").ok().filter(|v| !v.trim().is_empty()),
            avatar_dir: env::var("AVATAR_DIR").ok().filter(|v| !v.trim().is_empty()),
            log_level: get_var_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    /// The lock must outlive any single attempt, otherwise two runs can overlap.
    pub fn validate(&self) -> ChatSyncResult<()> {
        if self.max_attempts == 0 {
            return Err(ChatSyncError::Config(
                "SYNC_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.lock_ttl_secs <= self.run_timeout_secs {
            return Err(ChatSyncError::Config(format!(
                "SYNC_LOCK_TTL_SECS ({}) must exceed SYNC_RUN_TIMEOUT_SECS ({})",
                self.lock_ttl_secs, self.run_timeout_secs
            )));
        }
        if self.lock_renew_secs >= self.lock_ttl_secs {
            return Err(ChatSyncError::Config(format!(
                "SYNC_LOCK_RENEW_SECS ({}) must be below SYNC_LOCK_TTL_SECS ({})",
                self.lock_renew_secs, self.lock_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_renew_interval(&self) -> Option<Duration> {
        (self.lock_renew_secs > 0).then(|| Duration::from_secs(self.lock_renew_secs))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_cutoff_date(raw: &str) -> ChatSyncResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ChatSyncError::Config(format!("invalid SYNC_CUTOFF_DATE: {raw}")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> ChatSyncResult<T>
where
    T::Err: std::fmt::Display,
{
    get_var_or(key, default)
        .trim()
        .parse()
        .map_err(|e| ChatSyncError::Config(format!("invalid {key}: {e}")))
}
