use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Pending and running runs block the creation of another run.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown run status: {value}")),
        }
    }
}

/// One ingestion attempt, possibly resumed across process restarts.
/// Doubles as the read-only run-status view exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    #[serde(skip_serializing)]
    pub id: Uuid,
    pub run_id: String,
    pub status: RunStatus,
    /// Opaque source pagination token; empty means "from the first page".
    pub cursor: String,
    pub cutoff_date: Option<DateTime<Utc>>,
    pub processed_count: i64,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRun {
    /// A running run that has not been touched within `bound` most likely
    /// belongs to a crashed process.
    pub fn is_stale(&self, now: DateTime<Utc>, bound: Duration) -> bool {
        self.status == RunStatus::Running && now - self.updated_at > bound
    }
}
