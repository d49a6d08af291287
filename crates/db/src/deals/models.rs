use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Complete,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown sync status: {value}")),
        }
    }
}

/// The other party of a chat. Created once per external id and never
/// updated by the sync path afterwards, except for the uploaded avatar key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub avatar_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Uploaded blob key when available, otherwise the source URL.
    pub fn avatar(&self) -> Option<&str> {
        self.avatar_key.as_deref().or(self.avatar_url.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deal {
    pub id: Uuid,
    pub external_id: String,
    pub customer_id: Option<Uuid>,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Consumers may only see deals whose customer and message both landed.
    pub fn is_visible(&self) -> bool {
        self.sync_status == SyncStatus::Complete && self.customer_id.is_some()
    }
}

/// Customer attributes used when the customer has to be created.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub external_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Incoming last-message snapshot for a deal.
#[derive(Debug, Clone)]
pub struct DealUpdate {
    pub external_id: String,
    pub last_message_id: String,
    pub last_message_at: DateTime<Utc>,
}

/// Result of the transactional staging step: both rows committed, deal pending.
#[derive(Debug, Clone)]
pub struct StagedDeal {
    pub deal: Deal,
    pub customer: Customer,
    pub customer_created: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealFilter {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
