use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message in a chat's history, keyed by `(chat_id, message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
