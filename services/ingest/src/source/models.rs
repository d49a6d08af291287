use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCustomer {
    pub external_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// One chat as seen on a source page: the chat id, its counterparty and the
/// latest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub external_id: String,
    pub customer: ChatCustomer,
    pub last_message: ChatMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

// ── Wire format of the chat API ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatsResponse {
    #[serde(default)]
    pub items: Vec<ChatItem>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl ChatsResponse {
    /// Older API versions omit `has_more`; a non-empty `next_cursor` then
    /// means there is another page.
    pub fn has_more(&self) -> bool {
        self.has_more.unwrap_or_else(|| {
            self.next_cursor
                .as_deref()
                .map(|c| !c.is_empty())
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatItem {
    pub id: String,
    pub customer_id: String,
    pub last_message: MessageItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageItem {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<CustomerResponse> for ChatCustomer {
    fn from(c: CustomerResponse) -> Self {
        Self {
            external_id: c.id,
            name: c.name,
            avatar_url: c.avatar_url.filter(|u| !u.is_empty()),
        }
    }
}
