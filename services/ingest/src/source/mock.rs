use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::cursor::{decode_page, encode_page};
use super::models::{Chat, ChatCustomer, ChatMessage, ChatPage};
use super::{ChatSource, SourceError};

#[derive(Debug, Clone)]
pub struct MockSourceConfig {
    pub total_chats: usize,
    pub page_size: usize,
}

impl MockSourceConfig {
    pub fn from_env() -> Self {
        let total_chats = std::env::var("MOCK_TOTAL_CHATS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        let page_size = std::env::var("MOCK_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self {
            total_chats,
            page_size,
        }
    }
}

/// Timestamp of chat 0; chat `i` is `i` hours older.
pub fn default_base_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Deterministic chat `index` as generated by the mock feed.
pub fn generate_chat(index: usize, base_date: DateTime<Utc>) -> Chat {
    let customer_id = format!("cust_{index:04}");
    Chat {
        external_id: format!("chat_{index:04}"),
        customer: ChatCustomer {
            avatar_url: Some(format!("https://example.com/avatars/{customer_id}.jpg")),
            external_id: customer_id,
            name: format!("Customer {index}"),
        },
        last_message: ChatMessage {
            message_id: format!("msg_{index:04}"),
            text: format!("Message from customer {index}"),
            created_at: base_date - Duration::hours(index as i64),
        },
    }
}

/// In-process chat feed with page-number cursors.
///
/// Every non-empty page carries the cursor of the page after it, so a
/// consumer persists one cursor per page fetched. Failures can be injected
/// for the next N calls or for a specific page.
pub struct MockChatSource {
    chats: Mutex<Vec<Chat>>,
    page_size: usize,
    fail_next: AtomicU32,
    failing_pages: Mutex<HashSet<u64>>,
    requested: Mutex<Vec<String>>,
}

impl MockChatSource {
    pub fn new(config: MockSourceConfig) -> Self {
        let base = default_base_date();
        let chats = (0..config.total_chats)
            .map(|i| generate_chat(i, base))
            .collect();
        Self::from_chats(chats, config.page_size)
    }

    pub fn from_chats(chats: Vec<Chat>, page_size: usize) -> Self {
        Self {
            chats: Mutex::new(chats),
            page_size: page_size.max(1),
            fail_next: AtomicU32::new(0),
            failing_pages: Mutex::new(HashSet::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `count` calls fail regardless of cursor.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make the next fetch of `page` fail once.
    pub fn fail_page_once(&self, page: u64) {
        if let Ok(mut pages) = self.failing_pages.lock() {
            pages.insert(page);
        }
    }

    /// Replace a chat in place, e.g. to simulate a new message arriving.
    pub fn replace(&self, index: usize, chat: Chat) {
        if let Ok(mut chats) = self.chats.lock() {
            if let Some(slot) = chats.get_mut(index) {
                *slot = chat;
            }
        }
    }

    /// Cursors passed to `get_page`, in call order.
    pub fn requested_cursors(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn take_injected_failure(&self, page: u64) -> bool {
        let counted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let paged = self
            .failing_pages
            .lock()
            .map(|mut pages| pages.remove(&page))
            .unwrap_or(false);
        counted || paged
    }
}

#[async_trait]
impl ChatSource for MockChatSource {
    async fn get_page(&self, cursor: &str) -> Result<ChatPage, SourceError> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(cursor.to_string());
        }

        let page = decode_page(cursor)?;
        if self.take_injected_failure(page) {
            return Err(SourceError::Unavailable(format!(
                "simulated failure on page {page}"
            )));
        }

        let chats = self
            .chats
            .lock()
            .map_err(|_| SourceError::Unavailable("mock feed poisoned".to_string()))?;
        let total = chats.len();
        let start = (page as usize).saturating_mul(self.page_size).min(total);
        let end = (start + self.page_size).min(total);

        let has_more = end < total;
        let next_cursor = (start < end).then(|| encode_page(page + 1));

        tracing::debug!(page, count = end - start, has_more, "mock source page");

        Ok(ChatPage {
            chats: chats[start..end].to_vec(),
            next_cursor,
            has_more,
        })
    }
}
