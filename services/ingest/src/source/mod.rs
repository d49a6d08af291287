pub mod client;
pub mod cursor;
pub mod mock;
pub mod models;

use async_trait::async_trait;
use reqwest::StatusCode;

use self::models::ChatPage;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("invalid cursor: {0:?}")]
    InvalidCursor(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// A paginated feed of chats, newest first.
///
/// The cursor is opaque to callers: pass `""` for the first page and then
/// whatever `next_cursor` the previous page returned. Implementations may
/// retry at the transport level, but a returned error is final for the call.
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn get_page(&self, cursor: &str) -> Result<ChatPage, SourceError>;
}
