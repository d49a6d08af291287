//! Page-number cursors: standard base64 of the decimal page index.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::SourceError;

pub fn encode_page(page: u64) -> String {
    STANDARD.encode(page.to_string())
}

/// An empty cursor means the first page.
pub fn decode_page(cursor: &str) -> Result<u64, SourceError> {
    if cursor.is_empty() {
        return Ok(0);
    }
    let invalid = || SourceError::InvalidCursor(cursor.to_string());
    let bytes = STANDARD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.parse::<u64>().map_err(|_| invalid())
}
