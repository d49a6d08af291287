pub mod fs;
pub mod memory;
pub mod repositories;

/// Blob key under which a customer's avatar is stored.
pub fn avatar_key(customer_external_id: &str) -> String {
    format!("avatars/{customer_external_id}.jpg")
}

pub const AVATAR_CONTENT_TYPE: &str = "image/jpeg";
