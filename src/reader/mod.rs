//! Raw store readers.
//!
//! One reader per source family. Readers are pure I/O adapters: they hand
//! back loosely-typed JSON records and never interpret conversation
//! structure; that is the resolvers' job.

pub mod claude;
pub mod global;
pub mod legacy;
pub mod workspace;

use rusqlite::types::ValueRef;
use serde_json::Value;
use std::path::PathBuf;

/// Default editor user-data directory for the current platform.
pub(crate) fn editor_user_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_default();
    if cfg!(target_os = "macos") {
        home.join("Library/Application Support/Cursor/User")
    } else if cfg!(target_os = "windows") {
        home.join("AppData/Roaming/Cursor/User")
    } else {
        home.join(".config/Cursor/User")
    }
}

/// Decode a key-value payload cell into JSON. The stores write both TEXT and
/// BLOB cells for the same logical keys depending on record generation.
pub(crate) fn cell_to_json(value: ValueRef<'_>) -> Option<Value> {
    let text = match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok()?.to_string(),
        ValueRef::Blob(bytes) => String::from_utf8(bytes.to_vec()).ok()?,
        _ => return None,
    };
    serde_json::from_str(&text).ok()
}
