//! CLI command implementations

pub mod index;
pub mod ingest;
pub mod list;
pub mod search;
pub mod show;
pub mod tag;

use anyhow::Result;

use crate::store::ArchiveStore;

/// Resolve a user-supplied chat reference: a numeric archive id or an
/// external identity string.
pub(crate) fn resolve_chat_ref(store: &ArchiveStore, reference: &str) -> Result<Option<i64>> {
    if let Ok(id) = reference.parse::<i64>() {
        if store.get_chat(id)?.is_some() {
            return Ok(Some(id));
        }
    }
    store.get_chat_id_by_external(reference)
}

pub(crate) fn short_timestamp(ts: Option<&str>) -> String {
    match ts {
        Some(ts) if ts.len() >= 16 => format!("{} {}", &ts[..10], &ts[11..16]),
        Some(ts) => ts.to_string(),
        None => "-".to_string(),
    }
}
