//! Identity derivation and conflict policies.
//!
//! Native records keep their source-assigned id verbatim. Imported snapshot
//! records get a deterministic derived id so re-importing the same file is
//! idempotent, and so an import of a conversation the editor store already
//! knows about collides onto the same chat row instead of duplicating it.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// True if `id` looks like a source-assigned UUID.
///
/// Snapshot files carry the original conversation UUID as the tab id when the
/// export was taken from a modern store; reusing it verbatim dedups the
/// import against native ingestion.
pub fn is_uuid_shaped(id: &str) -> bool {
    if id.len() != 36 {
        return false;
    }
    id.bytes().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Derive a stable external id for an imported conversation that has no
/// reusable native id. Hashes the fields that survive re-export unchanged.
pub fn derived_external_id(
    workspace_hash: Option<&str>,
    tab_id: &str,
    title: &str,
    first_text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace_hash.unwrap_or(""));
    hasher.update(b"\n");
    hasher.update(tab_id);
    hasher.update(b"\n");
    hasher.update(title);
    hasher.update(b"\n");
    hasher.update(first_text);
    let digest = hex::encode(hasher.finalize());
    format!("legacy-{}", &digest[..16])
}

/// Last-write-wins: should an incoming record replace the stored one?
///
/// A record without an update timestamp never overwrites one that has one;
/// two missing timestamps let the incoming record through (re-ingestion of
/// the same data must still refresh denormalized fields).
pub fn last_write_wins(
    existing: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> bool {
    match (existing, incoming) {
        (Some(old), Some(new)) => new >= old,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Normalize a tag label: lowercase, trimmed, inner whitespace collapsed to
/// `-`, empty path segments dropped. `Bug / Auth Flow` becomes `bug/auth-flow`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let normalized: Vec<String> = raw
        .split('/')
        .map(|segment| {
            segment
                .trim()
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("-")
        })
        .filter(|segment| !segment.is_empty())
        .collect();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized.join("/"))
    }
}
