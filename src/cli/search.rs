//! Search command implementation

use anyhow::Result;

use super::short_timestamp;
use crate::store::ArchiveStore;

pub fn run(store: &ArchiveStore, query: &str, limit: i64) -> Result<()> {
    let hits = store.search_chats(query, limit, 0)?;

    if hits.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }

    for hit in hits {
        let title = hit.title.as_deref().unwrap_or("(untitled)");
        println!(
            "#{:<5} {:<17} [{}] {}",
            hit.chat_id,
            short_timestamp(hit.last_updated_at.as_deref()),
            hit.mode,
            title
        );
        println!("       {}", hit.snippet);
        if let Some(path) = hit.workspace_path.as_deref() {
            println!("       in {path}");
        }
        println!();
    }

    Ok(())
}
