//! Tag command implementations

use anyhow::{bail, Result};

use super::resolve_chat_ref;
use crate::store::ArchiveStore;

pub fn add(store: &ArchiveStore, reference: &str, labels: Vec<String>) -> Result<()> {
    let chat_id = require_chat(store, reference)?;
    let added = store.add_tags(chat_id, &labels)?;
    println!("Added {added} tag(s) to chat #{chat_id}");
    Ok(())
}

pub fn remove(store: &ArchiveStore, reference: &str, labels: Vec<String>) -> Result<()> {
    let chat_id = require_chat(store, reference)?;
    let removed = store.remove_tags(chat_id, &labels)?;
    println!("Removed {removed} tag(s) from chat #{chat_id}");
    Ok(())
}

pub fn list(store: &ArchiveStore) -> Result<()> {
    let tags = store.all_tags()?;
    if tags.is_empty() {
        println!("No tags yet.");
        return Ok(());
    }
    for (tag, count) in tags {
        println!("{count:>5}  {tag}");
    }
    Ok(())
}

fn require_chat(store: &ArchiveStore, reference: &str) -> Result<i64> {
    match resolve_chat_ref(store, reference)? {
        Some(id) => Ok(id),
        None => bail!("no chat matching '{reference}'"),
    }
}
