//! Show command implementation

use anyhow::{bail, Result};

use super::{resolve_chat_ref, short_timestamp};
use crate::store::ArchiveStore;

pub fn run(store: &ArchiveStore, reference: &str, raw: bool) -> Result<()> {
    let chat_id = match resolve_chat_ref(store, reference)? {
        Some(id) => id,
        None => bail!("no chat matching '{reference}'"),
    };
    let detail = match store.get_chat(chat_id)? {
        Some(detail) => detail,
        None => bail!("no chat matching '{reference}'"),
    };

    let chat = &detail.chat;
    println!("{}", chat.title.as_deref().unwrap_or("(untitled)"));
    println!(
        "#{} · {} · {} · {} messages",
        chat.id, chat.mode, chat.source, chat.messages_count
    );
    println!("external id: {}", chat.external_id);
    if let Some(path) = chat.workspace_path.as_deref().or(chat.workspace_hash.as_deref()) {
        println!("workspace:   {path}");
    }
    println!(
        "created:     {}   updated: {}",
        short_timestamp(chat.created_at.as_deref()),
        short_timestamp(chat.last_updated_at.as_deref())
    );
    if !detail.tags.is_empty() {
        println!("tags:        {}", detail.tags.join(", "));
    }
    if !detail.files.is_empty() {
        println!("files:");
        for file in &detail.files {
            println!("  {file}");
        }
    }

    for message in &detail.messages {
        println!();
        let marker = match message.message_type.as_str() {
            "thinking" => " (thinking)",
            "tool_call" => " (tool call)",
            "empty" => " (empty)",
            _ => "",
        };
        println!(
            "── {}{} · {}",
            message.role,
            marker,
            short_timestamp(message.created_at.as_deref())
        );
        if !message.text.is_empty() {
            println!("{}", message.text);
        }
        if raw {
            if let Some(rich) = &message.rich_text {
                if !rich.is_empty() {
                    println!("[rich] {rich}");
                }
            }
        }
    }

    Ok(())
}
