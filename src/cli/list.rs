//! List command implementation

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, TimeZone, Utc};

use super::short_timestamp;
use crate::store::{ArchiveStore, ChatFilter};

#[allow(clippy::too_many_arguments)]
pub fn run(
    store: &ArchiveStore,
    workspace: Option<String>,
    mode: Option<String>,
    source: Option<String>,
    tag: Option<String>,
    since: Option<String>,
    until: Option<String>,
    empty: Option<bool>,
    limit: i64,
) -> Result<()> {
    let filter = ChatFilter {
        workspace_hash: workspace,
        mode,
        source,
        tag,
        since: since.as_deref().map(day_start).transpose()?,
        until: until.as_deref().map(day_end).transpose()?,
        empty,
        limit,
        offset: 0,
    };

    let chats = store.list_chats(&filter)?;
    if chats.is_empty() {
        println!("No chats found. Run 'parley ingest' first.");
        return Ok(());
    }

    println!(
        "{:<6} {:<17} {:<7} {:<7} {:>5}  {:<24} {}",
        "ID", "Updated", "Mode", "Source", "Msgs", "Workspace", "Title"
    );
    println!("{}", "-".repeat(100));

    for chat in chats {
        let workspace = chat
            .workspace_path
            .as_deref()
            .or(chat.workspace_hash.as_deref())
            .unwrap_or("-");
        let workspace = tail(workspace, 24);
        let title = chat.title.as_deref().unwrap_or("(untitled)");

        println!(
            "{:<6} {:<17} {:<7} {:<7} {:>5}  {:<24} {}",
            chat.id,
            short_timestamp(chat.last_updated_at.as_deref()),
            chat.mode,
            chat.source,
            chat.messages_count,
            workspace,
            truncate(title, 40),
        );
    }

    Ok(())
}

pub fn workspaces(store: &ArchiveStore) -> Result<()> {
    let workspaces = store.list_workspaces()?;
    if workspaces.is_empty() {
        println!("No workspaces recorded yet.");
        return Ok(());
    }

    println!("{:<14} {:>6} {:<17} {}", "Hash", "Chats", "Last seen", "Path");
    println!("{}", "-".repeat(80));
    for ws in workspaces {
        println!(
            "{:<14} {:>6} {:<17} {}",
            truncate(&ws.workspace_hash, 14),
            ws.chat_count,
            short_timestamp(ws.last_seen_at.as_deref()),
            ws.resolved_path.or(ws.folder_uri).unwrap_or_default(),
        );
    }
    Ok(())
}

fn day_start(date: &str) -> Result<String> {
    parse_day(date, 0, 0, 0)
}

fn day_end(date: &str) -> Result<String> {
    parse_day(date, 23, 59, 59)
}

fn parse_day(date: &str, h: u32, m: u32, s: u32) -> Result<String> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
    let time = day
        .and_hms_opt(h, m, s)
        .ok_or_else(|| anyhow!("invalid time of day"))?;
    Ok(Utc.from_utc_datetime(&time).to_rfc3339())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    } else {
        s.to_string()
    }
}

fn tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count > max {
        let skip = count - (max - 1);
        let cut: String = s.chars().skip(skip).collect();
        format!("…{cut}")
    } else {
        s.to_string()
    }
}
