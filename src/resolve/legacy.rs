//! Resolver for legacy snapshot files (tabs/bubbles structure).
//!
//! Snapshot records predate native ingestion, so their external identity is
//! derived deterministically: a UUID-shaped tab id is reused verbatim (which
//! dedups a re-import against the natively-ingested conversation), anything
//! else is hashed from stable fields. Re-importing the same file twice is a
//! no-op either way.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

use super::{ConversationResolver, ResolveOutcome};
use crate::link;
use crate::model::{
    classify_message, from_epoch_millis, ChatMode, MessageFacets, MessageRole,
    ResolvedConversation, ResolvedMessage, SourceKind, WorkspaceRef,
};
use crate::reader::legacy::{LegacySnapshotReader, SnapshotFile};

pub struct LegacyResolver {
    reader: LegacySnapshotReader,
}

impl LegacyResolver {
    pub fn new(import_dir: PathBuf, pattern: &str) -> Result<Self> {
        Ok(Self {
            reader: LegacySnapshotReader::new(import_dir, pattern)?,
        })
    }

    fn resolve_file(&self, file: &SnapshotFile, outcome: &mut ResolveOutcome) {
        let items = match file.data.as_array() {
            Some(items) => items,
            None => {
                warn!(path = %file.path.display(), "snapshot file is not an array, skipping");
                outcome.skipped += 1;
                return;
            }
        };

        for item in items {
            let tabs = match item.get("data").and_then(|d| d.get("tabs")).and_then(|t| t.as_array())
            {
                Some(tabs) => tabs,
                None => continue,
            };
            for tab in tabs {
                if let Some(conversation) =
                    conversation_from_tab(tab, file.workspace_hash.as_deref())
                {
                    outcome.conversations.push(conversation);
                }
            }
        }
    }
}

impl ConversationResolver for LegacyResolver {
    fn source(&self) -> SourceKind {
        SourceKind::Legacy
    }

    fn description(&self) -> &str {
        "Legacy snapshot JSON files"
    }

    fn is_available(&self) -> bool {
        self.reader.is_available()
    }

    fn resolve(&self, since: Option<DateTime<Utc>>) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();

        for file in self.reader.read_all()? {
            self.resolve_file(&file, &mut outcome);
        }

        if let Some(watermark) = since {
            outcome
                .conversations
                .retain(|c| c.updated_at.map_or(true, |updated| updated >= watermark));
        }

        Ok(outcome)
    }
}

fn conversation_from_tab(tab: &Value, workspace_hash: Option<&str>) -> Option<ResolvedConversation> {
    let tab_id = tab.get("tabId").and_then(|v| v.as_str()).unwrap_or("");
    let title = tab
        .get("chatTitle")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty());

    let bubbles = tab.get("bubbles").and_then(|v| v.as_array())?;
    let messages: Vec<ResolvedMessage> = bubbles.iter().filter_map(message_from_bubble).collect();
    // Snapshots never recorded abandoned sessions; a tab with no usable
    // bubbles carries nothing worth a chat row.
    if messages.is_empty() {
        return None;
    }

    let external_id = if link::is_uuid_shaped(tab_id) {
        tab_id.to_string()
    } else {
        link::derived_external_id(
            workspace_hash,
            tab_id,
            title.unwrap_or(""),
            &messages[0].text,
        )
    };

    let created_at = messages.iter().find_map(|m| m.created_at);
    let updated_at = messages.iter().rev().find_map(|m| m.created_at);

    Some(ResolvedConversation {
        external_id,
        title: title.map(String::from),
        mode: ChatMode::Chat,
        created_at,
        updated_at,
        workspace: workspace_hash.map(|hash| WorkspaceRef {
            hash: hash.to_string(),
            folder_uri: None,
            resolved_path: None,
        }),
        source: SourceKind::Legacy,
        messages,
        files: vec![],
    })
}

fn message_from_bubble(bubble: &Value) -> Option<ResolvedMessage> {
    let role = match bubble.get("type").and_then(|v| v.as_str()) {
        Some(t) if t.eq_ignore_ascii_case("user") => MessageRole::User,
        Some(t) if t.eq_ignore_ascii_case("ai") || t.eq_ignore_ascii_case("assistant") => {
            MessageRole::Assistant
        }
        _ => return None,
    };

    let text = bubble
        .get("text")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .or_else(|| bubble.get("rawText").and_then(|v| v.as_str()))
        .unwrap_or("");

    let kind = classify_message(&MessageFacets {
        text: Some(text),
        ..Default::default()
    });

    Some(ResolvedMessage {
        role,
        text: text.to_string(),
        rich_text: None,
        native_id: bubble.get("id").and_then(|v| v.as_str()).map(String::from),
        raw_payload: Some(bubble.clone()),
        created_at: bubble
            .get("timestamp")
            .and_then(|v| v.as_i64())
            .and_then(from_epoch_millis),
        kind,
    })
}
