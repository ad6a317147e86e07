//! Resolver for the editor's workspace and global state databases.
//!
//! Conversation records come in two generations: an *inline* layout that
//! embeds the ordered message array directly, and a *split* layout where the
//! record carries only lightweight headers and each message body lives in a
//! separate per-message record. Detection is structural: the record's
//! version integer is advisory at best and is ignored.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{ConversationResolver, ResolveOutcome};
use crate::model::{
    classify_message, parse_timestamp, ChatMode, MessageFacets, MessageRole, ResolvedConversation,
    ResolvedMessage, SourceKind, WorkspaceRef,
};
use crate::reader::global::{GlobalStoreReader, RawConversation};
use crate::reader::workspace::WorkspaceStateReader;

pub struct CursorResolver {
    workspace_reader: WorkspaceStateReader,
    global_reader: GlobalStoreReader,
}

impl CursorResolver {
    /// `base` overrides the editor user-data directory (the parent of
    /// `workspaceStorage/` and `globalStorage/`).
    pub fn new(base: Option<PathBuf>) -> Self {
        let (workspace_root, global_db) = match base {
            Some(dir) => (
                Some(dir.join("workspaceStorage")),
                Some(dir.join("globalStorage/state.vscdb")),
            ),
            None => (None, None),
        };
        Self {
            workspace_reader: WorkspaceStateReader::new(workspace_root),
            global_reader: GlobalStoreReader::new(global_db),
        }
    }

    /// Map conversation id -> owning workspace, from the workspace stores'
    /// conversation indexes. Many conversations map to one workspace.
    fn workspace_links(&self) -> Result<HashMap<String, WorkspaceRef>> {
        let mut links = HashMap::new();

        for hash in self.workspace_reader.list_workspace_hashes()? {
            let record = match self.workspace_reader.read_workspace(&hash)? {
                Some(record) => record,
                None => continue,
            };
            let workspace = WorkspaceRef {
                hash: record.hash.clone(),
                folder_uri: record.folder_uri.clone(),
                resolved_path: record
                    .folder_uri
                    .as_deref()
                    .map(strip_file_scheme)
                    .map(String::from),
            };
            for conversation_id in record.conversation_ids() {
                links.insert(conversation_id, workspace.clone());
            }
        }

        Ok(links)
    }

    /// Normalize one raw conversation record. Returns None when a required
    /// field is missing; the caller records the skip and moves on.
    fn resolve_record(
        &self,
        raw: &RawConversation,
        links: &HashMap<String, WorkspaceRef>,
    ) -> Option<ResolvedConversation> {
        let data = &raw.data;
        let external_id = data.get("composerId").and_then(|v| v.as_str())?.to_string();

        let mode = data
            .get("forceMode")
            .or_else(|| data.get("unifiedMode"))
            .and_then(|v| v.as_str())
            .map(ChatMode::parse)
            .unwrap_or(ChatMode::Chat);

        let title = data
            .get("name")
            .or_else(|| data.get("subtitle"))
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(String::from);

        let created_at = data.get("createdAt").and_then(parse_timestamp);
        let updated_at = data.get("lastUpdatedAt").and_then(parse_timestamp);

        let messages = self.resolve_messages(&external_id, data, created_at);
        let files = collect_relevant_files(&messages);

        Some(ResolvedConversation {
            workspace: links.get(&external_id).cloned(),
            external_id,
            title,
            mode,
            created_at,
            updated_at,
            source: SourceKind::Cursor,
            messages,
            files,
        })
    }

    /// Pick the record's layout and produce its ordered messages.
    fn resolve_messages(
        &self,
        conversation_id: &str,
        data: &Value,
        fallback_ts: Option<DateTime<Utc>>,
    ) -> Vec<ResolvedMessage> {
        let inline = data
            .get("conversation")
            .and_then(|v| v.as_array())
            .filter(|arr| !arr.is_empty());
        if let Some(bubbles) = inline {
            return bubbles
                .iter()
                .filter_map(|bubble| message_from_bubble(bubble, fallback_ts))
                .collect();
        }

        let headers = data
            .get("fullConversationHeadersOnly")
            .and_then(|v| v.as_array())
            .filter(|arr| !arr.is_empty());
        if let Some(headers) = headers {
            return self.resolve_split(conversation_id, headers, fallback_ts);
        }

        // Neither layout present: an abandoned session. The draft input
        // buffer may still hold text but it was never sent, so the
        // conversation normalizes to zero messages and is kept.
        debug!(conversation = conversation_id, "empty conversation");
        vec![]
    }

    /// Split layout: batch-fetch every referenced message record, then walk
    /// the headers in order. A header whose record is missing degrades to an
    /// empty placeholder instead of failing the conversation.
    fn resolve_split(
        &self,
        conversation_id: &str,
        headers: &[Value],
        fallback_ts: Option<DateTime<Utc>>,
    ) -> Vec<ResolvedMessage> {
        let ids: Vec<String> = headers
            .iter()
            .filter_map(|h| h.get("bubbleId").and_then(|v| v.as_str()).map(String::from))
            .collect();

        let records = match self.global_reader.read_message_records(conversation_id, &ids) {
            Ok(records) => records,
            Err(e) => {
                warn!(conversation = conversation_id, error = %e,
                    "failed to fetch split-layout message records");
                HashMap::new()
            }
        };

        let mut messages = vec![];
        for header in headers {
            let message_id = match header.get("bubbleId").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            match records.get(message_id) {
                Some(record) => {
                    if let Some(msg) = message_from_bubble(record, fallback_ts) {
                        messages.push(msg);
                    }
                }
                None => {
                    let role = match role_from_type(header.get("type")) {
                        Some(role) => role,
                        None => continue,
                    };
                    debug!(conversation = conversation_id, message = message_id,
                        "message record missing, emitting placeholder");
                    messages.push(ResolvedMessage::placeholder(
                        role,
                        Some(message_id.to_string()),
                    ));
                }
            }
        }
        messages
    }
}

impl ConversationResolver for CursorResolver {
    fn source(&self) -> SourceKind {
        SourceKind::Cursor
    }

    fn description(&self) -> &str {
        "Editor workspace/global state databases"
    }

    fn is_available(&self) -> bool {
        self.global_reader.is_available() || self.workspace_reader.is_available()
    }

    fn resolve(&self, since: Option<DateTime<Utc>>) -> Result<ResolveOutcome> {
        let links = self.workspace_links()?;
        let mut outcome = ResolveOutcome::default();

        for raw in self.global_reader.read_all_conversations()? {
            match self.resolve_record(&raw, &links) {
                Some(conversation) => {
                    if let (Some(watermark), Some(updated)) = (since, conversation.updated_at) {
                        if updated < watermark {
                            continue;
                        }
                    }
                    outcome.conversations.push(conversation);
                }
                None => {
                    warn!(conversation = %raw.id, "skipping malformed conversation record");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }
}

fn strip_file_scheme(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

fn role_from_type(value: Option<&Value>) -> Option<MessageRole> {
    match value.and_then(|v| v.as_i64()) {
        Some(1) => Some(MessageRole::User),
        Some(2) => Some(MessageRole::Assistant),
        _ => None,
    }
}

/// Normalize one message record (inline bubble or fetched split record).
/// Unknown sender types are dropped.
fn message_from_bubble(
    bubble: &Value,
    fallback_ts: Option<DateTime<Utc>>,
) -> Option<ResolvedMessage> {
    let role = role_from_type(bubble.get("type"))?;

    let text = bubble.get("text").and_then(|v| v.as_str()).unwrap_or("");
    let rich_text = bubble.get("richText").and_then(|v| v.as_str());
    let thinking = bubble
        .get("thinking")
        .and_then(|t| t.get("text"))
        .and_then(|v| v.as_str());
    let has_tool_payload = bubble
        .get("toolFormerData")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let has_structured_content = bubble
        .get("codeBlocks")
        .and_then(|v| v.as_array())
        .map(|arr| !arr.is_empty())
        .unwrap_or(false);

    let kind = classify_message(&MessageFacets {
        text: Some(text),
        rich_text,
        thinking,
        has_tool_payload,
        has_structured_content,
    });

    // Message-level timestamps arrive as epoch millis in older records and
    // ISO-8601 strings in newer ones; fall back to the conversation's own
    // creation time when absent.
    let created_at = bubble
        .get("createdAt")
        .and_then(parse_timestamp)
        .or(fallback_ts);

    Some(ResolvedMessage {
        role,
        text: text.to_string(),
        rich_text: rich_text.map(String::from),
        native_id: bubble
            .get("bubbleId")
            .and_then(|v| v.as_str())
            .map(String::from),
        raw_payload: Some(bubble.clone()),
        created_at,
        kind,
    })
}

fn collect_relevant_files(messages: &[ResolvedMessage]) -> Vec<String> {
    let mut files = BTreeSet::new();
    for message in messages {
        if let Some(raw) = &message.raw_payload {
            if let Some(paths) = raw.get("relevantFiles").and_then(|v| v.as_array()) {
                for path in paths {
                    if let Some(p) = path.as_str() {
                        files.insert(p.to_string());
                    }
                }
            }
        }
    }
    files.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageType;
    use rusqlite::{params, Connection};
    use serde_json::json;
    use tempfile::TempDir;

    /// Build an editor user-data directory with a seeded global store and
    /// optionally one workspace.
    struct Fixture {
        #[allow(dead_code)]
        tmp: TempDir,
        base: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let base = tmp.path().to_path_buf();
            std::fs::create_dir_all(base.join("globalStorage")).unwrap();
            let conn = Connection::open(base.join("globalStorage/state.vscdb")).unwrap();
            conn.execute_batch("CREATE TABLE cursorDiskKV (key TEXT PRIMARY KEY, value BLOB)")
                .unwrap();
            Self { tmp, base }
        }

        fn put(&self, key: &str, value: &Value) {
            let conn = Connection::open(self.base.join("globalStorage/state.vscdb")).unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO cursorDiskKV (key, value) VALUES (?, ?)",
                params![key, value.to_string()],
            )
            .unwrap();
        }

        fn put_raw(&self, key: &str, value: &str) {
            let conn = Connection::open(self.base.join("globalStorage/state.vscdb")).unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO cursorDiskKV (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .unwrap();
        }

        fn add_workspace(&self, hash: &str, folder: &str, conversation_ids: &[&str]) {
            let dir = self.base.join("workspaceStorage").join(hash);
            std::fs::create_dir_all(&dir).unwrap();
            let conn = Connection::open(dir.join("state.vscdb")).unwrap();
            conn.execute_batch("CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value BLOB)")
                .unwrap();
            let index = json!({
                "allComposers": conversation_ids
                    .iter()
                    .map(|id| json!({"composerId": id}))
                    .collect::<Vec<_>>()
            });
            conn.execute(
                "INSERT INTO ItemTable (key, value) VALUES (?, ?)",
                params!["composer.composerData", index.to_string()],
            )
            .unwrap();
            std::fs::write(
                dir.join("workspace.json"),
                json!({"folder": folder}).to_string(),
            )
            .unwrap();
        }

        fn resolver(&self) -> CursorResolver {
            CursorResolver::new(Some(self.base.clone()))
        }
    }

    fn bubble(kind: i64, id: &str, text: &str) -> Value {
        json!({"type": kind, "bubbleId": id, "text": text, "richText": ""})
    }

    #[test]
    fn inline_layout_resolves_in_order() {
        let fx = Fixture::new();
        fx.put(
            "composerData:conv-1",
            &json!({
                "composerId": "conv-1",
                "name": "Refactor the parser",
                "unifiedMode": "agent",
                "createdAt": 1704067200000i64,
                "lastUpdatedAt": 1704070800000i64,
                "conversation": [
                    bubble(1, "b1", "please refactor"),
                    bubble(2, "b2", "done, see diff"),
                ]
            }),
        );

        let outcome = fx.resolver().resolve(None).unwrap();
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.conversations.len(), 1);

        let conv = &outcome.conversations[0];
        assert_eq!(conv.external_id, "conv-1");
        assert_eq!(conv.mode, ChatMode::Agent);
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].role, MessageRole::User);
        assert_eq!(conv.messages[0].text, "please refactor");
        assert_eq!(conv.messages[1].role, MessageRole::Assistant);
        assert!(conv.updated_at > conv.created_at);
    }

    #[test]
    fn split_layout_reconstructs_same_as_inline() {
        let fx = Fixture::new();
        fx.put(
            "composerData:inline",
            &json!({
                "composerId": "inline",
                "conversation": [bubble(1, "m1", "hello"), bubble(2, "m2", "hi there")]
            }),
        );
        fx.put(
            "composerData:split",
            &json!({
                "composerId": "split",
                "fullConversationHeadersOnly": [
                    {"bubbleId": "m1", "type": 1},
                    {"bubbleId": "m2", "type": 2}
                ]
            }),
        );
        fx.put("bubbleId:split:m1", &bubble(1, "m1", "hello"));
        fx.put("bubbleId:split:m2", &bubble(2, "m2", "hi there"));

        let outcome = fx.resolver().resolve(None).unwrap();
        let inline = outcome
            .conversations
            .iter()
            .find(|c| c.external_id == "inline")
            .unwrap();
        let split = outcome
            .conversations
            .iter()
            .find(|c| c.external_id == "split")
            .unwrap();

        assert_eq!(inline.messages.len(), 2);
        assert_eq!(split.messages.len(), 2);
        for (a, b) in inline.messages.iter().zip(split.messages.iter()) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.text, b.text);
            assert_eq!(a.native_id, b.native_id);
            assert_eq!(a.kind, b.kind);
        }
    }

    #[test]
    fn missing_split_record_degrades_to_placeholder() {
        let fx = Fixture::new();
        fx.put(
            "composerData:conv",
            &json!({
                "composerId": "conv",
                "fullConversationHeadersOnly": [
                    {"bubbleId": "m1", "type": 1},
                    {"bubbleId": "gone", "type": 2}
                ]
            }),
        );
        fx.put("bubbleId:conv:m1", &bubble(1, "m1", "ask"));

        let outcome = fx.resolver().resolve(None).unwrap();
        let conv = &outcome.conversations[0];
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].kind, MessageType::Empty);
        assert_eq!(conv.messages[1].role, MessageRole::Assistant);
        assert_eq!(conv.messages[1].native_id.as_deref(), Some("gone"));
    }

    #[test]
    fn empty_conversation_round_trips_with_zero_messages() {
        let fx = Fixture::new();
        fx.put(
            "composerData:empty",
            &json!({
                "composerId": "empty",
                "conversation": [],
                "fullConversationHeadersOnly": [],
                "richText": ""
            }),
        );

        let outcome = fx.resolver().resolve(None).unwrap();
        assert_eq!(outcome.conversations.len(), 1);
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.conversations[0].messages.is_empty());
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let fx = Fixture::new();
        for i in 0..9 {
            fx.put(
                &format!("composerData:conv-{i}"),
                &json!({"composerId": format!("conv-{i}"), "conversation": [bubble(1, "b", "x")]}),
            );
        }
        // Required field missing entirely.
        fx.put("composerData:bad", &json!({"conversation": []}));
        // Not even JSON; the reader already drops this one.
        fx.put_raw("composerData:worse", "{truncated");

        let outcome = fx.resolver().resolve(None).unwrap();
        assert_eq!(outcome.conversations.len(), 9);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn workspace_linkage_and_orphans() {
        let fx = Fixture::new();
        fx.add_workspace("ws-hash", "file:///home/dev/proj", &["linked"]);
        fx.put(
            "composerData:linked",
            &json!({"composerId": "linked", "conversation": []}),
        );
        fx.put(
            "composerData:orphan",
            &json!({"composerId": "orphan", "conversation": []}),
        );

        let outcome = fx.resolver().resolve(None).unwrap();
        let linked = outcome
            .conversations
            .iter()
            .find(|c| c.external_id == "linked")
            .unwrap();
        let orphan = outcome
            .conversations
            .iter()
            .find(|c| c.external_id == "orphan")
            .unwrap();

        let ws = linked.workspace.as_ref().unwrap();
        assert_eq!(ws.hash, "ws-hash");
        assert_eq!(ws.resolved_path.as_deref(), Some("/home/dev/proj"));
        assert!(orphan.workspace.is_none());
    }

    #[test]
    fn incremental_filter_bounds_by_update_time() {
        let fx = Fixture::new();
        fx.put(
            "composerData:old",
            &json!({"composerId": "old", "lastUpdatedAt": 1704067200000i64, "conversation": []}),
        );
        fx.put(
            "composerData:new",
            &json!({"composerId": "new", "lastUpdatedAt": 1704153600000i64, "conversation": []}),
        );
        fx.put(
            "composerData:undated",
            &json!({"composerId": "undated", "conversation": []}),
        );

        let since = crate::model::from_epoch_millis(1704100000000).unwrap();
        let outcome = fx.resolver().resolve(Some(since)).unwrap();
        let ids: Vec<&str> = outcome
            .conversations
            .iter()
            .map(|c| c.external_id.as_str())
            .collect();
        assert!(ids.contains(&"new"));
        assert!(ids.contains(&"undated"));
        assert!(!ids.contains(&"old"));
    }

    #[test]
    fn thinking_and_tool_bubbles_classify() {
        let fx = Fixture::new();
        fx.put(
            "composerData:conv",
            &json!({
                "composerId": "conv",
                "conversation": [
                    {"type": 2, "bubbleId": "t1", "text": "summary",
                     "thinking": {"text": "working through it"}},
                    {"type": 2, "bubbleId": "t2", "text": "",
                     "toolFormerData": {"tool": "grep", "result": "3 hits"}},
                    {"type": 2, "bubbleId": "t3", "text": ""},
                ]
            }),
        );

        let outcome = fx.resolver().resolve(None).unwrap();
        let kinds: Vec<MessageType> = outcome.conversations[0]
            .messages
            .iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![MessageType::Thinking, MessageType::ToolCall, MessageType::Empty]
        );
    }
}
