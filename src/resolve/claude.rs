//! Resolver for the chat-service API.
//!
//! The client hands back already-paginated conversation payloads with an
//! `updated_at` cursor; this resolver normalizes them. Conversations from
//! this source have no workspace linkage and land as orphaned chats.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::{ConversationResolver, ResolveOutcome};
use crate::model::{
    classify_message, parse_rfc3339, ChatMode, MessageFacets, MessageRole, ResolvedConversation,
    ResolvedMessage, SourceKind,
};
use crate::reader::claude::ClaudeClient;

pub struct ClaudeResolver {
    client: ClaudeClient,
}

impl ClaudeResolver {
    pub fn new(base_url: &str, org_id: &str, session_cookie: &str) -> Result<Self> {
        Ok(Self {
            client: ClaudeClient::new(base_url, org_id, session_cookie)?,
        })
    }
}

impl ConversationResolver for ClaudeResolver {
    fn source(&self) -> SourceKind {
        SourceKind::Claude
    }

    fn description(&self) -> &str {
        "Chat-service API"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn resolve(&self, since: Option<DateTime<Utc>>) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();

        for summary in self.client.list_conversations()? {
            let uuid = match summary.get("uuid").and_then(|v| v.as_str()) {
                Some(uuid) => uuid.to_string(),
                None => {
                    warn!("conversation summary missing uuid, skipping");
                    outcome.skipped += 1;
                    continue;
                }
            };

            // Bound the pass by the watermark before paying for the detail
            // fetch; summaries without a parseable timestamp are fetched
            // conservatively.
            let updated_at = summary
                .get("updated_at")
                .and_then(|v| v.as_str())
                .and_then(parse_rfc3339);
            if let (Some(watermark), Some(updated)) = (since, updated_at) {
                if updated < watermark {
                    continue;
                }
            }

            let payload = match self.client.fetch_conversation(&uuid) {
                Ok(mut payload) => {
                    // The list endpoint carries fields the detail endpoint
                    // omits; merge them in.
                    merge_summary(&mut payload, &summary);
                    payload
                }
                Err(e) => {
                    warn!(conversation = %uuid, error = %e, "failed to fetch conversation");
                    outcome.skipped += 1;
                    continue;
                }
            };

            match conversation_from_payload(&payload) {
                Some(conversation) => outcome.conversations.push(conversation),
                None => {
                    warn!(conversation = %uuid, "skipping malformed conversation payload");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }
}

fn merge_summary(payload: &mut Value, summary: &Value) {
    if let (Some(target), Some(source)) = (payload.as_object_mut(), summary.as_object()) {
        for (key, value) in source {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Normalize one full conversation payload. Pure; exercised directly by the
/// tests without a network client.
pub(crate) fn conversation_from_payload(payload: &Value) -> Option<ResolvedConversation> {
    let external_id = payload.get("uuid").and_then(|v| v.as_str())?.to_string();

    let title = payload
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);
    let created_at = payload
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(parse_rfc3339);
    let updated_at = payload
        .get("updated_at")
        .and_then(|v| v.as_str())
        .and_then(parse_rfc3339);

    let messages = payload
        .get("chat_messages")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(message_from_payload)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Some(ResolvedConversation {
        external_id,
        title,
        mode: ChatMode::Chat,
        created_at,
        updated_at,
        workspace: None,
        source: SourceKind::Claude,
        messages,
        files: vec![],
    })
}

fn message_from_payload(msg: &Value) -> Option<ResolvedMessage> {
    let role = match msg.get("sender").and_then(|v| v.as_str()) {
        Some("human") => MessageRole::User,
        Some("assistant") => MessageRole::Assistant,
        _ => return None,
    };

    let text = msg.get("text").and_then(|v| v.as_str()).unwrap_or("");

    // The content array mixes typed blocks: text, thinking, tool_use,
    // tool_result and future kinds.
    let mut thinking: Option<&str> = None;
    let mut has_tool_payload = false;
    let mut has_structured_content = false;
    if let Some(blocks) = msg.get("content").and_then(|v| v.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()) {
                Some("thinking") => {
                    thinking = block
                        .get("thinking")
                        .or_else(|| block.get("text"))
                        .and_then(|v| v.as_str())
                        .or(thinking);
                }
                Some("tool_use") | Some("tool_result") => has_tool_payload = true,
                Some("text") | None => {}
                Some(_) => has_structured_content = true,
            }
        }
    }

    let kind = classify_message(&MessageFacets {
        text: Some(text),
        rich_text: None,
        thinking,
        has_tool_payload,
        has_structured_content,
    });

    Some(ResolvedMessage {
        role,
        text: text.to_string(),
        rich_text: None,
        native_id: msg.get("uuid").and_then(|v| v.as_str()).map(String::from),
        raw_payload: Some(msg.clone()),
        created_at: msg
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(parse_rfc3339),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageType;
    use serde_json::json;

    #[test]
    fn normalizes_full_payload() {
        let payload = json!({
            "uuid": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "name": "Debugging the scheduler",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-01T11:30:00Z",
            "chat_messages": [
                {"uuid": "m-1", "sender": "human", "text": "why does it stall?",
                 "created_at": "2024-03-01T10:00:05Z",
                 "content": [{"type": "text", "text": "why does it stall?"}]},
                {"uuid": "m-2", "sender": "assistant", "text": "",
                 "content": [{"type": "tool_use", "name": "search"}]},
                {"uuid": "m-3", "sender": "assistant", "text": "found it",
                 "content": [
                    {"type": "thinking", "thinking": "the lock is held across await"},
                 ]},
            ]
        });

        let conv = conversation_from_payload(&payload).unwrap();
        assert_eq!(conv.source, SourceKind::Claude);
        assert!(conv.workspace.is_none());
        assert_eq!(conv.title.as_deref(), Some("Debugging the scheduler"));
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[0].role, MessageRole::User);
        assert_eq!(conv.messages[1].kind, MessageType::ToolCall);
        // Trace presence outranks the plain text.
        assert_eq!(conv.messages[2].kind, MessageType::Thinking);
        assert_eq!(conv.messages[2].native_id.as_deref(), Some("m-3"));
    }

    #[test]
    fn missing_uuid_is_malformed() {
        assert!(conversation_from_payload(&json!({"name": "no id"})).is_none());
    }

    #[test]
    fn unknown_senders_are_dropped() {
        let payload = json!({
            "uuid": "abc",
            "chat_messages": [
                {"sender": "system_banner", "text": "upgraded"},
                {"sender": "human", "text": "hello"},
            ]
        });
        let conv = conversation_from_payload(&payload).unwrap();
        assert_eq!(conv.messages.len(), 1);
    }
}
