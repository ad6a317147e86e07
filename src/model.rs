//! Normalized domain model shared by resolvers, the ingest engine, and the store.
//!
//! Raw source payloads stay loosely typed (`serde_json::Value`) inside the
//! reader layer; everything past the resolver boundary uses these types.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Which source system produced a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Editor workspace/global state databases.
    Cursor,
    /// Chat-service HTTP API.
    Claude,
    /// Imported snapshot JSON files.
    Legacy,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cursor => "cursor",
            SourceKind::Claude => "claude",
            SourceKind::Legacy => "legacy",
        }
    }
}

/// Conversation modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Chat,
    Edit,
    Agent,
    Plan,
    Debug,
    Ask,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Edit => "edit",
            ChatMode::Agent => "agent",
            ChatMode::Plan => "plan",
            ChatMode::Debug => "debug",
            ChatMode::Ask => "ask",
        }
    }

    /// Unknown mode strings fall back to plain chat.
    pub fn parse(s: &str) -> Self {
        match s {
            "edit" => ChatMode::Edit,
            "agent" | "composer" => ChatMode::Agent,
            "plan" => ChatMode::Plan,
            "debug" => ChatMode::Debug,
            "ask" => ChatMode::Ask,
            _ => ChatMode::Chat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// Content classification for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Response,
    ToolCall,
    Thinking,
    Empty,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Response => "response",
            MessageType::ToolCall => "tool_call",
            MessageType::Thinking => "thinking",
            MessageType::Empty => "empty",
        }
    }
}

/// Content facets a resolver extracts from one raw message before
/// classification. A payload can populate several facets at once; the
/// priority order in [`classify_message`] decides the bucket.
#[derive(Debug, Default)]
pub struct MessageFacets<'a> {
    pub text: Option<&'a str>,
    pub rich_text: Option<&'a str>,
    pub thinking: Option<&'a str>,
    pub has_tool_payload: bool,
    pub has_structured_content: bool,
}

/// Bucket a message by its populated facets.
///
/// Order matters: the reasoning-trace check runs before the tool-call check,
/// which runs before the emptiness check. A payload carrying both a trace and
/// plain text is `thinking`.
pub fn classify_message(facets: &MessageFacets) -> MessageType {
    let has_text = facets.text.is_some_and(|t| !t.trim().is_empty());
    let has_rich = facets.rich_text.is_some_and(|t| !t.trim().is_empty());

    if facets.thinking.is_some_and(|t| !t.trim().is_empty()) {
        return MessageType::Thinking;
    }
    if facets.has_tool_payload && !has_text {
        return MessageType::ToolCall;
    }
    if !has_text && !has_rich && !facets.has_structured_content {
        return MessageType::Empty;
    }
    MessageType::Response
}

/// Workspace linkage carried alongside a resolved conversation.
#[derive(Debug, Clone)]
pub struct WorkspaceRef {
    pub hash: String,
    pub folder_uri: Option<String>,
    pub resolved_path: Option<String>,
}

/// One normalized message, ready for upsert.
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub role: MessageRole,
    pub text: String,
    pub rich_text: Option<String>,
    /// Source-native message id; idempotency key within the chat when present.
    pub native_id: Option<String>,
    pub raw_payload: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub kind: MessageType,
}

impl ResolvedMessage {
    /// Placeholder for a split-layout message whose body record was missing.
    pub fn placeholder(role: MessageRole, native_id: Option<String>) -> Self {
        Self {
            role,
            text: String::new(),
            rich_text: None,
            native_id,
            raw_payload: None,
            created_at: None,
            kind: MessageType::Empty,
        }
    }
}

/// One normalized conversation with its identity and linkage resolved.
#[derive(Debug, Clone)]
pub struct ResolvedConversation {
    /// Source-assigned (or deterministically derived) globally unique id.
    pub external_id: String,
    pub title: Option<String>,
    pub mode: ChatMode,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub workspace: Option<WorkspaceRef>,
    pub source: SourceKind,
    pub messages: Vec<ResolvedMessage>,
    /// Paths touched/discussed in the conversation, deduplicated.
    pub files: Vec<String>,
}

// ============================================
// TIMESTAMP NORMALIZATION
// ============================================

/// Interpret an integer as milliseconds since the Unix epoch.
pub fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Normalize a raw timestamp value into UTC.
///
/// Conversation-level fields arrive as integer epoch-millis in the editor
/// stores, message-level fields as either epoch-millis or ISO-8601 strings
/// depending on record generation. Everything downstream of the resolvers
/// assumes this single representation.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                from_epoch_millis(ms)
            } else {
                n.as_f64().and_then(|f| from_epoch_millis(f as i64))
            }
        }
        Value::String(s) => parse_rfc3339(s),
        _ => None,
    }
}

/// Parse an ISO-8601/RFC 3339 string, tolerating a trailing `Z`.
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thinking_wins_over_plain_text() {
        let facets = MessageFacets {
            text: Some("final answer"),
            thinking: Some("let me reason about this"),
            ..Default::default()
        };
        assert_eq!(classify_message(&facets), MessageType::Thinking);
    }

    #[test]
    fn tool_payload_without_text_is_tool_call() {
        let facets = MessageFacets {
            has_tool_payload: true,
            ..Default::default()
        };
        assert_eq!(classify_message(&facets), MessageType::ToolCall);
    }

    #[test]
    fn tool_payload_with_text_is_response() {
        let facets = MessageFacets {
            text: Some("ran the tool, here is what I found"),
            has_tool_payload: true,
            ..Default::default()
        };
        assert_eq!(classify_message(&facets), MessageType::Response);
    }

    #[test]
    fn all_absent_is_empty() {
        let facets = MessageFacets::default();
        assert_eq!(classify_message(&facets), MessageType::Empty);

        let whitespace = MessageFacets {
            text: Some("   "),
            rich_text: Some(""),
            ..Default::default()
        };
        assert_eq!(classify_message(&whitespace), MessageType::Empty);
    }

    #[test]
    fn rich_text_alone_is_response() {
        let facets = MessageFacets {
            rich_text: Some("{\"root\":{}}"),
            ..Default::default()
        };
        assert_eq!(classify_message(&facets), MessageType::Response);
    }

    #[test]
    fn timestamps_normalize_from_both_shapes() {
        let from_millis = parse_timestamp(&json!(1704067200000i64)).unwrap();
        let from_string = parse_timestamp(&json!("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(from_millis, from_string);
        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!("not a date")).is_none());
    }

    #[test]
    fn unknown_mode_falls_back_to_chat() {
        assert_eq!(ChatMode::parse("agent"), ChatMode::Agent);
        assert_eq!(ChatMode::parse("composer"), ChatMode::Agent);
        assert_eq!(ChatMode::parse("speedrun"), ChatMode::Chat);
    }
}
