//! SQLite schema definition
//!
//! The base schema is applied as one idempotent batch. Columns added after
//! the initial release go through `ensure_column` in the store so that a
//! database created by any earlier build upgrades in place at startup.
//!
//! The search index is an external-content FTS5 table shadowing `messages`;
//! the three triggers keep it in sync inside whatever transaction touches
//! the message rows, so the index can never lag committed data.

pub const SCHEMA: &str = r#"
-- ============================================
-- WORKSPACES
-- ============================================

CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY,
    workspace_hash TEXT NOT NULL UNIQUE,
    folder_uri TEXT,
    resolved_path TEXT,
    first_seen_at TEXT,
    last_seen_at TEXT
);

-- ============================================
-- CHATS
-- ============================================

CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,      -- Source-assigned, never regenerated
    workspace_id INTEGER,                  -- NULL = orphaned chat
    title TEXT,
    mode TEXT NOT NULL DEFAULT 'chat',     -- 'chat', 'edit', 'agent', 'plan', 'debug', 'ask'
    created_at TEXT,
    last_updated_at TEXT,
    source TEXT NOT NULL DEFAULT 'cursor', -- 'cursor', 'claude', 'legacy'
    FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE SET NULL
);

-- ============================================
-- MESSAGES
-- ============================================

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY,
    chat_id INTEGER NOT NULL,
    role TEXT NOT NULL,                    -- 'user', 'assistant', 'system'
    text TEXT NOT NULL DEFAULT '',
    rich_text TEXT,
    created_at TEXT,
    native_msg_id TEXT,                    -- Idempotency key within the chat
    FOREIGN KEY(chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- One row per (chat, native id); messages without a native id are exempt
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_native
    ON messages(chat_id, native_msg_id) WHERE native_msg_id IS NOT NULL;

-- ============================================
-- FILE REFERENCES & TAGS
-- ============================================

CREATE TABLE IF NOT EXISTS chat_files (
    chat_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    PRIMARY KEY (chat_id, path),
    FOREIGN KEY(chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tags (
    chat_id INTEGER NOT NULL,
    tag TEXT NOT NULL,                     -- normalized 'namespace/value'
    PRIMARY KEY (chat_id, tag),
    FOREIGN KEY(chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ============================================
-- SYNC STATE
-- ============================================

-- Per-source incremental cursor plus last-pass statistics. The watermark
-- advances inside the same transaction as the conversation it covers.
CREATE TABLE IF NOT EXISTS sync_state (
    source TEXT PRIMARY KEY,
    last_run_at TEXT,
    watermark TEXT,
    conversations_seen INTEGER NOT NULL DEFAULT 0,
    conversations_created INTEGER NOT NULL DEFAULT 0,
    conversations_updated INTEGER NOT NULL DEFAULT 0,
    messages_written INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0
);

-- ============================================
-- FULL-TEXT SEARCH
-- ============================================

CREATE VIRTUAL TABLE IF NOT EXISTS message_fts USING fts5(
    text,
    rich_text,
    content='messages',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO message_fts(rowid, text, rich_text)
    VALUES (new.id, new.text, new.rich_text);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
    INSERT INTO message_fts(message_fts, rowid, text, rich_text)
    VALUES ('delete', old.id, old.text, old.rich_text);
END;

CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
    INSERT INTO message_fts(message_fts, rowid, text, rich_text)
    VALUES ('delete', old.id, old.text, old.rich_text);
    INSERT INTO message_fts(rowid, text, rich_text)
    VALUES (new.id, new.text, new.rich_text);
END;

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_chats_workspace ON chats(workspace_id);
CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(last_updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_chats_source ON chats(source);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);
CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);
"#;

/// Columns added after the initial schema shipped. Applied idempotently at
/// startup; a pre-existing column with a different declared type is fatal.
pub const ADDITIVE_COLUMNS: &[(&str, &str, &str, &str)] = &[
    // (table, column, ALTER declaration, expected declared type)
    ("chats", "messages_count", "INTEGER NOT NULL DEFAULT 0", "INTEGER"),
    ("messages", "message_type", "TEXT NOT NULL DEFAULT 'response'", "TEXT"),
    ("messages", "raw_json", "TEXT", "TEXT"),
];
