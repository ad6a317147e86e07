//! Canonical archive storage with SQLite + FTS5.
//!
//! Owns the schema, the per-conversation atomic upsert, the incremental-sync
//! cursor, and the query surface consumed by the CLI. Every mutation for one
//! conversation (chat row, message rows, their search-index mirror via
//! triggers, file references, watermark) happens inside one transaction.

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::link;
use crate::model::{ResolvedConversation, WorkspaceRef};

pub use schema::{ADDITIVE_COLUMNS, SCHEMA};

/// Fatal store-level failures. Unlike per-record problems these abort the
/// pass: continuing against a store in this state would corrupt data.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("column {table}.{column} has declared type {actual:?}, expected {expected}")]
    SchemaMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },

    #[error("search index out of sync: {messages} message rows, {indexed} index entries; run index rebuild")]
    IndexOutOfSync { messages: i64, indexed: i64 },
}

/// Result of committing one conversation.
#[derive(Debug)]
pub struct CommitOutcome {
    pub chat_id: i64,
    pub created: bool,
    pub updated: bool,
    pub messages_written: usize,
}

#[derive(Debug)]
pub struct ArchiveStore {
    conn: Connection,
}

impl ArchiveStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        // WAL lets a reader (viewer, exporter) coexist with the single writer.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        self.conn.execute_batch(SCHEMA)?;

        for &(table, column, declaration, expected_type) in ADDITIVE_COLUMNS {
            self.ensure_column(table, column, declaration, expected_type)?;
        }
        Ok(())
    }

    /// Add a column if it is not already present. Safe to run on every
    /// startup; errors only when the column exists with a different declared
    /// type, which means this database belongs to an incompatible build.
    fn ensure_column(
        &self,
        table: &str,
        column: &str,
        declaration: &str,
        expected_type: &str,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let existing: Option<String> = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let declared: String = row.get(2)?;
                Ok((name, declared))
            })?
            .filter_map(|r| r.ok())
            .find(|(name, _)| name == column)
            .map(|(_, declared)| declared);

        match existing {
            Some(declared) => {
                if !declared.eq_ignore_ascii_case(expected_type) {
                    return Err(StoreError::SchemaMismatch {
                        table: table.to_string(),
                        column: column.to_string(),
                        expected: expected_type.to_string(),
                        actual: declared,
                    }
                    .into());
                }
                Ok(())
            }
            None => {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} {declaration}"
                ))?;
                info!(table, column, "added column during schema migration");
                Ok(())
            }
        }
    }

    // ============================================
    // CONVERSATION UPSERT
    // ============================================

    /// Commit one resolved conversation atomically: workspace linkage, chat
    /// upsert keyed by external identity, message upserts keyed by native
    /// message id, file-reference union, and (optionally) the watermark
    /// advance, all in one transaction.
    pub fn commit_conversation(
        &mut self,
        conversation: &ResolvedConversation,
        advance_watermark: bool,
    ) -> Result<CommitOutcome> {
        let tx = self.conn.transaction()?;

        let workspace_id = resolve_workspace(&tx, conversation.workspace.as_ref())?;

        let existing: Option<(i64, Option<String>)> = tx
            .query_row(
                "SELECT id, last_updated_at FROM chats WHERE external_id = ?",
                params![conversation.external_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let incoming_updated = conversation.updated_at.map(|t| t.to_rfc3339());
        let outcome = match existing {
            Some((chat_id, stored_updated)) => {
                let stored = stored_updated.as_deref().and_then(parse_stored_ts);
                if !link::last_write_wins(stored, conversation.updated_at) {
                    // A stale copy of a record we already hold; leave the row
                    // as committed by the newer source.
                    CommitOutcome {
                        chat_id,
                        created: false,
                        updated: false,
                        messages_written: 0,
                    }
                } else {
                    tx.execute(
                        r#"UPDATE chats
                           SET workspace_id = ?, title = ?, mode = ?, created_at = ?,
                               last_updated_at = ?, source = ?, messages_count = ?
                           WHERE id = ?"#,
                        params![
                            workspace_id,
                            conversation.title,
                            conversation.mode.as_str(),
                            conversation.created_at.map(|t| t.to_rfc3339()),
                            incoming_updated,
                            conversation.source.as_str(),
                            conversation.messages.len() as i64,
                            chat_id,
                        ],
                    )?;
                    let messages_written = upsert_messages(&tx, chat_id, conversation, true)?;
                    CommitOutcome {
                        chat_id,
                        created: false,
                        updated: true,
                        messages_written,
                    }
                }
            }
            None => {
                tx.execute(
                    r#"INSERT INTO chats
                       (external_id, workspace_id, title, mode, created_at,
                        last_updated_at, source, messages_count)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                    params![
                        conversation.external_id,
                        workspace_id,
                        conversation.title,
                        conversation.mode.as_str(),
                        conversation.created_at.map(|t| t.to_rfc3339()),
                        incoming_updated,
                        conversation.source.as_str(),
                        conversation.messages.len() as i64,
                    ],
                )?;
                let chat_id = tx.last_insert_rowid();
                let messages_written = upsert_messages(&tx, chat_id, conversation, false)?;
                CommitOutcome {
                    chat_id,
                    created: true,
                    updated: false,
                    messages_written,
                }
            }
        };

        // File references are an additive union across passes; the source
        // never reports deletions.
        for path in &conversation.files {
            tx.execute(
                "INSERT OR IGNORE INTO chat_files (chat_id, path) VALUES (?, ?)",
                params![outcome.chat_id, path],
            )?;
        }

        if advance_watermark {
            if let Some(updated) = &incoming_updated {
                advance_watermark_tx(&tx, conversation.source.as_str(), updated)?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    // ============================================
    // SYNC STATE
    // ============================================

    pub fn watermark(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT watermark FROM sync_state WHERE source = ?",
                params![source],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(stored.as_deref().and_then(parse_stored_ts))
    }

    /// Record the outcome of a completed pass (statistics only; the
    /// watermark was already advanced transactionally per conversation).
    pub fn record_pass(
        &self,
        source: &str,
        seen: usize,
        created: usize,
        updated: usize,
        messages_written: usize,
        errors: usize,
    ) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO sync_state
               (source, last_run_at, conversations_seen, conversations_created,
                conversations_updated, messages_written, errors)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(source) DO UPDATE SET
                   last_run_at = excluded.last_run_at,
                   conversations_seen = excluded.conversations_seen,
                   conversations_created = excluded.conversations_created,
                   conversations_updated = excluded.conversations_updated,
                   messages_written = excluded.messages_written,
                   errors = excluded.errors"#,
            params![
                source,
                Utc::now().to_rfc3339(),
                seen as i64,
                created as i64,
                updated as i64,
                messages_written as i64,
                errors as i64,
            ],
        )?;
        Ok(())
    }

    // ============================================
    // QUERIES
    // ============================================

    /// Ranked full-text search over message content. Returns at most one hit
    /// per chat, carrying a snippet from its best-ranked message. A
    /// malformed FTS query yields an empty result, not an error.
    pub fn search_chats(&self, query: &str, limit: i64, offset: i64) -> Result<Vec<SearchHit>> {
        let sql = r#"SELECT c.id, c.external_id, c.title, c.mode, c.source,
                            c.created_at, c.last_updated_at, c.messages_count,
                            w.workspace_hash, w.resolved_path,
                            snippet(message_fts, 0, '[', ']', '…', 32) AS snip,
                            MIN(bm25(message_fts)) AS rank
                     FROM message_fts
                     JOIN messages m ON m.id = message_fts.rowid
                     JOIN chats c ON c.id = m.chat_id
                     LEFT JOIN workspaces w ON w.id = c.workspace_id
                     WHERE message_fts MATCH ?
                     GROUP BY c.id
                     ORDER BY rank
                     LIMIT ? OFFSET ?"#;

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![query, limit, offset], |row| {
            Ok(SearchHit {
                chat_id: row.get(0)?,
                external_id: row.get(1)?,
                title: row.get(2)?,
                mode: row.get(3)?,
                source: row.get(4)?,
                created_at: row.get(5)?,
                last_updated_at: row.get(6)?,
                messages_count: row.get(7)?,
                workspace_hash: row.get(8)?,
                workspace_path: row.get(9)?,
                snippet: row.get(10)?,
            })
        });

        match rows.and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>()) {
            Ok(hits) => Ok(hits),
            Err(rusqlite::Error::SqliteFailure(_, message)) => {
                warn!(query, error = ?message, "full-text query failed");
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_chat_id_by_external(&self, external_id: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM chats WHERE external_id = ?",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// One chat with its ordered messages, file references, and tags.
    pub fn get_chat(&self, chat_id: i64) -> Result<Option<ChatDetail>> {
        let chat: Option<ChatRow> = self
            .conn
            .query_row(
                r#"SELECT c.id, c.external_id, c.title, c.mode, c.source,
                          c.created_at, c.last_updated_at, c.messages_count,
                          w.workspace_hash, w.resolved_path
                   FROM chats c
                   LEFT JOIN workspaces w ON w.id = c.workspace_id
                   WHERE c.id = ?"#,
                params![chat_id],
                map_chat_row,
            )
            .optional()?;

        let chat = match chat {
            Some(chat) => chat,
            None => return Ok(None),
        };

        let mut stmt = self.conn.prepare(
            r#"SELECT id, role, text, rich_text, created_at, native_msg_id, message_type
               FROM messages
               WHERE chat_id = ?
               ORDER BY created_at ASC, id ASC"#,
        )?;
        let messages = stmt
            .query_map(params![chat_id], |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    text: row.get(2)?,
                    rich_text: row.get(3)?,
                    created_at: row.get(4)?,
                    native_msg_id: row.get(5)?,
                    message_type: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT path FROM chat_files WHERE chat_id = ? ORDER BY path")?;
        let files = stmt
            .query_map(params![chat_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM tags WHERE chat_id = ? ORDER BY tag")?;
        let tags = stmt
            .query_map(params![chat_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(Some(ChatDetail {
            chat,
            messages,
            files,
            tags,
        }))
    }

    /// List chats with optional filtering by workspace, mode, tag, source,
    /// date range, and emptiness.
    pub fn list_chats(&self, filter: &ChatFilter) -> Result<Vec<ChatRow>> {
        let mut conditions: Vec<&str> = vec![];
        let mut values: Vec<rusqlite::types::Value> = vec![];

        if let Some(hash) = &filter.workspace_hash {
            conditions.push("w.workspace_hash = ?");
            values.push(hash.clone().into());
        }
        if let Some(mode) = &filter.mode {
            conditions.push("c.mode = ?");
            values.push(mode.clone().into());
        }
        if let Some(source) = &filter.source {
            conditions.push("c.source = ?");
            values.push(source.clone().into());
        }
        if let Some(tag) = &filter.tag {
            conditions.push("c.id IN (SELECT chat_id FROM tags WHERE tag = ?)");
            values.push(tag.clone().into());
        }
        if let Some(since) = &filter.since {
            conditions.push("c.last_updated_at >= ?");
            values.push(since.clone().into());
        }
        if let Some(until) = &filter.until {
            conditions.push("c.last_updated_at <= ?");
            values.push(until.clone().into());
        }
        match filter.empty {
            Some(true) => conditions.push("c.messages_count = 0"),
            Some(false) => conditions.push("c.messages_count > 0"),
            None => {}
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            r#"SELECT c.id, c.external_id, c.title, c.mode, c.source,
                      c.created_at, c.last_updated_at, c.messages_count,
                      w.workspace_hash, w.resolved_path
               FROM chats c
               LEFT JOIN workspaces w ON w.id = c.workspace_id
               {where_clause}
               ORDER BY c.last_updated_at DESC
               LIMIT ? OFFSET ?"#
        );
        values.push(filter.limit.into());
        values.push(filter.offset.into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), map_chat_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceRow>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT w.id, w.workspace_hash, w.folder_uri, w.resolved_path,
                      w.first_seen_at, w.last_seen_at,
                      (SELECT COUNT(*) FROM chats c WHERE c.workspace_id = w.id) AS chat_count
               FROM workspaces w
               ORDER BY w.last_seen_at DESC"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WorkspaceRow {
                    id: row.get(0)?,
                    workspace_hash: row.get(1)?,
                    folder_uri: row.get(2)?,
                    resolved_path: row.get(3)?,
                    first_seen_at: row.get(4)?,
                    last_seen_at: row.get(5)?,
                    chat_count: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ============================================
    // TAGS
    // ============================================

    /// Attach tags to a chat. Labels are normalized; duplicates and empty
    /// labels are ignored. Returns the number of tags actually added.
    pub fn add_tags(&self, chat_id: i64, labels: &[String]) -> Result<usize> {
        let mut added = 0;
        for label in labels {
            if let Some(tag) = link::normalize_tag(label) {
                added += self.conn.execute(
                    "INSERT OR IGNORE INTO tags (chat_id, tag) VALUES (?, ?)",
                    params![chat_id, tag],
                )?;
            }
        }
        Ok(added)
    }

    pub fn remove_tags(&self, chat_id: i64, labels: &[String]) -> Result<usize> {
        let mut removed = 0;
        for label in labels {
            if let Some(tag) = link::normalize_tag(label) {
                removed += self.conn.execute(
                    "DELETE FROM tags WHERE chat_id = ? AND tag = ?",
                    params![chat_id, tag],
                )?;
            }
        }
        Ok(removed)
    }

    /// All tags with their usage counts, most used first.
    pub fn all_tags(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag, COUNT(*) FROM tags GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ============================================
    // MAINTENANCE
    // ============================================

    /// Delete a chat, its messages (and their index entries), file
    /// references, and tags.
    pub fn delete_chat(&mut self, chat_id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        // Explicit deletes so the FTS triggers fire for every message row.
        tx.execute("DELETE FROM messages WHERE chat_id = ?", params![chat_id])?;
        tx.execute("DELETE FROM chat_files WHERE chat_id = ?", params![chat_id])?;
        tx.execute("DELETE FROM tags WHERE chat_id = ?", params![chat_id])?;
        tx.execute("DELETE FROM chats WHERE id = ?", params![chat_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Remove all chats that normalized to zero messages.
    pub fn delete_empty_chats(&mut self) -> Result<usize> {
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM chats WHERE messages_count = 0")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };
        for chat_id in &ids {
            self.delete_chat(*chat_id)?;
        }
        info!(count = ids.len(), "deleted empty chats");
        Ok(ids.len())
    }

    /// Verify the search index covers exactly the committed message rows.
    /// A mismatch is fatal and requires an explicit rebuild; ingestion never
    /// silently repairs the index.
    pub fn check_index(&self) -> Result<()> {
        let messages: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let indexed: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM message_fts", [], |row| row.get(0))?;
        if messages != indexed {
            return Err(StoreError::IndexOutOfSync { messages, indexed }.into());
        }
        Ok(())
    }

    /// Rebuild the search index from the message table.
    pub fn rebuild_index(&self) -> Result<()> {
        self.conn
            .execute("INSERT INTO message_fts(message_fts) VALUES('rebuild')", [])
            .context("rebuilding search index")?;
        info!("search index rebuilt");
        Ok(())
    }

    // ============================================
    // COUNTS
    // ============================================

    pub fn count_chats(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?)
    }

    pub fn count_messages(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }
}

/// Resolve (and lazily create) the workspace row for a conversation's
/// linkage. Refreshes `last_seen_at` on every sighting; known folder data is
/// kept when the incoming reference carries less.
fn resolve_workspace(tx: &Transaction, workspace: Option<&WorkspaceRef>) -> Result<Option<i64>> {
    let workspace = match workspace {
        Some(ws) => ws,
        None => return Ok(None),
    };
    let now = Utc::now().to_rfc3339();

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM workspaces WHERE workspace_hash = ?",
            params![workspace.hash],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                r#"UPDATE workspaces
                   SET folder_uri = COALESCE(?, folder_uri),
                       resolved_path = COALESCE(?, resolved_path),
                       last_seen_at = ?
                   WHERE id = ?"#,
                params![workspace.folder_uri, workspace.resolved_path, now, id],
            )?;
            Ok(Some(id))
        }
        None => {
            tx.execute(
                r#"INSERT INTO workspaces
                   (workspace_hash, folder_uri, resolved_path, first_seen_at, last_seen_at)
                   VALUES (?, ?, ?, ?, ?)"#,
                params![
                    workspace.hash,
                    workspace.folder_uri,
                    workspace.resolved_path,
                    now,
                    now
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        }
    }
}

/// Write the conversation's messages. Messages carrying a native id are
/// updated in place when already present; messages without one are replaced
/// as a set each time the chat is re-committed, which keeps full
/// re-ingestion idempotent.
fn upsert_messages(
    tx: &Transaction,
    chat_id: i64,
    conversation: &ResolvedConversation,
    existing_chat: bool,
) -> Result<usize> {
    if existing_chat {
        tx.execute(
            "DELETE FROM messages WHERE chat_id = ? AND native_msg_id IS NULL",
            params![chat_id],
        )?;
    }

    let mut written = 0;
    for message in &conversation.messages {
        let raw_json = message
            .raw_payload
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()?;
        let created_at = message.created_at.map(|t| t.to_rfc3339());

        if let Some(native_id) = &message.native_id {
            let changed = tx.execute(
                r#"UPDATE messages
                   SET role = ?, text = ?, rich_text = ?, created_at = ?,
                       raw_json = ?, message_type = ?
                   WHERE chat_id = ? AND native_msg_id = ?"#,
                params![
                    message.role.as_str(),
                    message.text,
                    message.rich_text,
                    created_at,
                    raw_json,
                    message.kind.as_str(),
                    chat_id,
                    native_id,
                ],
            )?;
            if changed == 0 {
                tx.execute(
                    r#"INSERT INTO messages
                       (chat_id, role, text, rich_text, created_at, native_msg_id,
                        raw_json, message_type)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                    params![
                        chat_id,
                        message.role.as_str(),
                        message.text,
                        message.rich_text,
                        created_at,
                        native_id,
                        raw_json,
                        message.kind.as_str(),
                    ],
                )?;
            }
        } else {
            tx.execute(
                r#"INSERT INTO messages
                   (chat_id, role, text, rich_text, created_at, native_msg_id,
                    raw_json, message_type)
                   VALUES (?, ?, ?, ?, ?, NULL, ?, ?)"#,
                params![
                    chat_id,
                    message.role.as_str(),
                    message.text,
                    message.rich_text,
                    created_at,
                    raw_json,
                    message.kind.as_str(),
                ],
            )?;
        }
        written += 1;
    }
    Ok(written)
}

/// Advance the source's watermark, never backwards. Runs inside the
/// conversation's transaction so a crash cannot separate data from cursor.
fn advance_watermark_tx(tx: &Transaction, source: &str, updated_at: &str) -> Result<()> {
    tx.execute(
        r#"INSERT INTO sync_state (source, watermark) VALUES (?1, ?2)
           ON CONFLICT(source) DO UPDATE SET watermark = excluded.watermark
           WHERE excluded.watermark > COALESCE(sync_state.watermark, '')"#,
        params![source, updated_at],
    )?;
    Ok(())
}

fn parse_stored_ts(s: &str) -> Option<DateTime<Utc>> {
    crate::model::parse_rfc3339(s)
}

fn map_chat_row(row: &rusqlite::Row) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        mode: row.get(3)?,
        source: row.get(4)?,
        created_at: row.get(5)?,
        last_updated_at: row.get(6)?,
        messages_count: row.get(7)?,
        workspace_hash: row.get(8)?,
        workspace_path: row.get(9)?,
    })
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug)]
pub struct ChatRow {
    pub id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub mode: String,
    pub source: String,
    pub created_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub messages_count: i64,
    pub workspace_hash: Option<String>,
    pub workspace_path: Option<String>,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub role: String,
    pub text: String,
    pub rich_text: Option<String>,
    pub created_at: Option<String>,
    pub native_msg_id: Option<String>,
    pub message_type: String,
}

#[derive(Debug)]
pub struct ChatDetail {
    pub chat: ChatRow,
    pub messages: Vec<MessageRow>,
    pub files: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug)]
pub struct SearchHit {
    pub chat_id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub mode: String,
    pub source: String,
    pub created_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub messages_count: i64,
    pub workspace_hash: Option<String>,
    pub workspace_path: Option<String>,
    pub snippet: String,
}

#[derive(Debug)]
pub struct WorkspaceRow {
    pub id: i64,
    pub workspace_hash: String,
    pub folder_uri: Option<String>,
    pub resolved_path: Option<String>,
    pub first_seen_at: Option<String>,
    pub last_seen_at: Option<String>,
    pub chat_count: i64,
}

/// Filter for [`ArchiveStore::list_chats`].
#[derive(Debug, Clone)]
pub struct ChatFilter {
    pub workspace_hash: Option<String>,
    pub mode: Option<String>,
    pub source: Option<String>,
    pub tag: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub empty: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ChatFilter {
    fn default() -> Self {
        Self {
            workspace_hash: None,
            mode: None,
            source: None,
            tag: None,
            since: None,
            until: None,
            empty: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ChatMode, MessageRole, MessageType, ResolvedConversation, ResolvedMessage, SourceKind,
        WorkspaceRef,
    };
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn message(role: MessageRole, text: &str, native_id: Option<&str>) -> ResolvedMessage {
        ResolvedMessage {
            role,
            text: text.to_string(),
            rich_text: None,
            native_id: native_id.map(String::from),
            raw_payload: None,
            created_at: Some(ts(1, 9)),
            kind: MessageType::Response,
        }
    }

    fn conversation(external_id: &str, updated: DateTime<Utc>) -> ResolvedConversation {
        ResolvedConversation {
            external_id: external_id.to_string(),
            title: Some("Fix the flaky test".to_string()),
            mode: ChatMode::Agent,
            created_at: Some(ts(1, 8)),
            updated_at: Some(updated),
            workspace: Some(WorkspaceRef {
                hash: "ws-1".to_string(),
                folder_uri: Some("file:///home/dev/proj".to_string()),
                resolved_path: Some("/home/dev/proj".to_string()),
            }),
            source: SourceKind::Cursor,
            messages: vec![
                message(MessageRole::User, "the test flakes on CI", Some("m1")),
                message(MessageRole::Assistant, "it races on the tempdir", Some("m2")),
            ],
            files: vec!["tests/io.rs".to_string()],
        }
    }

    #[test]
    fn full_reingestion_is_idempotent() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let conv = conversation("conv-1", ts(1, 10));

        let first = store.commit_conversation(&conv, false).unwrap();
        assert!(first.created);
        let second = store.commit_conversation(&conv, false).unwrap();
        assert!(second.updated);

        assert_eq!(store.count_chats().unwrap(), 1);
        assert_eq!(store.count_messages().unwrap(), 2);
        store.check_index().unwrap();

        let detail = store.get_chat(first.chat_id).unwrap().unwrap();
        assert_eq!(detail.chat.messages_count, 2);
        assert_eq!(detail.files, vec!["tests/io.rs"]);
    }

    #[test]
    fn unkeyed_messages_do_not_duplicate_across_passes() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let mut conv = conversation("conv-1", ts(1, 10));
        conv.messages = vec![
            message(MessageRole::User, "no native id here", None),
            message(MessageRole::Assistant, "me neither", None),
        ];

        store.commit_conversation(&conv, false).unwrap();
        store.commit_conversation(&conv, false).unwrap();
        assert_eq!(store.count_messages().unwrap(), 2);
        store.check_index().unwrap();
    }

    #[test]
    fn message_upsert_by_native_id() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let mut conv = conversation("conv-1", ts(1, 10));
        conv.messages = vec![message(MessageRole::Assistant, "partial", Some("x"))];
        let outcome = store.commit_conversation(&conv, false).unwrap();

        conv.updated_at = Some(ts(1, 11));
        conv.messages = vec![message(MessageRole::Assistant, "final", Some("x"))];
        store.commit_conversation(&conv, false).unwrap();

        let detail = store.get_chat(outcome.chat_id).unwrap().unwrap();
        assert_eq!(detail.messages.len(), 1);
        assert_eq!(detail.messages[0].text, "final");

        // The index reflects the update, not the stale text.
        assert_eq!(store.search_chats("final", 10, 0).unwrap().len(), 1);
        assert!(store.search_chats("partial", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn stale_incoming_record_loses() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let newer = conversation("conv-1", ts(2, 10));
        store.commit_conversation(&newer, false).unwrap();

        let mut stale = conversation("conv-1", ts(1, 10));
        stale.title = Some("Out of date title".to_string());
        let outcome = store.commit_conversation(&stale, false).unwrap();
        assert!(!outcome.updated);

        let chat_id = store.get_chat_id_by_external("conv-1").unwrap().unwrap();
        let detail = store.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(detail.chat.title.as_deref(), Some("Fix the flaky test"));
        assert_eq!(store.count_chats().unwrap(), 1);
    }

    #[test]
    fn workspace_is_created_lazily_and_relinked() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let conv = conversation("conv-1", ts(1, 10));
        store.commit_conversation(&conv, false).unwrap();

        let workspaces = store.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].workspace_hash, "ws-1");
        assert!(workspaces[0].first_seen_at.is_some());

        // Source now reports a different workspace: link is overwritten.
        let mut moved = conversation("conv-1", ts(1, 11));
        moved.workspace = Some(WorkspaceRef {
            hash: "ws-2".to_string(),
            folder_uri: None,
            resolved_path: None,
        });
        store.commit_conversation(&moved, false).unwrap();

        let chat_id = store.get_chat_id_by_external("conv-1").unwrap().unwrap();
        let detail = store.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(detail.chat.workspace_hash.as_deref(), Some("ws-2"));
        assert_eq!(store.list_workspaces().unwrap().len(), 2);
    }

    #[test]
    fn cascade_delete_clears_messages_and_index() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let conv = conversation("conv-1", ts(1, 10));
        let outcome = store.commit_conversation(&conv, false).unwrap();
        store.add_tags(outcome.chat_id, &["topic/tests".to_string()]).unwrap();

        assert_eq!(store.search_chats("flakes", 10, 0).unwrap().len(), 1);

        store.delete_chat(outcome.chat_id).unwrap();
        assert_eq!(store.count_chats().unwrap(), 0);
        assert_eq!(store.count_messages().unwrap(), 0);
        store.check_index().unwrap();
        assert!(store.search_chats("flakes", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn watermark_advances_only_forward() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        store
            .commit_conversation(&conversation("a", ts(2, 0)), true)
            .unwrap();
        store
            .commit_conversation(&conversation("b", ts(1, 0)), true)
            .unwrap();

        let watermark = store.watermark("cursor").unwrap().unwrap();
        assert_eq!(watermark, ts(2, 0));
    }

    #[test]
    fn empty_conversation_round_trips() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let mut conv = conversation("abandoned", ts(1, 10));
        conv.messages = vec![];
        conv.files = vec![];
        let outcome = store.commit_conversation(&conv, false).unwrap();

        let detail = store.get_chat(outcome.chat_id).unwrap().unwrap();
        assert_eq!(detail.chat.messages_count, 0);
        assert!(detail.messages.is_empty());

        // And it is purgeable on request.
        assert_eq!(store.delete_empty_chats().unwrap(), 1);
        assert_eq!(store.count_chats().unwrap(), 0);
    }

    #[test]
    fn list_chats_filters() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        store
            .commit_conversation(&conversation("one", ts(1, 10)), false)
            .unwrap();
        let mut other = conversation("two", ts(3, 10));
        other.mode = ChatMode::Chat;
        other.workspace = None;
        store.commit_conversation(&other, false).unwrap();

        let agents = store
            .list_chats(&ChatFilter {
                mode: Some("agent".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].external_id, "one");

        let in_workspace = store
            .list_chats(&ChatFilter {
                workspace_hash: Some("ws-1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(in_workspace.len(), 1);

        let recent = store
            .list_chats(&ChatFilter {
                since: Some(ts(2, 0).to_rfc3339()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].external_id, "two");
    }

    #[test]
    fn tags_are_normalized_and_set_like() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        let outcome = store
            .commit_conversation(&conversation("c", ts(1, 10)), false)
            .unwrap();

        let added = store
            .add_tags(
                outcome.chat_id,
                &["Topic / Rust".to_string(), "topic/rust".to_string()],
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.all_tags().unwrap(), vec![("topic/rust".to_string(), 1)]);

        let tagged = store
            .list_chats(&ChatFilter {
                tag: Some("topic/rust".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
    }

    #[test]
    fn malformed_fts_query_returns_empty() {
        let mut store = ArchiveStore::open_in_memory().unwrap();
        store
            .commit_conversation(&conversation("c", ts(1, 10)), false)
            .unwrap();
        assert!(store.search_chats("\"unbalanced", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn additive_migration_is_idempotent_on_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("archive.db");
        {
            let mut store = ArchiveStore::open(&path).unwrap();
            store
                .commit_conversation(&conversation("c", ts(1, 10)), false)
                .unwrap();
        }
        // Reopening re-runs the schema batch and every ensure_column step.
        let store = ArchiveStore::open(&path).unwrap();
        assert_eq!(store.count_chats().unwrap(), 1);
    }

    #[test]
    fn migration_adds_missing_columns_to_old_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("old.db");
        {
            // A database from before message_type/messages_count existed.
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"CREATE TABLE chats (
                       id INTEGER PRIMARY KEY,
                       external_id TEXT NOT NULL UNIQUE,
                       workspace_id INTEGER,
                       title TEXT,
                       mode TEXT NOT NULL DEFAULT 'chat',
                       created_at TEXT,
                       last_updated_at TEXT,
                       source TEXT NOT NULL DEFAULT 'cursor'
                   );
                   CREATE TABLE messages (
                       id INTEGER PRIMARY KEY,
                       chat_id INTEGER NOT NULL,
                       role TEXT NOT NULL,
                       text TEXT NOT NULL DEFAULT '',
                       rich_text TEXT,
                       created_at TEXT,
                       native_msg_id TEXT
                   );"#,
            )
            .unwrap();
        }

        let mut store = ArchiveStore::open(&path).unwrap();
        store
            .commit_conversation(&conversation("c", ts(1, 10)), false)
            .unwrap();
        let chat_id = store.get_chat_id_by_external("c").unwrap().unwrap();
        let detail = store.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(detail.messages[0].message_type, "response");
    }

    #[test]
    fn migration_rejects_incompatible_column_type() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.db");
        {
            // Full base shape, but messages_count was created with the
            // wrong type by some other tool.
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"CREATE TABLE chats (
                       id INTEGER PRIMARY KEY,
                       external_id TEXT NOT NULL UNIQUE,
                       workspace_id INTEGER,
                       title TEXT,
                       mode TEXT NOT NULL DEFAULT 'chat',
                       created_at TEXT,
                       last_updated_at TEXT,
                       source TEXT NOT NULL DEFAULT 'cursor',
                       messages_count TEXT
                   )"#,
            )
            .unwrap();
        }

        let err = ArchiveStore::open(&path).unwrap_err();
        let store_err = err.downcast_ref::<StoreError>().unwrap();
        assert!(matches!(store_err, StoreError::SchemaMismatch { .. }));
    }
}
