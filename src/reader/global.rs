//! Reader for the global editor state database.
//!
//! Full conversation records live in `globalStorage/state.vscdb`, table
//! `cursorDiskKV`, under TEXT keys `composerData:{uuid}`. Split-layout
//! message bodies live under `bubbleId:{conversationId}:{messageId}`.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::cell_to_json;

const CONVERSATION_PREFIX: &str = "composerData:";

/// One raw conversation record as stored, undecoded beyond JSON.
#[derive(Debug, Clone)]
pub struct RawConversation {
    pub id: String,
    pub data: Value,
}

pub struct GlobalStoreReader {
    db_path: PathBuf,
}

impl GlobalStoreReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let db_path = custom_path
            .unwrap_or_else(|| super::editor_user_dir().join("globalStorage/state.vscdb"));
        Self { db_path }
    }

    pub fn is_available(&self) -> bool {
        self.db_path.exists()
    }

    fn open_db(&self) -> Result<Connection> {
        Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .context("Failed to open global state database")
    }

    fn has_kv_table(conn: &Connection) -> bool {
        conn.query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='cursorDiskKV'",
            [],
            |_| Ok(()),
        )
        .is_ok()
    }

    /// Read every conversation record. NULL payloads and unparseable values
    /// are skipped with a warning; they never abort the scan.
    pub fn read_all_conversations(&self) -> Result<Vec<RawConversation>> {
        let mut conversations = vec![];

        if !self.is_available() {
            warn!(path = %self.db_path.display(), "global state database does not exist");
            return Ok(conversations);
        }

        let conn = self.open_db()?;
        if !Self::has_kv_table(&conn) {
            warn!("cursorDiskKV table not found in global state database");
            return Ok(conversations);
        }

        // Range query on the key index: ';' is the ASCII character after
        // ':', so this captures exactly the composerData:* keyspace.
        let mut stmt = conn.prepare(
            "SELECT key, value FROM cursorDiskKV WHERE key >= ? AND key < ?",
        )?;
        let rows = stmt.query_map([CONVERSATION_PREFIX, "composerData;"], |row| {
            let key: String = row.get(0)?;
            let value = cell_to_json(row.get_ref(1)?);
            Ok((key, value))
        })?;

        for row in rows {
            let (key, value) = row?;
            let id = match key.strip_prefix(CONVERSATION_PREFIX) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => continue,
            };
            match value {
                Some(data) => conversations.push(RawConversation { id, data }),
                None => {
                    warn!(conversation = %id, "skipping conversation with NULL or unparseable payload");
                }
            }
        }

        debug!(count = conversations.len(), "read conversations from global store");
        Ok(conversations)
    }

    /// Read one conversation record by id.
    pub fn read_conversation(&self, id: &str) -> Result<Option<RawConversation>> {
        if !self.is_available() {
            return Ok(None);
        }

        let conn = self.open_db()?;
        let key = format!("{CONVERSATION_PREFIX}{id}");
        let result = conn.query_row(
            "SELECT value FROM cursorDiskKV WHERE key = ?",
            [&key],
            |row| Ok(cell_to_json(row.get_ref(0)?)),
        );

        match result {
            Ok(Some(data)) => Ok(Some(RawConversation {
                id: id.to_string(),
                data,
            })),
            Ok(None) => {
                warn!(conversation = id, "conversation payload is NULL or unparseable");
                Ok(None)
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Batch-fetch split-layout message records for one conversation.
    /// Returns only the records that were found; absent ids are simply not
    /// in the map.
    pub fn read_message_records(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<HashMap<String, Value>> {
        let mut records = HashMap::new();

        if !self.is_available() || message_ids.is_empty() {
            return Ok(records);
        }

        let conn = self.open_db()?;
        let keys: Vec<String> = message_ids
            .iter()
            .map(|mid| format!("bubbleId:{conversation_id}:{mid}"))
            .collect();
        let placeholders = vec!["?"; keys.len()].join(",");

        let mut stmt = conn.prepare(&format!(
            "SELECT key, value FROM cursorDiskKV WHERE key IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(keys.iter()), |row| {
            let key: String = row.get(0)?;
            let value = cell_to_json(row.get_ref(1)?);
            Ok((key, value))
        })?;

        for row in rows {
            let (key, value) = row?;
            // Key format: bubbleId:{conversationId}:{messageId}
            let message_id = match key.splitn(3, ':').nth(2) {
                Some(mid) => mid.to_string(),
                None => continue,
            };
            match value {
                Some(data) => {
                    records.insert(message_id, data);
                }
                None => {
                    debug!(conversation = conversation_id, message = %message_id,
                        "message record is NULL or unparseable");
                }
            }
        }

        Ok(records)
    }
}
