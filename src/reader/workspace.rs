//! Reader for per-workspace editor state databases.
//!
//! Each workspace lives under `workspaceStorage/<hash>/` with a `state.vscdb`
//! key-value database (ItemTable) and a `workspace.json` carrying the folder
//! URI. The directory name is the workspace hash.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

use super::cell_to_json;

/// Raw per-workspace metadata, loosely typed.
#[derive(Debug, Clone)]
pub struct WorkspaceRecord {
    pub hash: String,
    pub folder_uri: Option<String>,
    /// The workspace's conversation index (`composer.composerData` key),
    /// listing the conversation ids opened in this workspace.
    pub conversation_index: Option<Value>,
}

impl WorkspaceRecord {
    /// Conversation ids referenced by this workspace's index.
    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids = vec![];
        if let Some(index) = &self.conversation_index {
            if let Some(all) = index.get("allComposers").and_then(|v| v.as_array()) {
                for entry in all {
                    if let Some(id) = entry.get("composerId").and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        ids
    }
}

pub struct WorkspaceStateReader {
    storage_root: PathBuf,
}

impl WorkspaceStateReader {
    pub fn new(custom_root: Option<PathBuf>) -> Self {
        let storage_root =
            custom_root.unwrap_or_else(|| super::editor_user_dir().join("workspaceStorage"));
        Self { storage_root }
    }

    pub fn is_available(&self) -> bool {
        self.storage_root.exists()
    }

    /// Enumerate workspace hashes that have a state database.
    pub fn list_workspace_hashes(&self) -> Result<Vec<String>> {
        let mut hashes = vec![];

        if !self.is_available() {
            return Ok(hashes);
        }

        for entry in std::fs::read_dir(&self.storage_root)
            .with_context(|| format!("reading workspace storage {}", self.storage_root.display()))?
        {
            let dir = entry?.path();
            if dir.is_dir() && dir.join("state.vscdb").exists() {
                if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                    hashes.push(name.to_string());
                }
            }
        }

        Ok(hashes)
    }

    /// Read one workspace's metadata. A workspace whose database cannot be
    /// opened is reported as absent, not as an error; a single unreadable
    /// store must not abort enumeration of the others.
    pub fn read_workspace(&self, hash: &str) -> Result<Option<WorkspaceRecord>> {
        let workspace_dir = self.storage_root.join(hash);
        let db_path = workspace_dir.join("state.vscdb");
        if !db_path.exists() {
            return Ok(None);
        }

        let conn =
            match Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(workspace = hash, error = %e, "skipping unreadable workspace store");
                    return Ok(None);
                }
            };

        let conversation_index = self.read_item(&conn, "composer.composerData", hash);

        // workspace.json sits beside the database and maps the hash back to
        // a folder URI.
        let folder_uri = std::fs::read_to_string(workspace_dir.join("workspace.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<Value>(&content).ok())
            .and_then(|v| v.get("folder").and_then(|f| f.as_str()).map(String::from));

        Ok(Some(WorkspaceRecord {
            hash: hash.to_string(),
            folder_uri,
            conversation_index,
        }))
    }

    fn read_item(&self, conn: &Connection, key: &str, hash: &str) -> Option<Value> {
        let result = conn.query_row(
            "SELECT value FROM ItemTable WHERE key = ?",
            [key],
            |row| {
                let parsed = cell_to_json(row.get_ref(0)?);
                Ok(parsed)
            },
        );

        match result {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(workspace = hash, key, "unparseable value in workspace store");
                None
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                warn!(workspace = hash, key, error = %e, "error reading workspace store");
                None
            }
        }
    }
}
