//! Reader for legacy snapshot JSON files.
//!
//! Old exports were written as `chat_data_<workspace-hash>.json` files with a
//! tabs/bubbles structure. The reader walks a directory tree, picks up files
//! matching the configured pattern, and returns their parsed payloads.

use anyhow::Result;
use glob::Pattern;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

const FILENAME_PREFIX: &str = "chat_data_";

/// One parsed snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    pub path: PathBuf,
    /// Workspace hash recovered from the filename, when present.
    pub workspace_hash: Option<String>,
    pub data: Value,
}

pub struct LegacySnapshotReader {
    root: PathBuf,
    pattern: Pattern,
}

impl LegacySnapshotReader {
    pub fn new(root: PathBuf, pattern: &str) -> Result<Self> {
        Ok(Self {
            root,
            pattern: Pattern::new(pattern)?,
        })
    }

    pub fn is_available(&self) -> bool {
        self.root.exists()
    }

    /// Walk the snapshot directory and parse every matching file. A file
    /// that fails to parse is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<SnapshotFile>> {
        let mut files = vec![];

        if !self.is_available() {
            return Ok(files);
        }

        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !self.pattern.matches(&name) {
                continue;
            }
            match self.read_file(entry.path()) {
                Some(file) => files.push(file),
                None => warn!(path = %entry.path().display(), "skipping unreadable snapshot file"),
            }
        }

        Ok(files)
    }

    fn read_file(&self, path: &Path) -> Option<SnapshotFile> {
        let content = std::fs::read_to_string(path).ok()?;
        let data: Value = serde_json::from_str(&content).ok()?;
        Some(SnapshotFile {
            path: path.to_path_buf(),
            workspace_hash: workspace_hash_from_filename(path),
            data,
        })
    }
}

fn workspace_hash_from_filename(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix(FILENAME_PREFIX))
        .filter(|hash| !hash.is_empty())
        .map(String::from)
}
