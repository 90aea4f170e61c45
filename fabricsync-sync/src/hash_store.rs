//! Content-hash index: SHA-256 of every file written through the
//! [`DirectoryManager`](crate::directory::DirectoryManager).
//!
//! Persists an [`IndexFile`] at `<root>/.fabricsync/index.json` with the
//! same atomic `.tmp` + rename pattern used for every metadata file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};

pub const METADATA_DIR: &str = ".fabricsync";

/// Relative path (forward slashes) -> SHA-256 hex of the bytes on disk.
pub type HashIndex = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexFile {
    pub updated_at: DateTime<Utc>,
    pub files: HashIndex,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            files: HashIndex::new(),
        }
    }
}

pub fn index_path_at(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join("index.json")
}

/// Load the index, or an empty one if none has been written yet.
pub fn load_at(root: &Path) -> Result<IndexFile, SyncError> {
    let path = index_path_at(root);
    if !path.exists() {
        return Ok(IndexFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn save_at(root: &Path, index: &IndexFile) -> Result<(), SyncError> {
    let path = index_path_at(root);
    let json = serde_json::to_string_pretty(index)?;
    write_atomic(&path, json.as_bytes())
}

/// Write `bytes` to a `.tmp` sibling and rename it over `path`.
///
/// The tmp file is removed if the rename fails, so `path` is either the old
/// content or the new content, never a truncated mix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.fabricsync.tmp", path.display()))
}
