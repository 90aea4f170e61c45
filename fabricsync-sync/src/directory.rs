//! Directory Manager: the only writer of a fabric's working tree.
//!
//! Every path is relative to the fabric root and must consist of plain
//! components; absolute paths, `..` and prefixes are rejected before any I/O.
//! Writes are hash-gated: writing identical bytes to an indexed path is a
//! no-op, which keeps file mtimes and provenance timestamps stable.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use fabricsync_manifest::hash_bytes;

use crate::error::{io_err, SyncError};
use crate::hash_store::{self, write_atomic, IndexFile, METADATA_DIR};

pub const RAW_DIR: &str = "raw";
pub const MANAGED_DIR: &str = "managed";

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written { path: PathBuf },
    /// Content matched the indexed hash and the file was left alone.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

#[derive(Debug)]
pub struct DirectoryManager {
    root: PathBuf,
    index: IndexFile,
    writes: usize,
}

impl DirectoryManager {
    /// Open (and lay out, if needed) the tree rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        for dir in [RAW_DIR, MANAGED_DIR, METADATA_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        }
        let index = hash_store::load_at(&root)?;
        Ok(Self {
            root,
            index,
            writes: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files written (not skipped) since this manager was opened.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Map a relative path into the root, rejecting anything that escapes it.
    pub fn resolve(&self, rel: &Path) -> Result<PathBuf, SyncError> {
        if rel.as_os_str().is_empty() {
            return Err(SyncError::PathEscapesRoot(rel.to_path_buf()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(SyncError::PathEscapesRoot(rel.to_path_buf())),
            }
        }
        Ok(self.root.join(rel))
    }

    pub fn read(&self, rel: &Path) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.resolve(rel)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Read a file as text. Bytes that are not UTF-8 give
    /// [`SyncError::NotText`] so callers can reject the one file.
    pub fn read_to_string(&self, rel: &Path) -> Result<Option<String>, SyncError> {
        self.read(rel)?.map(|bytes| decode_text(rel, bytes)).transpose()
    }

    /// Atomically write `bytes` and record their hash in the index.
    pub fn write(&mut self, rel: &Path, bytes: &[u8]) -> Result<WriteResult, SyncError> {
        let path = self.resolve(rel)?;
        let key = index_key(rel);
        let digest = hash_bytes(bytes);

        if self.index.files.get(&key) == Some(&digest) && path.exists() {
            debug!(path = %rel.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: rel.to_path_buf(),
            });
        }

        write_atomic(&path, bytes)?;
        self.index.files.insert(key, digest);
        self.save_index()?;
        self.writes += 1;
        debug!(path = %rel.display(), "wrote");
        Ok(WriteResult::Written {
            path: rel.to_path_buf(),
        })
    }

    /// Append one line to a log file, rewriting it atomically.
    pub fn append_line(&mut self, rel: &Path, line: &str) -> Result<(), SyncError> {
        let mut text = self.read_to_string(rel)?.unwrap_or_default();
        text.push_str(line);
        text.push('\n');
        self.write(rel, text.as_bytes()).map(|_| ())
    }

    /// Rename `src` to `dst`, creating parent directories as needed.
    pub fn move_file(&mut self, src: &Path, dst: &Path) -> Result<(), SyncError> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::rename(&from, &to).map_err(|e| io_err(&from, e))?;

        let digest = match self.index.files.remove(&index_key(src)) {
            Some(digest) => digest,
            None => {
                let bytes = std::fs::read(&to).map_err(|e| io_err(&to, e))?;
                hash_bytes(&bytes)
            }
        };
        self.index.files.insert(index_key(dst), digest);
        self.save_index()?;
        info!(from = %src.display(), to = %dst.display(), "moved");
        Ok(())
    }

    /// Delete a file. Returns `false` if it did not exist.
    pub fn delete(&mut self, rel: &Path) -> Result<bool, SyncError> {
        let path = self.resolve(rel)?;
        let existed = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(io_err(&path, e)),
        };
        if self.index.files.remove(&index_key(rel)).is_some() {
            self.save_index()?;
        }
        if existed {
            info!(path = %rel.display(), "deleted");
        }
        Ok(existed)
    }

    /// Every file under `prefix`, relative to the root, sorted.
    ///
    /// Leftover `.fabricsync.tmp` files from an interrupted write are skipped.
    pub fn list(&self, prefix: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let base = self.resolve(prefix)?;
        let mut out = Vec::new();
        if base.is_dir() {
            self.walk(&base, &mut out)?;
        }
        out.sort();
        Ok(out)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() && !is_tmp(&path) {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(())
    }

    /// Hash recorded at the last write through this manager.
    pub fn indexed_hash(&self, rel: &Path) -> Option<&str> {
        self.index.files.get(&index_key(rel)).map(String::as_str)
    }

    /// Hash of the bytes currently on disk.
    pub fn current_hash(&self, rel: &Path) -> Result<Option<String>, SyncError> {
        Ok(self.read(rel)?.map(|bytes| hash_bytes(&bytes)))
    }

    fn save_index(&mut self) -> Result<(), SyncError> {
        self.index.updated_at = Utc::now();
        hash_store::save_at(&self.root, &self.index)
    }
}

/// Decode file bytes as UTF-8, naming `path` on failure.
pub(crate) fn decode_text(path: &Path, bytes: Vec<u8>) -> Result<String, SyncError> {
    String::from_utf8(bytes).map_err(|_| SyncError::NotText(path.to_path_buf()))
}

fn index_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_tmp(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".fabricsync.tmp")
}
