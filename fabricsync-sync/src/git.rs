//! Git Sync Client.
//!
//! The engine needs three capabilities from a Git host: read the tree at the
//! fabric's path prefix, read one file, and write a change set as a single
//! commit guarded by a fast-forward check. [`GitRemote`] is that seam;
//! [`LocalRemote`] implements it over a plain directory with a JSON commit
//! journal, which is what tests and single-host deployments use.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use fabricsync_core::GitRepository;
use fabricsync_manifest::hash_bytes;

use crate::directory::decode_text;
use crate::error::{io_err, SyncError};
use crate::hash_store::write_atomic;

/// The remote tree under the fabric's path prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTree {
    /// Commit the tree was read at; `None` for an empty repository.
    pub head: Option<String>,
    /// Path relative to the prefix -> SHA-256 of the file bytes.
    pub files: BTreeMap<PathBuf, String>,
}

impl RemoteTree {
    pub fn blob(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

/// One entry of a commit's change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FileChange {
    Write { path: PathBuf, content: String },
    /// Tombstone: remove the file.
    Delete { path: PathBuf },
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Write { path, .. } | FileChange::Delete { path } => path,
        }
    }
}

#[async_trait]
pub trait GitRemote: Send + Sync {
    /// Current tree scoped to the fabric's path prefix.
    async fn pull(&self) -> Result<RemoteTree, SyncError>;

    /// Read one file at the current head. `None` if absent.
    async fn read(&self, path: &Path) -> Result<Option<String>, SyncError>;

    /// Commit `changes` on top of `base` as one commit and return its id.
    ///
    /// Fails with [`SyncError::GitConflict`] without applying anything if the
    /// remote head is no longer `base`.
    async fn push(
        &self,
        base: Option<&str>,
        changes: &[FileChange],
        message: &str,
    ) -> Result<String, SyncError>;
}

// ---------------------------------------------------------------------------
// LocalRemote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JournalChange {
    path: PathBuf,
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob: Option<String>,
}

/// A commit in the journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub branch: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub at: DateTime<Utc>,
    changes: Vec<JournalChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Journal {
    #[serde(default)]
    head: Option<String>,
    #[serde(default)]
    commits: Vec<CommitRecord>,
}

/// Directory-backed Git remote.
///
/// Layout: `<dir>/tree/<path_prefix>/...` holds the files at head and
/// `<dir>/journal.json` the commit history. Several fabrics sharing one
/// repository use the same `dir` with different prefixes.
#[derive(Debug)]
pub struct LocalRemote {
    dir: PathBuf,
    prefix: PathBuf,
    branch: String,
    author_name: String,
    author_email: String,
    lock: Mutex<()>,
}

impl LocalRemote {
    pub fn new(dir: impl Into<PathBuf>, repository: &GitRepository) -> Self {
        Self {
            dir: dir.into(),
            prefix: PathBuf::from(repository.path_prefix.trim_matches('/')),
            branch: repository.branch.clone(),
            author_name: repository.author_name.clone(),
            author_email: repository.author_email.clone(),
            lock: Mutex::new(()),
        }
    }

    fn tree_root(&self) -> PathBuf {
        self.dir.join("tree").join(&self.prefix)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join("journal.json")
    }

    fn load_journal(&self) -> Result<Journal, SyncError> {
        let path = self.journal_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Journal::default()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn file_path(&self, rel: &Path) -> Result<PathBuf, SyncError> {
        if rel.as_os_str().is_empty()
            || !rel.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(SyncError::PathEscapesRoot(rel.to_path_buf()));
        }
        Ok(self.tree_root().join(rel))
    }

    /// Commits in order, oldest first.
    pub fn log(&self) -> Result<Vec<CommitRecord>, SyncError> {
        Ok(self.load_journal()?.commits)
    }

    pub fn head(&self) -> Result<Option<String>, SyncError> {
        Ok(self.load_journal()?.head)
    }

    fn apply_changes(&self, changes: &[FileChange], targets: &[PathBuf]) -> Result<Vec<JournalChange>, SyncError> {
        let mut recorded = Vec::with_capacity(changes.len());
        for (change, target) in changes.iter().zip(targets) {
            match change {
                FileChange::Write { path, content } => {
                    write_atomic(target, content.as_bytes())?;
                    recorded.push(JournalChange {
                        path: self.prefix.join(path),
                        op: "write".into(),
                        blob: Some(hash_bytes(content.as_bytes())),
                    });
                }
                FileChange::Delete { path } => {
                    match std::fs::remove_file(target) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(io_err(target, e)),
                    }
                    recorded.push(JournalChange {
                        path: self.prefix.join(path),
                        op: "delete".into(),
                        blob: None,
                    });
                }
            }
        }
        Ok(recorded)
    }

    fn walk(&self, dir: &Path, base: &Path, out: &mut BTreeMap<PathBuf, String>) -> Result<(), SyncError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, base, out)?;
            } else if !path.to_string_lossy().ends_with(".fabricsync.tmp") {
                let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
                if let Ok(rel) = path.strip_prefix(base) {
                    out.insert(rel.to_path_buf(), hash_bytes(&bytes));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GitRemote for LocalRemote {
    async fn pull(&self) -> Result<RemoteTree, SyncError> {
        let _guard = self.lock.lock();
        let journal = self.load_journal()?;
        let root = self.tree_root();
        let mut files = BTreeMap::new();
        self.walk(&root, &root, &mut files)?;
        debug!(head = ?journal.head, files = files.len(), "pulled local remote");
        Ok(RemoteTree {
            head: journal.head,
            files,
        })
    }

    async fn read(&self, path: &Path) -> Result<Option<String>, SyncError> {
        let full = self.file_path(path)?;
        match std::fs::read(&full) {
            Ok(bytes) => decode_text(path, bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&full, e)),
        }
    }

    async fn push(
        &self,
        base: Option<&str>,
        changes: &[FileChange],
        message: &str,
    ) -> Result<String, SyncError> {
        let _guard = self.lock.lock();
        let mut journal = self.load_journal()?;
        if journal.head.as_deref() != base {
            return Err(SyncError::GitConflict {
                expected: base.map(str::to_string),
                found: journal.head.clone(),
            });
        }

        // Validate every path before touching the tree.
        let targets = changes
            .iter()
            .map(|c| self.file_path(c.path()))
            .collect::<Result<Vec<_>, _>>()?;

        // Prior content of every target, put back if any later step fails.
        let prior = targets
            .iter()
            .map(|target| match std::fs::read(target) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(io_err(target, e)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = commit_id(base, changes);
        let committed = self
            .apply_changes(changes, &targets)
            .and_then(|recorded| {
                journal.commits.push(CommitRecord {
                    id: id.clone(),
                    parent: base.map(str::to_string),
                    branch: self.branch.clone(),
                    message: message.to_string(),
                    author_name: self.author_name.clone(),
                    author_email: self.author_email.clone(),
                    at: Utc::now(),
                    changes: recorded,
                });
                journal.head = Some(id.clone());
                let json = serde_json::to_string_pretty(&journal)?;
                write_atomic(&self.journal_path(), json.as_bytes())
            });
        if let Err(err) = committed {
            restore(&targets, &prior);
            return Err(err);
        }

        info!(commit = %id, changes = changes.len(), branch = %self.branch, "committed");
        Ok(id)
    }
}

/// Put every target back to its content before a failed push. Runs in
/// reverse so a path touched twice ends at its original bytes.
fn restore(targets: &[PathBuf], prior: &[Option<Vec<u8>>]) {
    for (target, before) in targets.iter().zip(prior).rev() {
        let result = match before {
            Some(bytes) => write_atomic(target, bytes),
            None => match std::fs::remove_file(target) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(io_err(target, e)),
                _ => Ok(()),
            },
        };
        if let Err(err) = result {
            warn!(path = %target.display(), "could not roll back failed push: {err}");
        }
    }
}

/// Deterministic commit id: SHA-256 over the parent and the change set.
pub fn commit_id(parent: Option<&str>, changes: &[FileChange]) -> String {
    let mut h = Sha256::new();
    h.update(parent.unwrap_or("").as_bytes());
    for change in changes {
        h.update(b"\0");
        match change {
            FileChange::Write { path, content } => {
                h.update(b"write\0");
                h.update(path.to_string_lossy().as_bytes());
                h.update(b"\0");
                h.update(content.as_bytes());
            }
            FileChange::Delete { path } => {
                h.update(b"delete\0");
                h.update(path.to_string_lossy().as_bytes());
            }
        }
    }
    hex::encode(h.finalize())
}

/// Commit message for a sync run: a summary line plus one line per file.
pub fn commit_message(fabric: &str, changes: &[FileChange]) -> String {
    let mut msg = format!("fabricsync: sync fabric {fabric} ({} change(s))\n", changes.len());
    let mut lines: Vec<String> = changes
        .iter()
        .map(|c| match c {
            FileChange::Write { path, .. } => format!("update {}", path.display()),
            FileChange::Delete { path } => format!("delete {}", path.display()),
        })
        .collect();
    lines.sort();
    if !lines.is_empty() {
        msg.push('\n');
        for line in lines {
            msg.push_str(&line);
            msg.push('\n');
        }
    }
    msg
}
