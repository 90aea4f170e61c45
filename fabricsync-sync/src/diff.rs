//! Unified diffs: conflict details and the dry-run fabric diff.

use std::path::{Path, PathBuf};

use similar::TextDiff;

use fabricsync_manifest::parse_managed;

use crate::directory::{DirectoryManager, MANAGED_DIR};
use crate::error::SyncError;
use crate::git::{GitRemote, RemoteTree};

/// A single managed file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// What a sync would push for one fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFabricResult {
    pub fabric: String,
    pub diffs: Vec<FileDiff>,
}

/// Unified diff between two canonical documents; absent sides diff as empty.
pub fn unified(old: Option<&str>, new: Option<&str>, old_header: &str, new_header: &str) -> String {
    let old = normalize_line_endings(old.unwrap_or(""));
    let new = normalize_line_endings(new.unwrap_or(""));
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(old_header, new_header)
        .context_radius(3)
        .to_string()
}

/// Conflict diff from Git's content to the cluster's content.
pub fn conflict_diff(path: &Path, git: Option<&str>, cluster: Option<&str>) -> String {
    unified(
        git,
        cluster,
        &format!("git/{}", path.display()),
        &format!("cluster/{}", path.display()),
    )
}

/// Compare each local managed file against the remote tree, without writing.
///
/// Both sides are reduced to canonical form first, so provenance timestamps
/// never show up as changes.
pub async fn diff_fabric(
    fabric: &str,
    dir: &DirectoryManager,
    git: &dyn GitRemote,
) -> Result<DiffFabricResult, SyncError> {
    let tree = git.pull().await?;
    let mut diffs = Vec::new();

    for path in dir.list(Path::new(MANAGED_DIR))? {
        let local_text = match dir.read_to_string(&path) {
            Ok(Some(text)) => text,
            Ok(None) | Err(SyncError::NotText(_)) => continue,
            Err(err) => return Err(err),
        };
        let local_hash = fabricsync_manifest::hash_bytes(local_text.as_bytes());
        if tree.blob(&path) == Some(local_hash.as_str()) {
            continue;
        }
        let local = canonical_or_raw(&local_text);
        let remote = match remote_text(git, &tree, &path).await? {
            Some(text) => Some(canonical_or_raw(&text)),
            None => None,
        };
        if remote.as_deref() == Some(local.as_str()) {
            continue;
        }
        diffs.push(FileDiff {
            unified_diff: unified(
                remote.as_deref(),
                Some(&local),
                &format!("a/{}", path.display()),
                &format!("b/{}", path.display()),
            ),
            path,
        });
    }

    Ok(DiffFabricResult {
        fabric: fabric.to_string(),
        diffs,
    })
}

async fn remote_text(
    git: &dyn GitRemote,
    tree: &RemoteTree,
    path: &Path,
) -> Result<Option<String>, SyncError> {
    if tree.blob(path).is_none() {
        return Ok(None);
    }
    git.read(path).await
}

fn canonical_or_raw(text: &str) -> String {
    parse_managed(text)
        .ok()
        .and_then(|(resource, _)| resource.to_canonical_yaml().ok())
        .unwrap_or_else(|| normalize_line_endings(text))
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
