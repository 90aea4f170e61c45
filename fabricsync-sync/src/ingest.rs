//! Ingestion pipeline: `raw/` multi-document files into canonical
//! single-document files under `managed/`.
//!
//! Each document is validated on its own; a bad document is reported and
//! skipped while its neighbours are still ingested. Processed raw files are
//! moved to `.fabricsync/archive/` and logged to `.fabricsync/archive.log`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fabricsync_core::{FabricId, ResourceKey};
use fabricsync_manifest::{parse_documents, parse_managed, Provenance, Resource};

use crate::cancel::CancelFlag;
use crate::directory::{DirectoryManager, RAW_DIR};
use crate::error::SyncError;
use crate::hash_store::METADATA_DIR;

/// How a managed file was affected by ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestAction {
    Created,
    Updated,
    Unchanged,
}

/// One accepted document.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub source: PathBuf,
    pub key: ResourceKey,
    pub managed_path: PathBuf,
    pub content_hash: String,
    pub action: IngestAction,
    pub resource: Resource,
}

/// One document rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDocument {
    pub source: PathBuf,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reason: String,
}

/// Result of one ingestion pass over `raw/`.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: Vec<PathBuf>,
    pub documents: Vec<IngestedDocument>,
    pub rejected: Vec<RejectedDocument>,
    pub archived: Vec<PathBuf>,
}

impl IngestReport {
    pub fn count(&self, action: IngestAction) -> usize {
        self.documents.iter().filter(|d| d.action == action).count()
    }

    /// Documents that created or changed a managed file.
    pub fn changed(&self) -> impl Iterator<Item = &IngestedDocument> {
        self.documents
            .iter()
            .filter(|d| d.action != IngestAction::Unchanged)
    }
}

/// A line in `archive.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveEntry {
    source: PathBuf,
    archived_to: PathBuf,
    at: DateTime<Utc>,
    created: Vec<String>,
    updated: Vec<String>,
    unchanged: Vec<String>,
    rejected: Vec<RejectedDocument>,
}

/// Known resources, written to `.fabricsync/manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub resources: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub content_hash: String,
}

pub fn archive_dir() -> PathBuf {
    Path::new(METADATA_DIR).join("archive")
}

pub fn archive_log_path() -> PathBuf {
    Path::new(METADATA_DIR).join("archive.log")
}

pub fn manifest_path() -> PathBuf {
    Path::new(METADATA_DIR).join("manifest.json")
}

/// Ingest every `*.yaml` / `*.yml` file under `raw/`, in name order.
///
/// Later documents for the same kind and name overwrite earlier ones, so the
/// outcome is deterministic for a given set of files.
pub fn ingest_raw(
    dir: &mut DirectoryManager,
    fabric: &FabricId,
    now: DateTime<Utc>,
    cancel: &CancelFlag,
) -> Result<IngestReport, SyncError> {
    let mut report = IngestReport::default();

    for source in dir.list(Path::new(RAW_DIR))? {
        if !is_manifest_file(&source) {
            continue;
        }
        cancel.check()?;
        let text = match dir.read_to_string(&source) {
            Ok(Some(text)) => Some(text),
            Ok(None) => continue,
            Err(err @ SyncError::NotText(_)) => {
                warn!(fabric = %fabric, source = %source.display(), "rejected raw file: {err}");
                None
            }
            Err(err) => return Err(err),
        };

        let mut entry = ArchiveEntry {
            source: source.clone(),
            archived_to: PathBuf::new(),
            at: now,
            created: vec![],
            updated: vec![],
            unchanged: vec![],
            rejected: vec![],
        };

        if text.is_none() {
            let rejected = RejectedDocument {
                source: source.clone(),
                index: 0,
                name: None,
                reason: SyncError::NotText(source.clone()).to_string(),
            };
            entry.rejected.push(rejected.clone());
            report.rejected.push(rejected);
        }

        for result in text.as_deref().map(parse_documents).unwrap_or_default() {
            match result {
                Ok(resource) => {
                    let doc = write_managed(dir, fabric, resource, &source, now)?;
                    let label = doc.key.to_string();
                    match doc.action {
                        IngestAction::Created => entry.created.push(label),
                        IngestAction::Updated => entry.updated.push(label),
                        IngestAction::Unchanged => entry.unchanged.push(label),
                    }
                    report.documents.push(doc);
                }
                Err(err) => {
                    warn!(
                        fabric = %fabric,
                        source = %source.display(),
                        document = err.index,
                        "rejected document: {}",
                        err.error
                    );
                    let rejected = RejectedDocument {
                        source: source.clone(),
                        index: err.index,
                        name: err.name.clone(),
                        reason: err.error.to_string(),
                    };
                    entry.rejected.push(rejected.clone());
                    report.rejected.push(rejected);
                }
            }
        }

        let archived_to = archive_target(dir, &source, now)?;
        dir.move_file(&source, &archived_to)?;
        entry.archived_to = archived_to.clone();
        dir.append_line(&archive_log_path(), &serde_json::to_string(&entry)?)?;

        info!(
            fabric = %fabric,
            source = %source.display(),
            created = entry.created.len(),
            updated = entry.updated.len(),
            rejected = entry.rejected.len(),
            "ingested raw file"
        );
        report.files.push(source);
        report.archived.push(archived_to);
    }

    Ok(report)
}

/// Write `resource` to its managed path unless an identical resource is
/// already there.
///
/// An existing file with the same kind and name is overwritten in place;
/// there is never more than one file per logical resource.
pub fn write_managed(
    dir: &mut DirectoryManager,
    fabric: &FabricId,
    resource: Resource,
    source: &Path,
    now: DateTime<Utc>,
) -> Result<IngestedDocument, SyncError> {
    let key = resource.key();
    let managed_path = key.managed_path();
    let content_hash = resource.content_hash();

    let existing = match dir.read_to_string(&managed_path) {
        Ok(Some(text)) => match parse_managed(&text) {
            Ok((current, provenance)) => Some((current.content_hash(), provenance)),
            Err(err) => {
                warn!(path = %managed_path.display(), "replacing unreadable managed file: {err}");
                None
            }
        },
        Ok(None) => None,
        Err(err @ SyncError::NotText(_)) => {
            warn!(path = %managed_path.display(), "replacing unreadable managed file: {err}");
            None
        }
        Err(err) => return Err(err),
    };

    let action = match &existing {
        Some((hash, _)) if *hash == content_hash => IngestAction::Unchanged,
        Some(_) => IngestAction::Updated,
        None => {
            if dir.read(&managed_path)?.is_some() {
                IngestAction::Updated
            } else {
                IngestAction::Created
            }
        }
    };

    if action != IngestAction::Unchanged {
        let provenance = Provenance::new(fabric.clone(), content_hash.clone(), now);
        let text = resource.render_managed(&provenance)?;
        dir.write(&managed_path, text.as_bytes())?;
        debug!(fabric = %fabric, key = %key, ?action, "managed file written");
    }

    Ok(IngestedDocument {
        source: source.to_path_buf(),
        key,
        managed_path,
        content_hash,
        action,
        resource,
    })
}

/// Rewrite `.fabricsync/manifest.json` from the given entries. A no-op when
/// nothing changed.
pub fn write_manifest<'a, I>(dir: &mut DirectoryManager, entries: I) -> Result<(), SyncError>
where
    I: IntoIterator<Item = (&'a ResourceKey, &'a Path, &'a str)>,
{
    let mut manifest = ManifestFile::default();
    for (key, path, hash) in entries {
        manifest.resources.insert(
            key.to_string(),
            ManifestEntry {
                path: path.to_path_buf(),
                content_hash: hash.to_string(),
            },
        );
    }
    let json = serde_json::to_string_pretty(&manifest)?;
    dir.write(&manifest_path(), json.as_bytes())?;
    Ok(())
}

pub fn read_manifest(dir: &DirectoryManager) -> Result<ManifestFile, SyncError> {
    match dir.read_to_string(&manifest_path())? {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(ManifestFile::default()),
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn archive_target(
    dir: &DirectoryManager,
    source: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, SyncError> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "raw.yaml".to_string());
    let stamp = now.format("%Y%m%dT%H%M%S%3fZ");
    let mut candidate = archive_dir().join(format!("{stamp}-{file_name}"));
    let mut n = 1;
    while dir.read(&candidate)?.is_some() {
        candidate = archive_dir().join(format!("{stamp}-{n}-{file_name}"));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_VPCS: &str = "apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: a
spec:
  subnets:
    default:
      subnet: 10.0.1.0/24
---
apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: b
spec:
  subnets:
    default:
      subnet: 10.0.2.0/24
";

    fn setup() -> (TempDir, DirectoryManager) {
        let tmp = TempDir::new().unwrap();
        let dir = DirectoryManager::open(tmp.path()).unwrap();
        (tmp, dir)
    }

    fn drop_raw(tmp: &TempDir, name: &str, text: &str) {
        std::fs::write(tmp.path().join("raw").join(name), text).unwrap();
    }

    #[test]
    fn splits_into_one_file_per_resource_and_archives_source() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "vpcs.yaml", TWO_VPCS);

        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert_eq!(report.count(IngestAction::Created), 2);
        assert!(tmp.path().join("managed/vpc/a.yaml").exists());
        assert!(tmp.path().join("managed/vpc/b.yaml").exists());
        assert!(!tmp.path().join("raw/vpcs.yaml").exists());
        assert_eq!(report.archived.len(), 1);
        assert!(tmp.path().join(&report.archived[0]).exists());

        let log = std::fs::read_to_string(tmp.path().join(archive_log_path())).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("VPC/default/a"));
    }

    #[test]
    fn reingesting_same_content_is_a_noop() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "vpcs.yaml", TWO_VPCS);
        ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        let before = std::fs::read_to_string(tmp.path().join("managed/vpc/a.yaml")).unwrap();
        let writes = dir.writes();

        drop_raw(&tmp, "again.yaml", TWO_VPCS);
        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert_eq!(report.count(IngestAction::Unchanged), 2);
        assert_eq!(report.changed().count(), 0);
        let after = std::fs::read_to_string(tmp.path().join("managed/vpc/a.yaml")).unwrap();
        assert_eq!(before, after, "provenance timestamps must not move");
        // Only the archive log is rewritten; the raw file is moved, not written.
        assert_eq!(dir.writes(), writes + 1);
    }

    #[test]
    fn same_name_overwrites_instead_of_forking() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "1.yaml", TWO_VPCS);
        drop_raw(
            &tmp,
            "2.yaml",
            &TWO_VPCS.replace("10.0.2.0/24", "10.0.9.0/24"),
        );
        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert_eq!(report.count(IngestAction::Created), 2);
        assert_eq!(report.count(IngestAction::Updated), 1);
        assert_eq!(dir.list(Path::new("managed/vpc")).unwrap().len(), 2);
        let b = std::fs::read_to_string(tmp.path().join("managed/vpc/b.yaml")).unwrap();
        assert!(b.contains("10.0.9.0/24"));
    }

    #[test]
    fn invalid_document_is_reported_and_neighbours_survive() {
        let (tmp, mut dir) = setup();
        let text = format!("{TWO_VPCS}---\nkind: Bogus\napiVersion: x/v1\nmetadata:\n  name: z\n");
        drop_raw(&tmp, "mixed.yaml", &text);
        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert_eq!(report.count(IngestAction::Created), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 2);
        assert_eq!(report.rejected[0].name.as_deref(), Some("z"));
        // Partially valid files are still archived.
        assert_eq!(report.archived.len(), 1);
    }

    #[test]
    fn non_yaml_files_are_left_alone() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "notes.txt", "hello");
        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert!(report.files.is_empty());
        assert!(tmp.path().join("raw/notes.txt").exists());
    }

    #[test]
    fn cancelled_before_first_file() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "vpcs.yaml", TWO_VPCS);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &cancel).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(tmp.path().join("raw/vpcs.yaml").exists());
    }

    #[test]
    fn manifest_write_is_hash_gated() {
        let (_tmp, mut dir) = setup();
        let key = ResourceKey::new(fabricsync_core::ResourceKind::Vpc, "default", "a");
        let path = key.managed_path();
        write_manifest(&mut dir, [(&key, path.as_path(), "h1")]).unwrap();
        let writes = dir.writes();
        write_manifest(&mut dir, [(&key, path.as_path(), "h1")]).unwrap();
        assert_eq!(dir.writes(), writes);
        let manifest = read_manifest(&dir).unwrap();
        assert_eq!(manifest.resources["VPC/default/a"].content_hash, "h1");
    }

    #[test]
    fn non_utf8_raw_file_is_rejected_and_archived() {
        let (tmp, mut dir) = setup();
        drop_raw(&tmp, "a-good.yaml", TWO_VPCS);
        std::fs::write(tmp.path().join("raw/b-bad.yaml"), [0xff, 0xfe, 0x00]).unwrap();

        let report = ingest_raw(&mut dir, &"dc1".into(), Utc::now(), &CancelFlag::new()).unwrap();
        assert_eq!(report.count(IngestAction::Created), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].source, PathBuf::from("raw/b-bad.yaml"));
        assert!(report.rejected[0].reason.contains("UTF-8"));
        assert_eq!(report.archived.len(), 2);
        assert!(dir.list(Path::new(RAW_DIR)).unwrap().is_empty());
    }
}
