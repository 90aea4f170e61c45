use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fabricsync_core::{
    AlertStatus, BackoffConfig, ConflictStatus, ConnectionState, EngineConfig, FabricConfig,
    FabricHealth, FabricId, GitRepository, RepositoryId, ResolutionAction, ResourceKey,
    ResourceKind, ResourceState, SyncDirection, SyncOperationOutcome, SyncStatus,
};
use fabricsync_manifest::{parse_documents, parse_managed, Resource};
use fabricsync_sync::{
    ClusterApi, FileChange, GitRemote, LocalRemote, MemoryCluster, RemoteTree, ReportOnlyPolicy,
    SyncEngine, SyncError,
};
use tempfile::TempDir;

const TWO_VPCS: &str = r#"
apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: a
spec:
  subnets:
    default:
      subnet: 10.0.1.0/24
      vlan: 1001
---
apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: b
spec:
  subnets:
    default:
      subnet: 10.0.2.0/24
      vlan: 1002
"#;

fn vpc_text(name: &str, subnet: &str, vlan: u16) -> String {
    format!(
        "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: {name}\nspec:\n  subnets:\n    default:\n      subnet: {subnet}\n      vlan: {vlan}\n"
    )
}

fn vpc(name: &str, subnet: &str, vlan: u16) -> Resource {
    parse_documents(&vpc_text(name, subnet, vlan))
        .remove(0)
        .expect("valid vpc")
}

fn vpc_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Vpc, "default", name)
}

fn fast_settings() -> EngineConfig {
    EngineConfig {
        retry: BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_attempts: 2,
        },
        ..EngineConfig::default()
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    repository: GitRepository,
    git: Arc<LocalRemote>,
    cluster: MemoryCluster,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("fabric");
        let repository = GitRepository {
            id: RepositoryId::from("fabrics"),
            url: "https://git.example.com/fabrics.git".into(),
            branch: "main".into(),
            path_prefix: "dc1".into(),
            push_enabled: true,
            author_name: "fabricsync".into(),
            author_email: "fabricsync@example.com".into(),
            credential_ref: None,
        };
        let git = Arc::new(LocalRemote::new(tmp.path().join("remote"), &repository));
        Self {
            _tmp: tmp,
            root,
            repository,
            git,
            cluster: MemoryCluster::new(),
        }
    }

    fn fabric(&self, direction: SyncDirection) -> FabricConfig {
        FabricConfig {
            id: FabricId::from("dc1"),
            name: "dc1".into(),
            repository: self.repository.id.clone(),
            root: self.root.clone(),
            sync_interval_secs: 60,
            sync_enabled: true,
            sync_direction: direction,
        }
    }

    fn engine(&self, direction: SyncDirection) -> SyncEngine {
        self.engine_with_git(direction, self.git.clone())
    }

    fn engine_with_git(&self, direction: SyncDirection, git: Arc<dyn GitRemote>) -> SyncEngine {
        SyncEngine::open(
            self.fabric(direction),
            self.repository.clone(),
            fast_settings(),
            git,
            Arc::new(self.cluster.clone()),
        )
        .expect("open engine")
    }

    fn drop_raw(&self, name: &str, text: &str) {
        let raw = self.root.join("raw");
        fs::create_dir_all(&raw).expect("raw dir");
        fs::write(raw.join(name), text).expect("write raw");
    }

    fn managed(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.managed_path())
    }

    /// Commit a change straight to the remote, as another writer would.
    async fn push_remote(&self, change: FileChange) {
        let head = self.git.head().expect("head");
        self.git
            .push(head.as_deref(), &[change], "out-of-band edit")
            .await
            .expect("remote push");
    }

    async fn cluster_hash(&self, key: &ResourceKey) -> Option<String> {
        self.cluster
            .get(key)
            .await
            .expect("cluster get")
            .map(|o| o.hash)
    }
}

async fn synced_pair(h: &Harness, direction: SyncDirection) -> SyncEngine {
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let mut engine = h.engine(direction);
    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    engine
}

fn state_of(engine: &SyncEngine, name: &str) -> ResourceState {
    engine
        .records()
        .get(&vpc_key(name))
        .expect("record present")
        .state
}

#[tokio::test]
async fn ingest_leaves_drafts_and_run_syncs_everything() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let mut engine = h.engine(SyncDirection::GitToCluster);

    let report = engine.ingest().expect("ingest");
    assert_eq!(report.documents.len(), 2);
    assert!(report.rejected.is_empty());
    assert_eq!(state_of(&engine, "a"), ResourceState::Draft);
    assert_eq!(state_of(&engine, "b"), ResourceState::Draft);
    assert!(!h.root.join("raw/vpcs.yaml").exists());
    assert!(h.managed(&vpc_key("a")).exists());

    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.pushed, 2);
    assert_eq!(op.counters.applied, 2);
    assert!(op.commit.is_some());
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
    assert_eq!(state_of(&engine, "b"), ResourceState::Synced);
    assert_eq!(h.git.log().expect("log").len(), 1);
    assert_eq!(h.cluster.len(), 2);

    let record = engine.records().get(&vpc_key("a")).expect("a");
    assert!(record.hashes_agree());

    let status = engine.status();
    assert_eq!(status.health, FabricHealth::Healthy);
    assert_eq!(status.sync, SyncStatus::Synced);
}

#[tokio::test]
async fn undecodable_raw_file_is_rejected_without_blocking_sync() {
    let h = Harness::new();
    h.drop_raw("a-good.yaml", &vpc_text("a", "10.0.1.0/24", 1001));
    fs::write(h.root.join("raw").join("b-bad.yaml"), [0xff, 0xfe, 0x00]).expect("write bad");
    let mut engine = h.engine(SyncDirection::GitToCluster);

    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.rejected, 1);
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
    assert!(!h.root.join("raw").join("b-bad.yaml").exists());

    let op = engine.run().await.expect("second run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.rejected, 0);
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
}

#[tokio::test]
async fn undecodable_managed_file_is_skipped() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let stray = h.managed(&vpc_key("zz"));
    fs::write(&stray, [0xff, 0xfe, 0x00]).expect("write stray");

    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.rejected, 1);
    assert!(engine.records().get(&vpc_key("zz")).is_none());
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
}

#[tokio::test]
async fn second_run_without_changes_is_a_no_op() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let writes = engine.directory().writes();
    let head = h.git.head().expect("head");
    let applies = h.cluster.apply_count();

    let op = engine.run().await.expect("second run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.pushed, 0);
    assert_eq!(op.counters.applied, 0);
    assert_eq!(op.counters.transitions, 0);
    assert!(op.commit.is_none());
    assert_eq!(engine.directory().writes(), writes);
    assert_eq!(h.git.head().expect("head"), head);
    assert_eq!(h.cluster.apply_count(), applies);
}

#[tokio::test]
async fn reingesting_identical_content_changes_nothing() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let head = h.git.head().expect("head");

    h.drop_raw("again.yaml", TWO_VPCS);
    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.files_processed, 1);
    assert_eq!(op.counters.created, 0);
    assert_eq!(op.counters.updated, 0);
    assert_eq!(op.counters.transitions, 0);
    assert_eq!(h.git.head().expect("head"), head);
}

#[tokio::test]
async fn resource_deleted_from_cluster_is_reapplied() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let b = vpc_key("b");

    h.cluster.remove(&b).expect("b was applied");
    let op = engine.run().await.expect("run");

    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.drifted_in_cluster, 1);
    assert_eq!(op.counters.applied, 1);
    assert!(h.cluster.contains(&b));
    assert_eq!(state_of(&engine, "b"), ResourceState::Synced);
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);

    let id = engine.records().get(&b).expect("b").id;
    let states: Vec<ResourceState> = engine
        .records()
        .history(Some(id))
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert!(states.ends_with(&[ResourceState::Drifted, ResourceState::Synced]));
}

#[tokio::test]
async fn report_only_policy_leaves_drift_in_place() {
    let h = Harness::new();
    synced_pair(&h, SyncDirection::GitToCluster).await;
    let mut engine = h
        .engine(SyncDirection::GitToCluster)
        .with_policy(ReportOnlyPolicy);

    let edited = vpc("a", "10.0.7.0/24", 1007);
    let edited_hash = edited.content_hash();
    h.cluster.insert(edited);

    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.drifted_in_cluster, 1);
    assert_eq!(op.counters.applied, 0);
    assert_eq!(state_of(&engine, "a"), ResourceState::Drifted);
    assert_eq!(h.cluster_hash(&vpc_key("a")).await, Some(edited_hash));
    assert!(engine.records().alerts(true).is_empty());
    assert_eq!(engine.status().health, FabricHealth::Degraded);

    // Still drifted, still no churn.
    let op = engine.run().await.expect("second run");
    assert_eq!(op.counters.transitions, 0);
    assert_eq!(state_of(&engine, "a"), ResourceState::Drifted);
}

#[tokio::test]
async fn git_edit_is_applied_under_git_to_cluster() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let a = vpc_key("a");
    let edited = vpc("a", "10.0.5.0/24", 1005);

    h.push_remote(FileChange::Write {
        path: a.managed_path(),
        content: vpc_text("a", "10.0.5.0/24", 1005),
    })
    .await;

    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.drifted_in_git, 1);
    assert_eq!(op.counters.pushed, 0);
    assert_eq!(h.cluster_hash(&a).await, Some(edited.content_hash()));

    let record = engine.records().get(&a).expect("a");
    assert_eq!(record.state, ResourceState::Synced);
    assert_eq!(record.content_hash, edited.content_hash());

    let local = fs::read_to_string(h.managed(&a)).expect("managed file");
    let (on_disk, _) = parse_managed(&local).expect("parse managed");
    assert_eq!(on_disk.content_hash(), edited.content_hash());
}

#[tokio::test]
async fn cluster_edit_is_pushed_under_cluster_to_git() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::ClusterToGit).await;
    let a = vpc_key("a");
    let edited = vpc("a", "10.0.6.0/24", 1006);
    let edited_hash = edited.content_hash();
    h.cluster.insert(edited);

    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.pushed, 1);
    assert_eq!(h.git.log().expect("log").len(), 2);

    let text = h
        .git
        .read(&a.managed_path())
        .await
        .expect("read")
        .expect("file in git");
    let (in_git, provenance) = parse_managed(&text).expect("parse");
    assert_eq!(in_git.content_hash(), edited_hash);
    assert!(provenance.is_some());

    let record = engine.records().get(&a).expect("a");
    assert_eq!(record.state, ResourceState::Synced);
    assert_eq!(record.content_hash, edited_hash);
}

#[tokio::test]
async fn git_deletion_retires_resource_under_git_to_cluster() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let b = vpc_key("b");

    h.push_remote(FileChange::Delete {
        path: b.managed_path(),
    })
    .await;

    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.deleted, 1);
    assert!(!h.cluster.contains(&b));
    assert!(engine.records().get(&b).is_none());
    assert!(!h.managed(&b).exists());

    let tombstoned = engine
        .records()
        .list_all()
        .into_iter()
        .find(|r| r.key == b)
        .expect("tombstoned record kept");
    assert!(tombstoned.is_tombstoned());
    assert_eq!(tombstoned.state, ResourceState::Orphaned);
}

#[tokio::test]
async fn both_sides_diverging_raises_a_single_alert() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::Bidirectional).await;
    let a = vpc_key("a");

    h.push_remote(FileChange::Write {
        path: a.managed_path(),
        content: vpc_text("a", "10.0.9.0/24", 1009),
    })
    .await;
    let cluster_side = vpc("a", "10.0.8.0/24", 1008);
    let cluster_hash = cluster_side.content_hash();
    h.cluster.insert(cluster_side);
    let applies = h.cluster.apply_count();
    let commits = h.git.log().expect("log").len();

    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.conflicts, 1);
    let op = engine.run().await.expect("second run");
    assert_eq!(op.counters.conflicts, 1);

    let alerts = engine.records().alerts(true);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].keys, vec![a.clone()]);
    assert_eq!(alerts[0].suggested_actions[0], ResolutionAction::AcceptGit);
    assert!(alerts[0].reason.contains("both git and cluster diverged"));

    let record = engine.records().get(&a).expect("a");
    assert_eq!(record.state, ResourceState::Drifted);
    assert_eq!(record.conflict_status, ConflictStatus::Detected);
    let details = record.conflict.expect("conflict details");
    assert!(details.diff.contains("10.0.9.0/24"));
    assert!(details.diff.contains("10.0.8.0/24"));

    // Nothing was applied or pushed for the conflicting resource.
    assert_eq!(h.cluster.apply_count(), applies);
    assert_eq!(h.git.log().expect("log").len(), commits);
    assert_eq!(h.cluster_hash(&a).await, Some(cluster_hash));
}

#[tokio::test]
async fn accept_git_resolution_applies_git_content_and_closes_alert() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::Bidirectional).await;
    let a = vpc_key("a");
    let git_side = vpc("a", "10.0.9.0/24", 1009);

    h.push_remote(FileChange::Write {
        path: a.managed_path(),
        content: vpc_text("a", "10.0.9.0/24", 1009),
    })
    .await;
    h.cluster.insert(vpc("a", "10.0.8.0/24", 1008));
    engine.run().await.expect("run");

    let alert = engine.records().alerts(true).remove(0);
    engine
        .resolve_alert(alert.id, ResolutionAction::AcceptGit)
        .await
        .expect("resolve");

    let closed = engine.records().alert(alert.id).expect("alert");
    assert_eq!(closed.status, AlertStatus::Resolved);
    assert_eq!(closed.action_taken, Some(ResolutionAction::AcceptGit));
    assert_eq!(h.cluster_hash(&a).await, Some(git_side.content_hash()));

    let record = engine.records().get(&a).expect("a");
    assert_eq!(record.state, ResourceState::Synced);
    assert_eq!(record.conflict_status, ConflictStatus::Resolved);
    assert_eq!(record.content_hash, git_side.content_hash());

    let err = engine
        .resolve_alert(alert.id, ResolutionAction::Dismiss)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlertClosed(_)));

    // Resolved: the next run is quiet.
    let op = engine.run().await.expect("run after resolve");
    assert_eq!(op.counters.conflicts, 0);
    assert!(engine.records().alerts(true).is_empty());
}

/// Pulls and reads through to the local remote; pushes fail while `reject` is set.
struct GatedRemote {
    inner: Arc<LocalRemote>,
    reject: AtomicBool,
}

#[async_trait]
impl GitRemote for GatedRemote {
    async fn pull(&self) -> Result<RemoteTree, SyncError> {
        self.inner.pull().await
    }

    async fn read(&self, path: &Path) -> Result<Option<String>, SyncError> {
        self.inner.read(path).await
    }

    async fn push(
        &self,
        base: Option<&str>,
        changes: &[FileChange],
        message: &str,
    ) -> Result<String, SyncError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SyncError::GitAuth("push rejected".into()));
        }
        self.inner.push(base, changes, message).await
    }
}

#[tokio::test]
async fn accept_cluster_leaves_local_state_alone_when_push_fails() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let gated = Arc::new(GatedRemote {
        inner: h.git.clone(),
        reject: AtomicBool::new(false),
    });
    let mut engine = h.engine_with_git(SyncDirection::Bidirectional, gated.clone());
    engine.run().await.expect("initial run");
    let a = vpc_key("a");

    h.push_remote(FileChange::Write {
        path: a.managed_path(),
        content: vpc_text("a", "10.0.9.0/24", 1009),
    })
    .await;
    let cluster_side = vpc("a", "10.0.8.0/24", 1008);
    h.cluster.insert(cluster_side.clone());
    engine.run().await.expect("conflicting run");

    let alert = engine.records().alerts(true).remove(0);
    let before = engine.records().get(&a).expect("a");
    let local_before = fs::read_to_string(h.managed(&a)).expect("managed file");
    let commits = h.git.log().expect("log").len();

    gated.reject.store(true, Ordering::SeqCst);
    let err = engine
        .resolve_alert(alert.id, ResolutionAction::AcceptCluster)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::GitAuth(_)));

    let after = engine.records().get(&a).expect("a");
    assert_eq!(after.content_hash, before.content_hash);
    assert_eq!(after.conflict_status, ConflictStatus::Detected);
    assert_eq!(fs::read_to_string(h.managed(&a)).expect("managed file"), local_before);
    assert!(engine.records().alert(alert.id).expect("alert").is_open());
    assert_eq!(h.git.log().expect("log").len(), commits);
    assert_eq!(h.cluster_hash(&a).await, Some(cluster_side.content_hash()));

    gated.reject.store(false, Ordering::SeqCst);
    engine
        .resolve_alert(alert.id, ResolutionAction::AcceptCluster)
        .await
        .expect("resolve once git accepts");
    let record = engine.records().get(&a).expect("a");
    assert_eq!(record.content_hash, cluster_side.content_hash());
    assert_eq!(record.state, ResourceState::Synced);
    assert_eq!(h.git.log().expect("log").len(), commits + 1);
}

/// Advances the remote once, between our pull and our push.
struct RacingRemote {
    inner: Arc<LocalRemote>,
    raced: AtomicBool,
}

#[async_trait]
impl GitRemote for RacingRemote {
    async fn pull(&self) -> Result<RemoteTree, SyncError> {
        let tree = self.inner.pull().await?;
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner
                .push(
                    tree.head.as_deref(),
                    &[FileChange::Write {
                        path: PathBuf::from("notes/README.md"),
                        content: "someone else was here\n".into(),
                    }],
                    "concurrent commit",
                )
                .await?;
        }
        Ok(tree)
    }

    async fn read(&self, path: &Path) -> Result<Option<String>, SyncError> {
        self.inner.read(path).await
    }

    async fn push(
        &self,
        base: Option<&str>,
        changes: &[FileChange],
        message: &str,
    ) -> Result<String, SyncError> {
        self.inner.push(base, changes, message).await
    }
}

#[tokio::test]
async fn remote_advancing_mid_run_aborts_the_push_atomically() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let racing = Arc::new(RacingRemote {
        inner: h.git.clone(),
        raced: AtomicBool::new(false),
    });
    let mut engine = h.engine_with_git(SyncDirection::GitToCluster, racing);

    let op = engine.run().await.expect("run");
    assert!(matches!(op.outcome, Some(SyncOperationOutcome::Partial(_))));
    assert!(op.commit.is_none());
    assert_eq!(h.git.log().expect("log").len(), 1, "only the concurrent commit");
    assert!(h.cluster.is_empty());
    assert_eq!(state_of(&engine, "a"), ResourceState::Draft);
    assert_eq!(state_of(&engine, "b"), ResourceState::Draft);

    let op = engine.run().await.expect("retry");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(h.git.log().expect("log").len(), 2);
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
}

struct RejectingRemote;

#[async_trait]
impl GitRemote for RejectingRemote {
    async fn pull(&self) -> Result<RemoteTree, SyncError> {
        Err(SyncError::GitAuth("token rejected".into()))
    }

    async fn read(&self, _path: &Path) -> Result<Option<String>, SyncError> {
        Err(SyncError::GitAuth("token rejected".into()))
    }

    async fn push(
        &self,
        _base: Option<&str>,
        _changes: &[FileChange],
        _message: &str,
    ) -> Result<String, SyncError> {
        Err(SyncError::GitAuth("token rejected".into()))
    }
}

#[tokio::test]
async fn git_auth_failure_skips_reconciliation_but_keeps_ingest() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let mut engine = h.engine_with_git(SyncDirection::GitToCluster, Arc::new(RejectingRemote));

    let op = engine.run().await.expect("run");
    assert!(matches!(op.outcome, Some(SyncOperationOutcome::Skipped(_))));
    assert_eq!(op.counters.created, 2);
    assert_eq!(state_of(&engine, "a"), ResourceState::Draft);
    assert!(h.cluster.is_empty());

    let status = engine.status();
    assert!(matches!(status.connection.git, ConnectionState::AuthFailed(_)));
    assert_eq!(status.health, FabricHealth::Unhealthy);
    assert_eq!(status.sync, SyncStatus::Unknown);
}

#[tokio::test]
async fn unreachable_cluster_pushes_drafts_then_catches_up() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    h.cluster.set_unreachable(true);
    let mut engine = h.engine(SyncDirection::GitToCluster);

    let op = engine.run().await.expect("run");
    assert!(matches!(op.outcome, Some(SyncOperationOutcome::Partial(_))));
    assert_eq!(op.counters.pushed, 2);
    assert_eq!(state_of(&engine, "a"), ResourceState::Committed);
    assert!(matches!(
        engine.status().connection.cluster,
        ConnectionState::Unreachable(_)
    ));

    h.cluster.set_unreachable(false);
    let op = engine.run().await.expect("recovery run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.pushed, 0);
    assert_eq!(op.counters.applied, 2);
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
    assert_eq!(engine.status().connection.cluster, ConnectionState::Healthy);
}

#[tokio::test]
async fn push_disabled_holds_changes_locally() {
    let mut h = Harness::new();
    h.repository.push_enabled = false;
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let mut engine = h.engine(SyncDirection::GitToCluster);

    let op = engine.run().await.expect("run");
    assert!(matches!(op.outcome, Some(SyncOperationOutcome::Partial(_))));
    assert!(h.git.log().expect("log").is_empty());
    assert!(h.cluster.is_empty());
    assert_eq!(state_of(&engine, "a"), ResourceState::Draft);
}

#[tokio::test]
async fn cancelled_run_is_recorded_and_leaves_raw_files() {
    let h = Harness::new();
    h.drop_raw("vpcs.yaml", TWO_VPCS);
    let mut engine = h.engine(SyncDirection::GitToCluster);
    engine.cancel_flag().cancel();

    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Cancelled));
    assert!(h.root.join("raw/vpcs.yaml").exists());
    assert_eq!(
        engine.records().last_operation().expect("op").outcome,
        Some(SyncOperationOutcome::Cancelled)
    );
}

#[tokio::test]
async fn local_managed_edit_is_pushed_and_applied() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let a = vpc_key("a");
    let edited = vpc("a", "10.0.4.0/24", 1004);
    fs::write(h.managed(&a), vpc_text("a", "10.0.4.0/24", 1004)).expect("edit");

    let diff = engine.diff().await.expect("diff");
    assert_eq!(diff.diffs.len(), 1);
    assert_eq!(diff.diffs[0].path, a.managed_path());
    assert!(diff.diffs[0].unified_diff.contains("10.0.4.0/24"));

    let op = engine.run().await.expect("run");
    assert_eq!(op.counters.updated, 1);
    assert_eq!(op.counters.pushed, 1);
    assert_eq!(h.cluster_hash(&a).await, Some(edited.content_hash()));
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
    assert!(engine.diff().await.expect("diff").diffs.is_empty());
}

#[tokio::test]
async fn resources_only_in_git_are_adopted() {
    let h = Harness::new();
    let c = vpc_key("c");
    h.push_remote(FileChange::Write {
        path: c.managed_path(),
        content: vpc_text("c", "10.0.3.0/24", 1003),
    })
    .await;

    let mut engine = h.engine(SyncDirection::GitToCluster);
    let op = engine.run().await.expect("run");
    assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    assert_eq!(op.counters.created, 1);
    assert_eq!(op.counters.pushed, 0);
    assert!(h.cluster.contains(&c));
    assert!(h.managed(&c).exists());
    assert_eq!(state_of(&engine, "c"), ResourceState::Synced);
}

#[tokio::test]
async fn purge_refuses_live_resources() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;
    let id = engine.records().get(&vpc_key("a")).expect("a").id;

    let err = engine.purge(id).unwrap_err();
    assert!(matches!(err, SyncError::NotOrphaned(_)));
    assert_eq!(state_of(&engine, "a"), ResourceState::Synced);
}

#[tokio::test]
async fn delete_fabric_tombstones_all_records() {
    let h = Harness::new();
    let mut engine = synced_pair(&h, SyncDirection::GitToCluster).await;

    let removed = engine.delete_fabric().expect("delete");
    assert_eq!(removed, 2);
    assert!(engine.records().list().is_empty());
    assert!(engine
        .records()
        .list_all()
        .iter()
        .all(|r| r.is_tombstoned()));
}
