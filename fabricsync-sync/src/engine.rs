//! The per-fabric sync engine.
//!
//! One [`SyncEngine::run`] is a single pass of:
//!
//! 1. ingest `raw/` and absorb local edits under `managed/`
//! 2. pull Git and adopt managed files nobody tracks yet
//! 3. read the cluster (and, for `cluster-to-git`, import unknown objects)
//! 4. classify every live record and plan its remedy
//! 5. push all planned Git changes as one commit
//! 6. apply to the cluster and confirm by read-back
//! 7. advance lifecycle states and record the operation
//!
//! A failure isolated to one resource is logged and skipped; storage
//! failures and cancellation end the run. Every run is recorded as a
//! finalized [`SyncOperation`], whatever its outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument};

use fabricsync_core::state::is_allowed;
use fabricsync_core::{
    forward_path, AlertId, ConflictDetails, ConflictStatus, ConnectionState, EngineConfig,
    FabricConfig, FabricStatus, GitRepository, ResolutionAction, ResourceId, ResourceKey,
    ResourceKind, ResourceRecord, ResourceState, SyncCounters, SyncDirection, SyncOperation,
    SyncOperationOutcome, TransitionTrigger,
};
use fabricsync_manifest::{hash_bytes, parse_managed, Provenance, Resource, ValidationError};

use crate::cancel::CancelFlag;
use crate::cluster::{ClusterApi, ClusterObject, RetryingCluster};
use crate::diff::{self, DiffFabricResult};
use crate::directory::{DirectoryManager, MANAGED_DIR};
use crate::drift::{
    alert_score, classify, Classification, DirectionPolicy, Drift, Observation, ReconcilePolicy,
    Remedy, Side,
};
use crate::error::SyncError;
use crate::git::{commit_message, FileChange, GitRemote, RemoteTree};
use crate::ingest::{self, IngestReport, IngestedDocument};
use crate::records::{AlertRequest, NewRecord, RecordStore};

/// Actor recorded on transitions the engine makes by itself.
pub const ENGINE_ACTOR: &str = "fabricsync";
/// Actor recorded on operator-initiated transitions.
pub const OPERATOR_ACTOR: &str = "operator";

/// Git's view of one tracked path.
#[derive(Debug, Clone, Default)]
struct GitSide {
    hash: Option<String>,
    /// Remote text; only loaded when it differs from the local file.
    text: Option<String>,
}

/// Work planned for one resource in this run.
#[derive(Debug)]
struct Plan {
    id: ResourceId,
    key: ResourceKey,
    path: PathBuf,
    trigger: TransitionTrigger,
    /// Desired hash once the plan has been carried out.
    hash: String,
    push: Option<FileChange>,
    /// Text to adopt as desired content once the push lands.
    accept: Option<String>,
    apply: Option<Resource>,
    delete_in_cluster: bool,
    retire: bool,
    git_has: bool,
    cluster_has: bool,
    cluster_hash: Option<String>,
    applied: bool,
    cluster_done: bool,
}

impl Plan {
    fn new(record: &ResourceRecord, cluster_hash: Option<&str>, trigger: TransitionTrigger) -> Self {
        Self {
            id: record.id,
            key: record.key.clone(),
            path: record.managed_path.clone(),
            trigger,
            hash: record.content_hash.clone(),
            push: None,
            accept: None,
            apply: None,
            delete_in_cluster: false,
            retire: false,
            git_has: false,
            cluster_has: cluster_hash == Some(record.content_hash.as_str()),
            cluster_hash: cluster_hash.map(str::to_string),
            applied: false,
            cluster_done: false,
        }
    }
}

pub struct SyncEngine {
    fabric: FabricConfig,
    repository: GitRepository,
    settings: EngineConfig,
    dir: DirectoryManager,
    records: Arc<RecordStore>,
    git: Arc<dyn GitRemote>,
    cluster: Arc<dyn ClusterApi>,
    policy: Box<dyn ReconcilePolicy>,
    cancel: CancelFlag,
}

impl SyncEngine {
    /// Open the engine for `fabric`, creating its directory layout on first
    /// use. Cluster calls are wrapped with the configured timeout and retry
    /// policy.
    pub fn open(
        fabric: FabricConfig,
        repository: GitRepository,
        settings: EngineConfig,
        git: Arc<dyn GitRemote>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, SyncError> {
        let dir = DirectoryManager::open(&fabric.root)?;
        let records = Arc::new(RecordStore::open(&fabric.root, fabric.id.clone())?);
        let cluster: Arc<dyn ClusterApi> = Arc::new(RetryingCluster::new(
            cluster,
            settings.retry.clone(),
            settings.cluster_timeout(),
        ));
        Ok(Self {
            fabric,
            repository,
            settings,
            dir,
            records,
            git,
            cluster,
            policy: Box::new(DirectionPolicy),
            cancel: CancelFlag::new(),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl ReconcilePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn fabric(&self) -> &FabricConfig {
        &self.fabric
    }

    pub fn records(&self) -> Arc<RecordStore> {
        Arc::clone(&self.records)
    }

    pub fn directory(&self) -> &DirectoryManager {
        &self.dir
    }

    /// Handle for cancelling an in-flight run from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn status(&self) -> FabricStatus {
        self.records.status(self.fabric.sync_enabled)
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Ingest `raw/` and local edits under `managed/` without talking to Git
    /// or the cluster. New and changed resources are left in DRAFT.
    pub fn ingest(&mut self) -> Result<IngestReport, SyncError> {
        let mut counters = SyncCounters::default();
        self.ingest_with(&mut counters, Utc::now())
    }

    fn ingest_with(
        &mut self,
        counters: &mut SyncCounters,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, SyncError> {
        let report = ingest::ingest_raw(&mut self.dir, &self.fabric.id, now, &self.cancel)?;
        counters.files_processed += report.files.len();
        counters.rejected += report.rejected.len();
        for rejected in &report.rejected {
            warn!(
                fabric = %self.fabric.id,
                source = %rejected.source.display(),
                index = rejected.index,
                "document rejected: {}",
                rejected.reason
            );
        }
        for doc in &report.documents {
            self.absorb(doc, counters)?;
        }
        self.scan_managed(counters, now)?;
        Ok(report)
    }

    fn absorb(&mut self, doc: &IngestedDocument, counters: &mut SyncCounters) -> Result<(), SyncError> {
        match self.records.get_by_path(&doc.managed_path) {
            Some(record) if record.content_hash == doc.content_hash => Ok(()),
            Some(record) => {
                self.update_desired(&record, &doc.resource, TransitionTrigger::Ingest)?;
                counters.updated += 1;
                Ok(())
            }
            None => {
                self.track(&doc.resource, TransitionTrigger::Ingest)?;
                counters.created += 1;
                Ok(())
            }
        }
    }

    /// Pick up edits made directly under `managed/` since the engine last
    /// wrote there, and restore managed files that went missing.
    fn scan_managed(&mut self, counters: &mut SyncCounters, now: DateTime<Utc>) -> Result<(), SyncError> {
        for record in self.records.list() {
            let path = record.managed_path.clone();
            let text = match self.dir.read_to_string(&path) {
                Ok(text) => text,
                Err(err @ SyncError::NotText(_)) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid managed file: {err}");
                    counters.rejected += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let Some(text) = text else {
                let resource = desired_resource(&record)?;
                self.write_rendered(&path, &resource, now)?;
                info!(fabric = %self.fabric.id, key = %record.key, "restored missing managed file");
                continue;
            };
            if self.dir.indexed_hash(&path) == Some(hash_bytes(text.as_bytes()).as_str()) {
                continue;
            }
            match parse_managed(&text) {
                Ok((resource, _)) if resource.key().managed_path() != path => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "managed file names another resource; ignored");
                    counters.rejected += 1;
                }
                Ok((resource, _)) => {
                    if resource.content_hash() != record.content_hash {
                        debug!(fabric = %self.fabric.id, key = %record.key, "local edit detected");
                        self.write_rendered(&path, &resource, now)?;
                        self.update_desired(&record, &resource, TransitionTrigger::Ingest)?;
                        counters.updated += 1;
                    }
                }
                Err(err) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid managed file: {err}");
                    counters.rejected += 1;
                }
            }
        }

        for path in self.dir.list(Path::new(MANAGED_DIR))? {
            if !is_managed_manifest(&path) || self.records.get_by_path(&path).is_some() {
                continue;
            }
            let text = match self.dir.read_to_string(&path) {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(err @ SyncError::NotText(_)) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid managed file: {err}");
                    counters.rejected += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match parse_managed(&text) {
                Ok((resource, _)) if resource.key().managed_path() == path => {
                    self.track(&resource, TransitionTrigger::Ingest)?;
                    counters.created += 1;
                }
                Ok(_) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "managed file names another resource; ignored");
                    counters.rejected += 1;
                }
                Err(err) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid managed file: {err}");
                    counters.rejected += 1;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run one full sync pass. The returned operation is already finalized
    /// and stored; only storage failures while recording it surface as `Err`.
    pub async fn run(&mut self) -> Result<SyncOperation, SyncError> {
        let id = self.records.next_operation_id();
        let mut op = SyncOperation::start(id, self.fabric.id.clone(), self.fabric.sync_direction);
        let history_before = self.records.history_len();

        let span = info_span!("sync", fabric = %self.fabric.id, op = id.0);
        let result = self.run_steps(&mut op).instrument(span).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(SyncError::Cancelled) => {
                warn!(fabric = %self.fabric.id, "sync cancelled");
                SyncOperationOutcome::Cancelled
            }
            Err(err) => {
                error!(fabric = %self.fabric.id, "sync failed: {err}");
                SyncOperationOutcome::Failed(err.to_string())
            }
        };

        op.counters.transitions = self.records.history_len().saturating_sub(history_before);
        op.finalize(outcome);
        self.records.record_operation(op.clone())?;
        info!(
            fabric = %self.fabric.id,
            outcome = ?op.outcome,
            created = op.counters.created,
            updated = op.counters.updated,
            pushed = op.counters.pushed,
            applied = op.counters.applied,
            conflicts = op.counters.conflicts,
            transitions = op.counters.transitions,
            "sync finished"
        );
        Ok(op)
    }

    async fn run_steps(&mut self, op: &mut SyncOperation) -> Result<SyncOperationOutcome, SyncError> {
        let now = Utc::now();
        self.ingest_with(&mut op.counters, now)?;
        self.cancel.check()?;

        let git = Arc::clone(&self.git);
        let tree = match with_git_timeout(self.settings.git_timeout(), "pull", git.pull()).await {
            Ok(tree) => tree,
            Err(err) => return self.skip_for_git(err),
        };
        self.set_git_state(ConnectionState::Healthy)?;
        self.cancel.check()?;

        let mut skipped = BTreeSet::new();
        let mut git_view = match self.observe_git(&tree, &mut skipped, &mut op.counters).await {
            Ok(view) => view,
            Err(err) if is_git_failure(&err) => return self.skip_for_git(err),
            Err(err) => return Err(err),
        };
        match self.adopt_from_git(&tree, &mut git_view, &mut op.counters).await {
            Ok(()) => {}
            Err(err) if is_git_failure(&err) => return self.skip_for_git(err),
            Err(err) => return Err(err),
        }
        self.cancel.check()?;

        let mut cluster_error = None;
        let cluster_view = match self.observe_cluster(&mut op.counters, now).await {
            Ok(view) => {
                self.set_cluster_state(ConnectionState::Healthy)?;
                Some(view)
            }
            Err(err) if err.is_transient() => {
                warn!(fabric = %self.fabric.id, "cluster unreachable, pushing drafts only: {err}");
                self.set_cluster_state(ConnectionState::Unreachable(err.to_string()))?;
                cluster_error = Some(err.to_string());
                None
            }
            Err(err) => return Err(err),
        };

        // Plan.
        let mut plans = Vec::new();
        for record in self.records.list() {
            if skipped.contains(&record.id) {
                continue;
            }
            self.cancel.check()?;
            let git_side = git_view.get(&record.managed_path).cloned().unwrap_or_default();
            let planned = match &cluster_view {
                Some(view) => {
                    let object = view.get(&record.managed_path).cloned().flatten();
                    self.reconcile(&record, git_side, object, &mut op.counters, now).await
                }
                None => self.plan_push_only(&record, &git_side),
            };
            match planned {
                Ok(Some(plan)) => plans.push(plan),
                Ok(None) => {}
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    warn!(fabric = %self.fabric.id, key = %record.key, "resource skipped: {err}");
                }
            }
        }

        // Push: one commit for the whole run.
        let changes: Vec<FileChange> = plans.iter().filter_map(|p| p.push.clone()).collect();
        let mut push_error = None;
        if !changes.is_empty() {
            self.cancel.check()?;
            if !self.repository.push_enabled {
                info!(fabric = %self.fabric.id, changes = changes.len(), "push disabled; changes held locally");
                push_error = Some(format!("push disabled for repository {}", self.repository.id));
            } else {
                let message = commit_message(&self.fabric.id.0, &changes);
                let pushed = with_git_timeout(
                    self.settings.git_timeout(),
                    "push",
                    git.push(tree.head.as_deref(), &changes, &message),
                )
                .await;
                match pushed {
                    Ok(commit) => {
                        info!(fabric = %self.fabric.id, commit = %commit, changes = changes.len(), "pushed");
                        op.commit = Some(commit);
                        op.counters.pushed = changes.len();
                    }
                    Err(err @ SyncError::GitConflict { .. }) => {
                        warn!(fabric = %self.fabric.id, "remote moved since pull, nothing pushed: {err}");
                        push_error = Some(err.to_string());
                    }
                    Err(err) => {
                        warn!(fabric = %self.fabric.id, "push failed: {err}");
                        self.set_git_state(connection_failure(&err))?;
                        push_error = Some(err.to_string());
                    }
                }
            }
        }
        let pushed = push_error.is_none();

        // Apply.
        let mut cancelled = false;
        for plan in plans.iter_mut() {
            if plan.push.is_some() {
                if !pushed {
                    continue;
                }
                plan.git_has = true;
            }
            if cluster_error.is_some() {
                continue;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.apply_plan(plan, &mut op.counters).await {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    warn!(fabric = %self.fabric.id, key = %plan.key, "cluster unreachable: {err}");
                    self.set_cluster_state(ConnectionState::Unreachable(err.to_string()))?;
                    cluster_error = Some(err.to_string());
                }
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    warn!(fabric = %self.fabric.id, key = %plan.key, "cluster action failed: {err}");
                }
            }
        }

        // Advance states for whatever was carried out.
        for plan in &plans {
            match self.finish_plan(plan, pushed, &mut op.counters) {
                Ok(()) => {}
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    error!(fabric = %self.fabric.id, key = %plan.key, "state update failed: {err}");
                }
            }
        }
        if cancelled {
            return Err(SyncError::Cancelled);
        }

        self.write_manifest()?;

        Ok(match (cluster_error, push_error) {
            (Some(err), _) => SyncOperationOutcome::Partial(format!("cluster unreachable: {err}")),
            (None, Some(err)) => SyncOperationOutcome::Partial(format!("git push not completed: {err}")),
            (None, None) => SyncOperationOutcome::Succeeded,
        })
    }

    fn skip_for_git(&mut self, err: SyncError) -> Result<SyncOperationOutcome, SyncError> {
        warn!(fabric = %self.fabric.id, "git unavailable, reconciliation skipped: {err}");
        self.set_git_state(connection_failure(&err))?;
        self.write_manifest()?;
        Ok(SyncOperationOutcome::Skipped(format!("git unavailable: {err}")))
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    async fn observe_git(
        &mut self,
        tree: &RemoteTree,
        skipped: &mut BTreeSet<ResourceId>,
        counters: &mut SyncCounters,
    ) -> Result<BTreeMap<PathBuf, GitSide>, SyncError> {
        let mut view = BTreeMap::new();
        for record in self.records.list() {
            let path = record.managed_path.clone();
            let Some(blob) = tree.blob(&path) else {
                view.insert(path, GitSide::default());
                continue;
            };

            // Remote blob identical to what we last wrote, and the local file
            // still holds it: Git has the record's content.
            let indexed = self.dir.indexed_hash(&path).map(str::to_string);
            if indexed.as_deref() == Some(blob) && self.dir.current_hash(&path)? == indexed {
                view.insert(
                    path,
                    GitSide {
                        hash: Some(record.content_hash.clone()),
                        text: None,
                    },
                );
                continue;
            }

            let text = match with_git_timeout(self.settings.git_timeout(), "read", self.git.read(&path)).await {
                Ok(text) => text,
                Err(err @ SyncError::NotText(_)) => {
                    warn!(fabric = %self.fabric.id, key = %record.key, "invalid file in git, resource skipped: {err}");
                    counters.rejected += 1;
                    skipped.insert(record.id);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let side = match text {
                None => GitSide::default(),
                Some(text) => match parse_managed(&text) {
                    Ok((resource, _)) => GitSide {
                        hash: Some(resource.content_hash()),
                        text: Some(text),
                    },
                    Err(err) => {
                        warn!(fabric = %self.fabric.id, key = %record.key, "invalid file in git, resource skipped: {err}");
                        counters.rejected += 1;
                        skipped.insert(record.id);
                        continue;
                    }
                },
            };
            view.insert(path, side);
        }
        Ok(view)
    }

    /// Track managed files that exist in Git but not in the Record Store.
    async fn adopt_from_git(
        &mut self,
        tree: &RemoteTree,
        view: &mut BTreeMap<PathBuf, GitSide>,
        counters: &mut SyncCounters,
    ) -> Result<(), SyncError> {
        for path in tree.files.keys() {
            if !is_managed_manifest(path) || self.records.get_by_path(path).is_some() {
                continue;
            }
            self.cancel.check()?;
            let text = match with_git_timeout(self.settings.git_timeout(), "read", self.git.read(path)).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(err @ SyncError::NotText(_)) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid file in git: {err}");
                    counters.rejected += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let resource = match parse_managed(&text) {
                Ok((resource, _)) if resource.key().managed_path() == *path => resource,
                Ok(_) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "git file names another resource; ignored");
                    counters.rejected += 1;
                    continue;
                }
                Err(err) => {
                    warn!(fabric = %self.fabric.id, path = %path.display(), "invalid file in git: {err}");
                    counters.rejected += 1;
                    continue;
                }
            };

            self.dir.write(path, text.as_bytes())?;
            let hash = resource.content_hash();
            let record = self.track(&resource, TransitionTrigger::Ingest)?;
            self.records.upsert(record.id, TransitionTrigger::Sync, ENGINE_ACTOR, |r| {
                r.state = ResourceState::Committed;
                r.git_hash = Some(hash.clone());
            })?;
            view.insert(
                path.clone(),
                GitSide {
                    hash: Some(hash),
                    text: Some(text),
                },
            );
            counters.created += 1;
            info!(fabric = %self.fabric.id, key = %record.key, "adopted resource from git");
        }
        Ok(())
    }

    async fn observe_cluster(
        &mut self,
        counters: &mut SyncCounters,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<PathBuf, Option<ClusterObject>>, SyncError> {
        if self.fabric.sync_direction == SyncDirection::ClusterToGit {
            self.import_from_cluster(counters, now).await?;
        }
        let cluster = Arc::clone(&self.cluster);
        let mut view = BTreeMap::new();
        for record in self.records.list() {
            self.cancel.check()?;
            let object = cluster.get(&record.key).await?;
            view.insert(record.managed_path.clone(), object);
        }
        Ok(view)
    }

    /// Track cluster objects nobody tracks yet. They enter as DRAFT and are
    /// pushed to Git by the same run.
    async fn import_from_cluster(
        &mut self,
        counters: &mut SyncCounters,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let cluster = Arc::clone(&self.cluster);
        for kind in ResourceKind::all() {
            for entry in cluster.list(*kind).await? {
                if self.records.get(&entry.key).is_some() {
                    continue;
                }
                self.cancel.check()?;
                let Some(object) = cluster.get(&entry.key).await? else {
                    continue;
                };
                let resource = match parse_managed(&object.content) {
                    Ok((resource, _)) => resource,
                    Err(err) => {
                        warn!(fabric = %self.fabric.id, key = %entry.key, "unreadable cluster object: {err}");
                        counters.rejected += 1;
                        continue;
                    }
                };
                let doc = ingest::write_managed(
                    &mut self.dir,
                    &self.fabric.id,
                    resource,
                    Path::new("cluster"),
                    now,
                )?;
                self.track(&doc.resource, TransitionTrigger::Ingest)?;
                counters.created += 1;
                info!(fabric = %self.fabric.id, key = %doc.key, "imported resource from cluster");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    async fn reconcile(
        &mut self,
        record: &ResourceRecord,
        git_side: GitSide,
        object: Option<ClusterObject>,
        counters: &mut SyncCounters,
        now: DateTime<Utc>,
    ) -> Result<Option<Plan>, SyncError> {
        let observed_git = git_side.hash.clone();
        let observed_cluster = object.as_ref().map(|o| o.hash.clone());
        let git_hash = observed_git.as_deref();
        let cluster_hash = observed_cluster.as_deref();
        self.note_observation(record, git_hash, cluster_hash)?;

        let obs = Observation {
            state: record.state,
            record: &record.content_hash,
            confirmed: record.confirmed_hash.as_deref(),
            git: git_hash,
            cluster: cluster_hash,
        };
        let class = classify(&obs);
        debug!(fabric = %self.fabric.id, key = %record.key, ?class, "classified");

        let mut plan = Plan::new(record, cluster_hash, TransitionTrigger::Sync);
        match class {
            Classification::InSync => {
                if record.state == ResourceState::Synced
                    && record.confirmed_hash.as_deref() == Some(record.content_hash.as_str())
                {
                    return Ok(None);
                }
                if record.state == ResourceState::Drifted {
                    plan.trigger = TransitionTrigger::Reconcile;
                }
                plan.git_has = true;
                Ok(Some(plan))
            }
            Classification::AwaitingApply => {
                plan.git_has = true;
                plan.apply = Some(desired_resource(record)?);
                Ok(Some(plan))
            }
            Classification::LocalChange => {
                if git_hash == Some(record.content_hash.as_str()) {
                    plan.git_has = true;
                } else {
                    plan.push = Some(FileChange::Write {
                        path: plan.path.clone(),
                        content: self.local_text(record, now)?,
                    });
                }
                if !plan.cluster_has {
                    plan.apply = Some(desired_resource(record)?);
                }
                Ok(Some(plan))
            }
            Classification::LocalConflict | Classification::BothDiverged => {
                counters.conflicts += 1;
                self.escalate(record, &obs, class, git_side, object.as_ref(), now).await?;
                Ok(None)
            }
            Classification::Converged => {
                counters.converged += 1;
                let text = self.git_text(record, git_side).await?;
                let Some(text) = text else {
                    return Ok(None);
                };
                let resource = self.accept_text(record, &text, TransitionTrigger::Reconcile)?;
                plan.hash = resource.content_hash();
                plan.trigger = TransitionTrigger::Reconcile;
                plan.git_has = true;
                plan.cluster_has = true;
                info!(fabric = %self.fabric.id, key = %record.key, "git and cluster converged; content adopted");
                Ok(Some(plan))
            }
            Classification::Orphaned => {
                plan.trigger = TransitionTrigger::Reconcile;
                plan.retire = true;
                Ok(Some(plan))
            }
            Classification::DriftedInGit => {
                counters.drifted_in_git += 1;
                let drift = Drift {
                    side: Side::Git,
                    deleted: git_hash.is_none(),
                };
                self.heal(record, drift, plan, git_side, object, now).await
            }
            Classification::DriftedInCluster => {
                counters.drifted_in_cluster += 1;
                let drift = Drift {
                    side: Side::Cluster,
                    deleted: cluster_hash.is_none(),
                };
                self.heal(record, drift, plan, git_side, object, now).await
            }
        }
    }

    /// With the cluster unreachable only drafts move: they are pushed so Git
    /// catches up, and applied on a later run.
    fn plan_push_only(&mut self, record: &ResourceRecord, git_side: &GitSide) -> Result<Option<Plan>, SyncError> {
        let git_hash = git_side.hash.as_deref();
        if record.git_hash.as_deref() != git_hash {
            self.records.upsert(record.id, TransitionTrigger::Sync, ENGINE_ACTOR, |r| {
                r.git_hash = git_hash.map(str::to_string);
            })?;
        }
        if record.state != ResourceState::Draft {
            return Ok(None);
        }
        let obs = Observation {
            state: record.state,
            record: &record.content_hash,
            confirmed: record.confirmed_hash.as_deref(),
            git: git_hash,
            cluster: None,
        };
        if classify(&obs) != Classification::LocalChange {
            return Ok(None);
        }
        let mut plan = Plan::new(record, record.cluster_hash.as_deref(), TransitionTrigger::Sync);
        if git_hash == Some(record.content_hash.as_str()) {
            plan.git_has = true;
        } else {
            plan.push = Some(FileChange::Write {
                path: plan.path.clone(),
                content: self.local_text(record, Utc::now())?,
            });
        }
        plan.cluster_has = false;
        Ok(Some(plan))
    }

    async fn heal(
        &mut self,
        record: &ResourceRecord,
        drift: Drift,
        mut plan: Plan,
        git_side: GitSide,
        object: Option<ClusterObject>,
        now: DateTime<Utc>,
    ) -> Result<Option<Plan>, SyncError> {
        plan.trigger = TransitionTrigger::Reconcile;
        self.mark_drifted(record, now)?;
        let remedy = self.policy.remedy(self.fabric.sync_direction, drift);
        info!(
            fabric = %self.fabric.id,
            key = %record.key,
            side = ?drift.side,
            deleted = drift.deleted,
            ?remedy,
            "drift detected"
        );

        match remedy {
            Remedy::Report => Ok(None),
            Remedy::RestoreCluster => {
                plan.git_has = plan.git_has || !matches!(drift.side, Side::Git);
                plan.apply = Some(desired_resource(record)?);
                Ok(Some(plan))
            }
            Remedy::RestoreGit => {
                plan.push = Some(FileChange::Write {
                    path: plan.path.clone(),
                    content: self.local_text(record, now)?,
                });
                if !plan.cluster_has {
                    plan.apply = Some(desired_resource(record)?);
                }
                Ok(Some(plan))
            }
            Remedy::AcceptGit => match self.git_text(record, git_side).await? {
                Some(text) => {
                    let resource = self.accept_text(record, &text, TransitionTrigger::Reconcile)?;
                    plan.hash = resource.content_hash();
                    plan.git_has = true;
                    plan.cluster_has = plan.cluster_hash.as_deref() == Some(plan.hash.as_str());
                    if !plan.cluster_has {
                        plan.apply = Some(resource);
                    }
                    Ok(Some(plan))
                }
                None => {
                    plan.retire = true;
                    plan.delete_in_cluster = true;
                    Ok(Some(plan))
                }
            },
            Remedy::AcceptCluster => match object {
                Some(object) => {
                    let (resource, _) = parse_managed(&object.content)?;
                    let text = self.render(&resource, now)?;
                    plan.hash = resource.content_hash();
                    plan.cluster_has = true;
                    plan.push = Some(FileChange::Write {
                        path: plan.path.clone(),
                        content: text.clone(),
                    });
                    plan.accept = Some(text);
                    Ok(Some(plan))
                }
                None => {
                    plan.retire = true;
                    plan.push = Some(FileChange::Delete {
                        path: plan.path.clone(),
                    });
                    Ok(Some(plan))
                }
            },
            Remedy::Retire => {
                plan.retire = true;
                match drift.side {
                    Side::Git => plan.delete_in_cluster = true,
                    Side::Cluster => {
                        plan.push = Some(FileChange::Delete {
                            path: plan.path.clone(),
                        })
                    }
                }
                Ok(Some(plan))
            }
        }
    }

    /// Record a both-sided divergence and raise (or refresh) its alert.
    /// Nothing is applied or pushed for the resource.
    async fn escalate(
        &mut self,
        record: &ResourceRecord,
        obs: &Observation<'_>,
        class: Classification,
        git_side: GitSide,
        object: Option<&ClusterObject>,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let since = record.drift_since.unwrap_or(now);
        let git_hash = git_side.hash.clone();
        let git_canonical = match self.git_text(record, git_side).await? {
            Some(text) => Some(parse_managed(&text)?.0.to_canonical_yaml()?),
            None => None,
        };

        let (diff, cluster_hash) = if class == Classification::LocalConflict {
            let path = record.managed_path.display();
            let diff = diff::unified(
                git_canonical.as_deref(),
                Some(&record.desired),
                &format!("git/{path}"),
                &format!("local/{path}"),
            );
            (diff, obs.cluster.map(str::to_string))
        } else {
            let cluster_text = object.map(|o| o.content.as_str());
            let diff = diff::conflict_diff(&record.managed_path, git_canonical.as_deref(), cluster_text);
            (diff, object.map(|o| o.hash.clone()))
        };

        let detected_at = match &record.conflict {
            Some(existing) if existing.git_hash == git_hash && existing.cluster_hash == cluster_hash => {
                existing.detected_at
            }
            _ => now,
        };
        let details = ConflictDetails {
            record_hash: Some(record.content_hash.clone()),
            git_hash,
            cluster_hash,
            diff,
            detected_at,
        };
        self.records.upsert(record.id, TransitionTrigger::Reconcile, ENGINE_ACTOR, |r| {
            r.conflict_status = ConflictStatus::Detected;
            r.conflict = Some(details);
            r.drift_since = Some(since);
            if is_allowed(r.state, ResourceState::Drifted) {
                r.state = ResourceState::Drifted;
            }
        })?;

        let referrers = self.records.referrers(&record.key).len();
        let score = alert_score(obs, since, now, self.settings.alert_persistence_step_mins, referrers);
        let reason = match class {
            Classification::LocalConflict => "local change while git moved independently".to_string(),
            _ => SyncError::ConflictUnresolvable(record.key.clone()).to_string(),
        };
        let alert = self.records.raise_alert(AlertRequest {
            resource: record.id,
            key: record.key.clone(),
            score,
            reason,
            suggested_actions: self.policy.suggested_actions(self.fabric.sync_direction),
            divergence_since: since,
        })?;
        warn!(
            fabric = %self.fabric.id,
            key = %record.key,
            alert = alert.id.0,
            score,
            priority = ?alert.priority,
            "conflict escalated"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn apply_plan(&self, plan: &mut Plan, counters: &mut SyncCounters) -> Result<(), SyncError> {
        if plan.delete_in_cluster {
            self.cluster.delete(&plan.key).await?;
            plan.cluster_done = true;
        }
        if let Some(resource) = &plan.apply {
            self.cluster.apply(resource).await?;
            counters.applied += 1;
            plan.applied = true;
            let readback = self.cluster.get(&plan.key).await?;
            plan.cluster_hash = readback.map(|o| o.hash);
            plan.cluster_has = plan.cluster_hash.as_deref() == Some(plan.hash.as_str());
            if !plan.cluster_has {
                warn!(fabric = %self.fabric.id, key = %plan.key, "read-back does not match applied content");
            }
        }
        Ok(())
    }

    fn finish_plan(&mut self, plan: &Plan, pushed: bool, counters: &mut SyncCounters) -> Result<(), SyncError> {
        if plan.retire {
            let ready = if plan.push.is_some() {
                pushed
            } else if plan.delete_in_cluster {
                plan.cluster_done
            } else {
                true
            };
            if ready {
                self.retire(plan.id, &plan.path, plan.trigger, ENGINE_ACTOR)?;
                counters.deleted += 1;
                info!(fabric = %self.fabric.id, key = %plan.key, "resource retired");
            }
            return Ok(());
        }

        let git_has = plan.git_has && (plan.push.is_none() || pushed);
        let Some(mut record) = self.records.get_by_id(plan.id) else {
            return Ok(());
        };
        if let Some(text) = &plan.accept {
            if !git_has {
                return Ok(());
            }
            self.accept_text(&record, text, plan.trigger)?;
            record = self.records.get_by_id(plan.id).ok_or(SyncError::UnknownResource(plan.id))?;
        }
        let target = match (git_has, plan.cluster_has, plan.applied) {
            (true, true, _) => ResourceState::Synced,
            (true, false, true) => ResourceState::Pending,
            (true, false, false) => ResourceState::Committed,
            (false, _, _) => return Ok(()),
        };

        let hash = plan.hash.clone();
        let cluster_hash = plan.cluster_hash.clone();
        self.records.upsert(plan.id, plan.trigger, ENGINE_ACTOR, |r| {
            r.git_hash = Some(hash.clone());
            r.cluster_hash = cluster_hash;
        })?;

        for state in forward_path(record.state, target).unwrap_or_default() {
            let confirmed = plan.hash.clone();
            self.records.upsert(plan.id, plan.trigger, ENGINE_ACTOR, |r| {
                r.state = state;
                if state == ResourceState::Synced {
                    r.confirmed_hash = Some(confirmed);
                    r.drift_since = None;
                }
            })?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Execute an operator's resolution for an open alert, then close it.
    pub async fn resolve_alert(&mut self, id: AlertId, action: ResolutionAction) -> Result<(), SyncError> {
        let alert = self.records.alert(id).ok_or(SyncError::UnknownAlert(id))?;
        if !alert.is_open() {
            return Err(SyncError::AlertClosed(id));
        }
        let now = Utc::now();
        let git = Arc::clone(&self.git);
        let tree = with_git_timeout(self.settings.git_timeout(), "pull", git.pull()).await?;

        for resource in &alert.resources {
            let Some(record) = self.records.get_by_id(*resource) else {
                continue;
            };
            if record.is_tombstoned() {
                continue;
            }
            match action {
                ResolutionAction::Dismiss => {
                    self.records.upsert(record.id, TransitionTrigger::Manual, OPERATOR_ACTOR, |r| {
                        r.conflict_status = ConflictStatus::Resolved;
                    })?;
                }
                ResolutionAction::AcceptGit => self.resolve_with_git(&record, &tree).await?,
                ResolutionAction::AcceptCluster => self.resolve_with_cluster(&record, &tree, now).await?,
            }
        }

        self.records.close_alert(id, action)?;
        info!(fabric = %self.fabric.id, alert = id.0, ?action, "alert resolved");
        Ok(())
    }

    async fn resolve_with_git(&mut self, record: &ResourceRecord, tree: &RemoteTree) -> Result<(), SyncError> {
        let text = match tree.blob(&record.managed_path) {
            Some(_) => {
                with_git_timeout(self.settings.git_timeout(), "read", self.git.read(&record.managed_path))
                    .await?
            }
            None => None,
        };
        let Some(text) = text else {
            self.cluster.delete(&record.key).await?;
            self.retire(record.id, &record.managed_path, TransitionTrigger::Manual, OPERATOR_ACTOR)?;
            return Ok(());
        };

        let resource = self.accept_text(record, &text, TransitionTrigger::Manual)?;
        let hash = resource.content_hash();
        self.cluster.apply(&resource).await?;
        let readback = self.cluster.get(&record.key).await?.map(|o| o.hash);
        let target = if readback.as_deref() == Some(hash.as_str()) {
            ResourceState::Synced
        } else {
            ResourceState::Pending
        };
        self.settle(record.id, &hash, Some(hash.clone()), readback, target)
    }

    async fn resolve_with_cluster(
        &mut self,
        record: &ResourceRecord,
        tree: &RemoteTree,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let git = Arc::clone(&self.git);
        let Some(object) = self.cluster.get(&record.key).await? else {
            if tree.blob(&record.managed_path).is_some() {
                let changes = [FileChange::Delete {
                    path: record.managed_path.clone(),
                }];
                let message = commit_message(&self.fabric.id.0, &changes);
                with_git_timeout(
                    self.settings.git_timeout(),
                    "push",
                    git.push(tree.head.as_deref(), &changes, &message),
                )
                .await?;
            }
            self.retire(record.id, &record.managed_path, TransitionTrigger::Manual, OPERATOR_ACTOR)?;
            return Ok(());
        };

        let (resource, _) = parse_managed(&object.content)?;
        let text = self.render(&resource, now)?;
        let changes = [FileChange::Write {
            path: record.managed_path.clone(),
            content: text.clone(),
        }];
        let message = commit_message(&self.fabric.id.0, &changes);
        // Local state only moves once Git has taken the cluster's version.
        with_git_timeout(
            self.settings.git_timeout(),
            "push",
            git.push(tree.head.as_deref(), &changes, &message),
        )
        .await?;
        let resource = self.accept_text(record, &text, TransitionTrigger::Manual)?;
        let hash = resource.content_hash();
        self.settle(record.id, &hash, Some(hash.clone()), Some(object.hash), ResourceState::Synced)
    }

    /// Store the resolved hashes, clear the conflict and walk the record
    /// forward to `target`.
    fn settle(
        &mut self,
        id: ResourceId,
        hash: &str,
        git_hash: Option<String>,
        cluster_hash: Option<String>,
        target: ResourceState,
    ) -> Result<(), SyncError> {
        let record = self.records.upsert(id, TransitionTrigger::Manual, OPERATOR_ACTOR, |r| {
            r.git_hash = git_hash;
            r.cluster_hash = cluster_hash;
            r.conflict_status = ConflictStatus::Resolved;
        })?;
        for state in forward_path(record.state, target).unwrap_or_default() {
            self.records.upsert(id, TransitionTrigger::Manual, OPERATOR_ACTOR, |r| {
                r.state = state;
                if state == ResourceState::Synced {
                    r.confirmed_hash = Some(hash.to_string());
                    r.drift_since = None;
                }
            })?;
        }
        Ok(())
    }

    /// Stop tracking a resource that is gone from both Git and the cluster.
    pub fn purge(&mut self, id: ResourceId) -> Result<(), SyncError> {
        let record = self.records.get_by_id(id).ok_or(SyncError::UnknownResource(id))?;
        if record.is_tombstoned() {
            return Ok(());
        }
        let absent = record.git_hash.is_none() && record.cluster_hash.is_none();
        if record.state != ResourceState::Orphaned && !absent {
            return Err(SyncError::NotOrphaned(record.key));
        }
        self.retire(id, &record.managed_path, TransitionTrigger::Manual, OPERATOR_ACTOR)?;
        info!(fabric = %self.fabric.id, key = %record.key, "resource purged");
        Ok(())
    }

    /// Tombstone every live record and dismiss open alerts. Callers cancel
    /// any in-flight run first through [`Self::cancel_flag`].
    pub fn delete_fabric(&mut self) -> Result<usize, SyncError> {
        for alert in self.records.alerts(true) {
            self.records.close_alert(alert.id, ResolutionAction::Dismiss)?;
        }
        let mut count = 0;
        for record in self.records.list() {
            self.records.tombstone(record.id, TransitionTrigger::Manual, OPERATOR_ACTOR)?;
            count += 1;
        }
        info!(fabric = %self.fabric.id, resources = count, "fabric deleted");
        Ok(count)
    }

    /// What a push would change in Git, without writing anything.
    pub async fn diff(&self) -> Result<DiffFabricResult, SyncError> {
        with_git_timeout(
            self.settings.git_timeout(),
            "diff",
            diff::diff_fabric(&self.fabric.id.0, &self.dir, self.git.as_ref()),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn track(&mut self, resource: &Resource, trigger: TransitionTrigger) -> Result<ResourceRecord, SyncError> {
        self.records.create(
            NewRecord {
                key: resource.key(),
                desired: resource.to_canonical_yaml()?,
                content_hash: resource.content_hash(),
                sync_direction: self.fabric.sync_direction,
                references: resource.references(),
            },
            trigger,
            ENGINE_ACTOR,
        )
    }

    /// Replace a record's desired content and send it back to DRAFT.
    fn update_desired(
        &mut self,
        record: &ResourceRecord,
        resource: &Resource,
        trigger: TransitionTrigger,
    ) -> Result<(), SyncError> {
        let desired = resource.to_canonical_yaml()?;
        let hash = resource.content_hash();
        let key = resource.key();
        let references = resource.references();
        self.records.upsert(record.id, trigger, ENGINE_ACTOR, |r| {
            r.desired = desired;
            r.content_hash = hash;
            r.key = key;
            r.references = references;
            r.state = ResourceState::Draft;
        })?;
        Ok(())
    }

    /// Make `text` the record's desired content: write it under `managed/`
    /// and store its canonical form. The lifecycle state is left alone.
    fn accept_text(
        &mut self,
        record: &ResourceRecord,
        text: &str,
        trigger: TransitionTrigger,
    ) -> Result<Resource, SyncError> {
        let (resource, _) = parse_managed(text)?;
        if resource.key().managed_path() != record.managed_path {
            return Err(ValidationError::InvalidName {
                name: resource.name().to_string(),
                reason: "does not match its managed path",
            }
            .into());
        }
        self.dir.write(&record.managed_path, text.as_bytes())?;
        let desired = resource.to_canonical_yaml()?;
        let hash = resource.content_hash();
        let key = resource.key();
        let references = resource.references();
        self.records.upsert(record.id, trigger, ENGINE_ACTOR, |r| {
            r.desired = desired;
            r.content_hash = hash;
            r.key = key;
            r.references = references;
        })?;
        Ok(resource)
    }

    fn mark_drifted(&mut self, record: &ResourceRecord, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.records.upsert(record.id, TransitionTrigger::Reconcile, ENGINE_ACTOR, |r| {
            if r.drift_since.is_none() {
                r.drift_since = Some(now);
            }
            if is_allowed(r.state, ResourceState::Drifted) {
                r.state = ResourceState::Drifted;
            }
        })?;
        Ok(())
    }

    fn note_observation(
        &mut self,
        record: &ResourceRecord,
        git: Option<&str>,
        cluster: Option<&str>,
    ) -> Result<(), SyncError> {
        if record.git_hash.as_deref() == git && record.cluster_hash.as_deref() == cluster {
            return Ok(());
        }
        self.records.upsert(record.id, TransitionTrigger::Sync, ENGINE_ACTOR, |r| {
            r.git_hash = git.map(str::to_string);
            r.cluster_hash = cluster.map(str::to_string);
        })?;
        Ok(())
    }

    async fn git_text(&self, record: &ResourceRecord, side: GitSide) -> Result<Option<String>, SyncError> {
        match (side.text, side.hash) {
            (Some(text), _) => Ok(Some(text)),
            (None, None) => Ok(None),
            (None, Some(_)) => {
                with_git_timeout(self.settings.git_timeout(), "read", self.git.read(&record.managed_path)).await
            }
        }
    }

    /// The managed file's current text, re-rendered from the record if it
    /// is missing.
    fn local_text(&mut self, record: &ResourceRecord, now: DateTime<Utc>) -> Result<String, SyncError> {
        if let Some(text) = self.dir.read_to_string(&record.managed_path)? {
            return Ok(text);
        }
        let resource = desired_resource(record)?;
        self.write_rendered(&record.managed_path, &resource, now)
    }

    fn render(&self, resource: &Resource, now: DateTime<Utc>) -> Result<String, SyncError> {
        let provenance = Provenance::new(self.fabric.id.clone(), resource.content_hash(), now);
        Ok(resource.render_managed(&provenance)?)
    }

    fn write_rendered(&mut self, path: &Path, resource: &Resource, now: DateTime<Utc>) -> Result<String, SyncError> {
        let text = self.render(resource, now)?;
        self.dir.write(path, text.as_bytes())?;
        Ok(text)
    }

    fn retire(
        &mut self,
        id: ResourceId,
        path: &Path,
        trigger: TransitionTrigger,
        actor: &str,
    ) -> Result<(), SyncError> {
        self.dir.delete(path)?;
        self.records.tombstone(id, trigger, actor)?;
        Ok(())
    }

    fn write_manifest(&mut self) -> Result<(), SyncError> {
        let records = self.records.list();
        ingest::write_manifest(
            &mut self.dir,
            records
                .iter()
                .map(|r| (&r.key, r.managed_path.as_path(), r.content_hash.as_str())),
        )
    }

    fn set_git_state(&self, state: ConnectionState) -> Result<(), SyncError> {
        let mut health = self.records.health();
        health.git = state;
        self.records.set_health(health)
    }

    fn set_cluster_state(&self, state: ConnectionState) -> Result<(), SyncError> {
        let mut health = self.records.health();
        health.cluster = state;
        self.records.set_health(health)
    }
}

fn desired_resource(record: &ResourceRecord) -> Result<Resource, SyncError> {
    Ok(parse_managed(&record.desired)?.0)
}

/// `managed/<kind-dir>/<name>.yaml`
fn is_managed_manifest(path: &Path) -> bool {
    let mut components = path.components();
    let root = components.next().and_then(|c| c.as_os_str().to_str());
    let kind = components.next().and_then(|c| c.as_os_str().to_str());
    root == Some(MANAGED_DIR)
        && kind.and_then(ResourceKind::from_directory).is_some()
        && path.extension().and_then(|e| e.to_str()) == Some("yaml")
}

fn connection_failure(err: &SyncError) -> ConnectionState {
    if err.is_auth() {
        ConnectionState::AuthFailed(err.to_string())
    } else {
        ConnectionState::Unreachable(err.to_string())
    }
}

fn is_git_failure(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::GitAuth(_) | SyncError::GitTransient(_) | SyncError::GitRateLimited { .. }
    )
}

/// Errors that end the run rather than skip one resource.
fn is_fatal(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::Storage { .. } | SyncError::PathEscapesRoot(_) | SyncError::Cancelled | SyncError::Json(_)
    )
}

async fn with_git_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::GitTransient(format!(
            "git {op} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
