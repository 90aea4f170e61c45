//! Record Store: the local authoritative record for each tracked resource.
//!
//! Records live in an arena addressed by [`ResourceId`]; a live index maps
//! each managed path (kind + name) to its non-tombstoned record. Alerts and
//! history refer to records by id only, so tombstoning never cascades.
//!
//! Every mutation rewrites `.fabricsync/records.json` atomically while the
//! store lock is held. A state change and its history entry are applied to
//! the in-memory copy together and rolled back together if the write fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use fabricsync_core::{
    aggregate_fabric, check_transition, AlertId, AlertPriority, AlertStatus, ConnectionHealth,
    FabricId, FabricStatus, OperationId, ReconciliationAlert, ResolutionAction, ResourceId,
    ResourceKey, ResourceRecord, ResourceState, StateTransition, SyncDirection, SyncOperation,
    TransitionTrigger,
};

use crate::error::{io_err, SyncError};
use crate::hash_store::{write_atomic, METADATA_DIR};

/// Persisted form of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordsFile {
    #[serde(default)]
    next_resource: u64,
    #[serde(default)]
    next_alert: u64,
    #[serde(default)]
    next_operation: u64,
    #[serde(default)]
    resources: Vec<ResourceRecord>,
    #[serde(default)]
    history: Vec<StateTransition>,
    #[serde(default)]
    alerts: Vec<ReconciliationAlert>,
    #[serde(default)]
    operations: Vec<SyncOperation>,
    #[serde(default)]
    health: ConnectionHealth,
}

#[derive(Debug)]
struct Inner {
    file: RecordsFile,
    /// Managed path -> arena index of the live record.
    live: HashMap<PathBuf, usize>,
}

impl Inner {
    fn reindex(&mut self) {
        self.live = self
            .file
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_tombstoned())
            .map(|(i, r)| (r.managed_path.clone(), i))
            .collect();
    }

    fn position(&self, id: ResourceId) -> Option<usize> {
        self.file.resources.iter().position(|r| r.id == id)
    }
}

/// Fields for a newly tracked resource.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub key: ResourceKey,
    pub desired: String,
    pub content_hash: String,
    pub sync_direction: SyncDirection,
    pub references: Vec<ResourceKey>,
}

/// Input for raising or refreshing an alert.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub resource: ResourceId,
    pub key: ResourceKey,
    pub score: u32,
    pub reason: String,
    pub suggested_actions: Vec<ResolutionAction>,
    pub divergence_since: DateTime<Utc>,
}

pub struct RecordStore {
    path: PathBuf,
    fabric: FabricId,
    inner: Mutex<Inner>,
}

impl RecordStore {
    pub fn records_path_at(root: &Path) -> PathBuf {
        root.join(METADATA_DIR).join("records.json")
    }

    /// Open the store under a fabric root, creating an empty one if absent.
    pub fn open(root: &Path, fabric: FabricId) -> Result<Self, SyncError> {
        let path = Self::records_path_at(root);
        let file = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordsFile::default(),
            Err(e) => return Err(io_err(&path, e)),
        };
        let mut inner = Inner {
            file,
            live: HashMap::new(),
        };
        inner.reindex();
        Ok(Self {
            path,
            fabric,
            inner: Mutex::new(inner),
        })
    }

    pub fn fabric(&self) -> &FabricId {
        &self.fabric
    }

    fn persist(&self, inner: &Inner) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(&inner.file)?;
        write_atomic(&self.path, json.as_bytes())
    }

    // -- queries -----------------------------------------------------------

    /// Live record for `key`. Records are identified by kind and name.
    pub fn get(&self, key: &ResourceKey) -> Option<ResourceRecord> {
        self.get_by_path(&key.managed_path())
    }

    pub fn get_by_path(&self, path: &Path) -> Option<ResourceRecord> {
        let inner = self.inner.lock();
        inner
            .live
            .get(path)
            .map(|&i| inner.file.resources[i].clone())
    }

    /// Any record, live or tombstoned.
    pub fn get_by_id(&self, id: ResourceId) -> Option<ResourceRecord> {
        let inner = self.inner.lock();
        inner.position(id).map(|i| inner.file.resources[i].clone())
    }

    /// Live records, ordered by key.
    pub fn list(&self) -> Vec<ResourceRecord> {
        let inner = self.inner.lock();
        let mut out: Vec<ResourceRecord> = inner
            .live
            .values()
            .map(|&i| inner.file.resources[i].clone())
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Every record including tombstones, in creation order.
    pub fn list_all(&self) -> Vec<ResourceRecord> {
        self.inner.lock().file.resources.clone()
    }

    /// History for one resource, or all of it.
    pub fn history(&self, resource: Option<ResourceId>) -> Vec<StateTransition> {
        let inner = self.inner.lock();
        inner
            .file
            .history
            .iter()
            .filter(|t| resource.map(|id| t.resource == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().file.history.len()
    }

    /// Open alerts by descending priority, then age. With `open_only` false,
    /// resolved alerts follow in the same order.
    pub fn alerts(&self, open_only: bool) -> Vec<ReconciliationAlert> {
        let inner = self.inner.lock();
        let mut out: Vec<ReconciliationAlert> = inner
            .file
            .alerts
            .iter()
            .filter(|a| !open_only || a.is_open())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.is_open()
                .cmp(&a.is_open())
                .then(b.priority.cmp(&a.priority))
                .then(b.score.cmp(&a.score))
                .then(a.raised_at.cmp(&b.raised_at))
        });
        out
    }

    pub fn alert(&self, id: AlertId) -> Option<ReconciliationAlert> {
        self.inner
            .lock()
            .file
            .alerts
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn open_alert_for(&self, resource: ResourceId) -> Option<ReconciliationAlert> {
        self.inner
            .lock()
            .file
            .alerts
            .iter()
            .find(|a| a.is_open() && a.resources.contains(&resource))
            .cloned()
    }

    pub fn operations(&self) -> Vec<SyncOperation> {
        self.inner.lock().file.operations.clone()
    }

    pub fn last_operation(&self) -> Option<SyncOperation> {
        self.inner.lock().file.operations.last().cloned()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.inner.lock().file.health.clone()
    }

    /// Live records that reference `key`.
    pub fn referrers(&self, key: &ResourceKey) -> Vec<ResourceId> {
        let inner = self.inner.lock();
        let path = key.managed_path();
        inner
            .live
            .values()
            .map(|&i| &inner.file.resources[i])
            .filter(|r| r.references.iter().any(|k| k.managed_path() == path))
            .map(|r| r.id)
            .collect()
    }

    /// Aggregated fabric status, recomputed on every call.
    pub fn status(&self, enabled: bool) -> FabricStatus {
        let inner = self.inner.lock();
        let states = inner.live.values().map(|&i| inner.file.resources[i].state);
        let open = inner.file.alerts.iter().filter(|a| a.is_open()).count();
        aggregate_fabric(enabled, &inner.file.health, states, open)
    }

    // -- mutations ---------------------------------------------------------

    /// Start tracking a resource in `DRAFT`.
    pub fn create(
        &self,
        new: NewRecord,
        trigger: TransitionTrigger,
        actor: &str,
    ) -> Result<ResourceRecord, SyncError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let managed_path = new.key.managed_path();
        if inner.live.contains_key(&managed_path) {
            return Err(SyncError::AlreadyTracked(new.key));
        }

        inner.file.next_resource += 1;
        let record = ResourceRecord {
            id: ResourceId(inner.file.next_resource),
            fabric: self.fabric.clone(),
            key: new.key,
            managed_path: managed_path.clone(),
            desired: new.desired,
            content_hash: new.content_hash,
            git_hash: None,
            cluster_hash: None,
            confirmed_hash: None,
            state: ResourceState::Draft,
            sync_direction: new.sync_direction,
            conflict_status: Default::default(),
            conflict: None,
            references: new.references,
            drift_since: None,
            created_at: now,
            updated_at: now,
            tombstoned_at: None,
        };
        let transition = StateTransition {
            resource: record.id,
            key: record.key.clone(),
            from: None,
            to: ResourceState::Draft,
            trigger,
            actor: actor.to_string(),
            at: now,
        };

        inner.file.resources.push(record.clone());
        inner.file.history.push(transition);
        let index = inner.file.resources.len() - 1;
        inner.live.insert(managed_path, index);

        if let Err(err) = self.persist(&inner) {
            inner.file.resources.pop();
            inner.file.history.pop();
            inner.file.next_resource -= 1;
            inner.reindex();
            return Err(err);
        }
        info!(fabric = %self.fabric, key = %record.key, id = %record.id, "tracking resource");
        Ok(record)
    }

    /// Update a live record through `f`.
    ///
    /// If `f` changes `state`, the transition is validated first and a
    /// history entry is appended with the change; an illegal transition is
    /// logged and rejected and nothing is stored.
    pub fn upsert<F>(
        &self,
        id: ResourceId,
        trigger: TransitionTrigger,
        actor: &str,
        f: F,
    ) -> Result<ResourceRecord, SyncError>
    where
        F: FnOnce(&mut ResourceRecord),
    {
        let mut inner = self.inner.lock();
        let index = inner.position(id).ok_or(SyncError::UnknownResource(id))?;
        let before = inner.file.resources[index].clone();
        if before.is_tombstoned() {
            return Err(SyncError::UnknownResource(id));
        }

        let mut after = before.clone();
        f(&mut after);
        after.id = before.id;
        after.managed_path = before.managed_path.clone();
        if after == before {
            return Ok(after);
        }

        let now = Utc::now();
        after.updated_at = now;
        let transition = if after.state != before.state {
            if let Err(err) = check_transition(before.state, after.state) {
                error!(
                    fabric = %self.fabric,
                    key = %before.key,
                    from = %before.state,
                    to = %after.state,
                    %trigger,
                    "rejected state transition"
                );
                return Err(err.into());
            }
            Some(StateTransition {
                resource: id,
                key: after.key.clone(),
                from: Some(before.state),
                to: after.state,
                trigger,
                actor: actor.to_string(),
                at: now,
            })
        } else {
            None
        };

        inner.file.resources[index] = after.clone();
        let pushed = transition.is_some();
        if let Some(t) = transition {
            inner.file.history.push(t);
        }
        if let Err(err) = self.persist(&inner) {
            inner.file.resources[index] = before;
            if pushed {
                inner.file.history.pop();
            }
            return Err(err);
        }
        if pushed {
            info!(
                fabric = %self.fabric,
                key = %after.key,
                from = %before.state,
                to = %after.state,
                %trigger,
                "state transition"
            );
        }
        Ok(after)
    }

    /// Convenience for a pure state change.
    pub fn transition(
        &self,
        id: ResourceId,
        to: ResourceState,
        trigger: TransitionTrigger,
        actor: &str,
    ) -> Result<ResourceRecord, SyncError> {
        self.upsert(id, trigger, actor, |r| r.state = to)
    }

    /// Logically delete a record: move it to `ORPHANED` if needed and mark it
    /// tombstoned. History and alerts are kept.
    pub fn tombstone(
        &self,
        id: ResourceId,
        trigger: TransitionTrigger,
        actor: &str,
    ) -> Result<ResourceRecord, SyncError> {
        let record = self.get_by_id(id).ok_or(SyncError::UnknownResource(id))?;
        if record.is_tombstoned() {
            return Ok(record);
        }
        if record.state != ResourceState::Orphaned {
            self.transition(id, ResourceState::Orphaned, trigger, actor)?;
        }

        let mut inner = self.inner.lock();
        let index = inner.position(id).ok_or(SyncError::UnknownResource(id))?;
        let before = inner.file.resources[index].clone();
        let now = Utc::now();
        inner.file.resources[index].tombstoned_at = Some(now);
        inner.file.resources[index].updated_at = now;
        inner.live.remove(&before.managed_path);
        if let Err(err) = self.persist(&inner) {
            inner.file.resources[index] = before;
            inner.reindex();
            return Err(err);
        }
        info!(fabric = %self.fabric, key = %before.key, "tombstoned");
        Ok(inner.file.resources[index].clone())
    }

    /// Raise an alert for a resource, or refresh the open one.
    ///
    /// There is at most one open alert per resource; a repeated detection
    /// updates score, priority and reason in place.
    pub fn raise_alert(&self, request: AlertRequest) -> Result<ReconciliationAlert, SyncError> {
        let mut inner = self.inner.lock();
        let priority = AlertPriority::from_score(request.score);
        let snapshot = inner.file.clone();

        let alert = if let Some(existing) = inner
            .file
            .alerts
            .iter_mut()
            .find(|a| a.is_open() && a.resources.contains(&request.resource))
        {
            existing.score = request.score;
            existing.priority = priority;
            existing.reason = request.reason;
            existing.suggested_actions = request.suggested_actions;
            existing.clone()
        } else {
            inner.file.next_alert += 1;
            let alert = ReconciliationAlert {
                id: AlertId(inner.file.next_alert),
                fabric: self.fabric.clone(),
                resources: vec![request.resource],
                keys: vec![request.key],
                priority,
                score: request.score,
                reason: request.reason,
                suggested_actions: request.suggested_actions,
                status: AlertStatus::Open,
                action_taken: None,
                divergence_since: request.divergence_since,
                raised_at: Utc::now(),
                resolved_at: None,
            };
            inner.file.alerts.push(alert.clone());
            alert
        };

        if let Err(err) = self.persist(&inner) {
            inner.file = snapshot;
            return Err(err);
        }
        Ok(alert)
    }

    /// Close an open alert, recording the action taken.
    pub fn close_alert(
        &self,
        id: AlertId,
        action: ResolutionAction,
    ) -> Result<ReconciliationAlert, SyncError> {
        let mut inner = self.inner.lock();
        let index = inner
            .file
            .alerts
            .iter()
            .position(|a| a.id == id)
            .ok_or(SyncError::UnknownAlert(id))?;
        if !inner.file.alerts[index].is_open() {
            return Err(SyncError::AlertClosed(id));
        }
        let before = inner.file.alerts[index].clone();
        {
            let alert = &mut inner.file.alerts[index];
            alert.status = AlertStatus::Resolved;
            alert.action_taken = Some(action);
            alert.resolved_at = Some(Utc::now());
        }
        if let Err(err) = self.persist(&inner) {
            inner.file.alerts[index] = before;
            return Err(err);
        }
        info!(fabric = %self.fabric, alert = %id, ?action, "alert resolved");
        Ok(inner.file.alerts[index].clone())
    }

    pub fn next_operation_id(&self) -> OperationId {
        let mut inner = self.inner.lock();
        inner.file.next_operation += 1;
        OperationId(inner.file.next_operation)
    }

    /// Store a finalized operation. Unfinalized operations are not accepted.
    pub fn record_operation(&self, op: SyncOperation) -> Result<(), SyncError> {
        if !op.is_finalized() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        inner.file.operations.push(op);
        if let Err(err) = self.persist(&inner) {
            inner.file.operations.pop();
            return Err(err);
        }
        Ok(())
    }

    pub fn set_health(&self, health: ConnectionHealth) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        if inner.file.health == health {
            return Ok(());
        }
        let before = std::mem::replace(&mut inner.file.health, health);
        if let Err(err) = self.persist(&inner) {
            inner.file.health = before;
            return Err(err);
        }
        Ok(())
    }
}
