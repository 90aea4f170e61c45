//! Tracked records: resources, transition history, alerts and sync operations.
//!
//! Records reference each other by id ([`ResourceId`], [`AlertId`],
//! [`OperationId`]) rather than by embedding, so tombstoning a resource never
//! cascades into its history or alerts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AlertId, ConflictStatus, FabricId, OperationId, ResourceId, ResourceKey, ResourceState,
    SyncDirection, TransitionTrigger,
};

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Structured description of a detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub record_hash: Option<String>,
    pub git_hash: Option<String>,
    pub cluster_hash: Option<String>,
    /// Unified diff from the Git content to the cluster content.
    pub diff: String,
    pub detected_at: DateTime<Utc>,
}

/// One tracked manifest instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub fabric: FabricId,
    pub key: ResourceKey,
    /// Relative to the fabric root.
    pub managed_path: PathBuf,
    /// Canonical document (without provenance annotations).
    pub desired: String,
    /// Content hash of `desired`.
    pub content_hash: String,
    /// Last content hash observed in Git.
    #[serde(default)]
    pub git_hash: Option<String>,
    /// Last content hash observed in the cluster.
    #[serde(default)]
    pub cluster_hash: Option<String>,
    /// Last hash confirmed identical across all three stores.
    #[serde(default)]
    pub confirmed_hash: Option<String>,
    pub state: ResourceState,
    pub sync_direction: SyncDirection,
    #[serde(default)]
    pub conflict_status: ConflictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDetails>,
    /// Other resources this one points at (VPC of an attachment, etc).
    #[serde(default)]
    pub references: Vec<ResourceKey>,
    /// When the current divergence was first observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }

    /// `true` when every store holds the confirmed content.
    pub fn hashes_agree(&self) -> bool {
        match &self.confirmed_hash {
            Some(confirmed) => {
                &self.content_hash == confirmed
                    && self.git_hash.as_ref() == Some(confirmed)
                    && self.cluster_hash.as_ref() == Some(confirmed)
            }
            None => false,
        }
    }
}

/// Append-only history entry for one state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub resource: ResourceId,
    pub key: ResourceKey,
    /// `None` when the record is created.
    pub from: Option<ResourceState>,
    pub to: ResourceState,
    pub trigger: TransitionTrigger,
    pub actor: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    /// Map a severity score onto a priority band.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=1 => AlertPriority::Low,
            2..=3 => AlertPriority::Medium,
            4..=5 => AlertPriority::High,
            _ => AlertPriority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Resolved,
}

/// An action that closes a reconciliation alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionAction {
    /// Git content becomes desired state and is applied to the cluster.
    AcceptGit,
    /// Cluster content is written back to Git.
    AcceptCluster,
    /// Close the alert without touching either store.
    Dismiss,
}

/// Raised when drift cannot be healed automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub id: AlertId,
    pub fabric: FabricId,
    pub resources: Vec<ResourceId>,
    pub keys: Vec<ResourceKey>,
    pub priority: AlertPriority,
    pub score: u32,
    pub reason: String,
    /// Ordered, most recommended first.
    pub suggested_actions: Vec<ResolutionAction>,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<ResolutionAction>,
    pub divergence_since: DateTime<Utc>,
    pub raised_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationAlert {
    pub fn is_open(&self) -> bool {
        self.status == AlertStatus::Open
    }
}

// ---------------------------------------------------------------------------
// Sync operations
// ---------------------------------------------------------------------------

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub files_processed: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub rejected: usize,
    pub pushed: usize,
    pub applied: usize,
    pub converged: usize,
    pub drifted_in_git: usize,
    pub drifted_in_cluster: usize,
    pub conflicts: usize,
    pub transitions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncOperationOutcome {
    Succeeded,
    /// Some portions of the run were skipped (connectivity, git conflict).
    Partial(String),
    /// Nothing beyond ingestion ran.
    Skipped(String),
    Failed(String),
    Cancelled,
}

/// One record per sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    pub fabric: FabricId,
    pub direction: SyncDirection,
    pub counters: SyncCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOperationOutcome>,
}

impl SyncOperation {
    pub fn start(id: OperationId, fabric: FabricId, direction: SyncDirection) -> Self {
        Self {
            id,
            fabric,
            direction,
            counters: SyncCounters::default(),
            commit: None,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Seal the operation. Returns `false` if it was already sealed.
    pub fn finalize(&mut self, outcome: SyncOperationOutcome) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    #[test]
    fn priority_bands_are_ordered() {
        assert_eq!(AlertPriority::from_score(0), AlertPriority::Low);
        assert_eq!(AlertPriority::from_score(3), AlertPriority::Medium);
        assert_eq!(AlertPriority::from_score(5), AlertPriority::High);
        assert_eq!(AlertPriority::from_score(12), AlertPriority::Critical);
        assert!(AlertPriority::Critical > AlertPriority::Low);
    }

    #[test]
    fn finalized_operation_is_immutable() {
        let mut op = SyncOperation::start(
            OperationId(1),
            FabricId::from("dc1"),
            SyncDirection::GitToCluster,
        );
        assert!(op.finalize(SyncOperationOutcome::Succeeded));
        assert!(!op.finalize(SyncOperationOutcome::Cancelled));
        assert_eq!(op.outcome, Some(SyncOperationOutcome::Succeeded));
    }

    #[test]
    fn hashes_agree_requires_all_three() {
        let now = Utc::now();
        let mut rec = ResourceRecord {
            id: ResourceId(1),
            fabric: FabricId::from("dc1"),
            key: ResourceKey::new(ResourceKind::Vpc, "default", "a"),
            managed_path: PathBuf::from("managed/vpc/a.yaml"),
            desired: String::new(),
            content_hash: "h".into(),
            git_hash: Some("h".into()),
            cluster_hash: Some("x".into()),
            confirmed_hash: Some("h".into()),
            state: ResourceState::Synced,
            sync_direction: SyncDirection::GitToCluster,
            conflict_status: ConflictStatus::None,
            conflict: None,
            references: vec![],
            drift_since: None,
            created_at: now,
            updated_at: now,
            tombstoned_at: None,
        };
        assert!(!rec.hashes_agree());
        rec.cluster_hash = Some("h".into());
        assert!(rec.hashes_agree());
    }
}
