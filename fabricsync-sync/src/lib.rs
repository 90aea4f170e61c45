//! # fabricsync-sync
//!
//! Keeps a fabric's manifests in step across the local working tree, a Git
//! repository and the cluster control plane.
//!
//! Build a [`SyncEngine`] per fabric and call [`SyncEngine::run`] for one
//! full pass. The pieces it drives are usable on their own:
//!
//! - [`directory`] hash-gated atomic writes under the fabric root
//! - [`ingest`] `raw/` to `managed/` normalization
//! - [`git`] / [`cluster`] the two remote stores behind traits
//! - [`records`] the persistent Record Store
//! - [`drift`] three-way classification and reconcile policy

pub mod cancel;
pub mod cluster;
pub mod diff;
pub mod directory;
pub mod drift;
pub mod engine;
pub mod error;
pub mod git;
pub mod hash_store;
pub mod ingest;
pub mod records;

pub use cancel::CancelFlag;
pub use cluster::{ClusterApi, ClusterEntry, ClusterObject, MemoryCluster, RetryingCluster};
pub use diff::{diff_fabric, DiffFabricResult, FileDiff};
pub use directory::{DirectoryManager, WriteResult};
pub use drift::{
    classify, Classification, DirectionPolicy, Drift, Observation, ReconcilePolicy, Remedy,
    ReportOnlyPolicy, Side,
};
pub use engine::{SyncEngine, ENGINE_ACTOR, OPERATOR_ACTOR};
pub use error::SyncError;
pub use git::{FileChange, GitRemote, LocalRemote, RemoteTree};
pub use ingest::{IngestAction, IngestReport, IngestedDocument, RejectedDocument};
pub use records::RecordStore;
