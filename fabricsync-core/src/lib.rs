//! fabricsync core library: domain types, configuration, resource lifecycle.
//!
//! Public API surface:
//! - [`types`]: newtypes, enums and configuration structs
//! - [`model`]: tracked resource records, history, alerts, sync operations
//! - [`state`]: lifecycle transition rules and status aggregation
//! - [`config`]: load / save / edit the YAML configuration file
//! - [`error`]: [`ConfigError`], [`StateError`]

pub mod config;
pub mod error;
pub mod model;
pub mod state;
pub mod types;

pub use error::{ConfigError, StateError};
pub use model::{
    AlertPriority, AlertStatus, ConflictDetails, ReconciliationAlert, ResolutionAction,
    ResourceRecord, StateTransition, SyncCounters, SyncOperation, SyncOperationOutcome,
};
pub use state::{
    aggregate_fabric, aggregate_repository, check_transition, forward_path, ConnectionHealth,
    ConnectionState, FabricHealth, FabricStatus, RepositoryStatus, StateCounts, SyncStatus,
};
pub use types::{
    AlertId, BackoffConfig, Config, ConflictStatus, EngineConfig, FabricConfig, FabricId,
    GitRepository, OperationId, RepositoryId, ResourceId, ResourceKey, ResourceKind,
    ResourceState, SyncDirection, TransitionTrigger,
};
