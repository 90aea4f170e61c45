//! Resource lifecycle rules and status aggregation.
//!
//! ```text
//! DRAFT -> COMMITTED -> PENDING -> SYNCED
//!                                    |  ^
//!                                    v  |
//!                                  DRIFTED
//! any live state -> ORPHANED (terminal)
//! ```
//!
//! Fabric and repository status are computed here from resource states and
//! connection observations; they are never stored as independent truth.

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::types::ResourceState;

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Whether `from -> to` is a legal lifecycle step.
///
/// Same-state pairs are not transitions and are rejected here; callers skip
/// them before asking.
pub fn is_allowed(from: ResourceState, to: ResourceState) -> bool {
    use ResourceState::*;
    matches!(
        (from, to),
        (Draft, Committed)
            | (Committed, Pending)
            | (Committed, Draft)
            | (Pending, Synced)
            | (Pending, Draft)
            | (Pending, Drifted)
            | (Synced, Drifted)
            | (Synced, Draft)
            | (Drifted, Synced)
            | (Drifted, Draft)
            | (Drifted, Committed)
            | (Drifted, Pending)
            | (Draft | Committed | Pending | Synced | Drifted, Orphaned)
    )
}

/// Validate a transition, returning a [`StateError`] for illegal steps.
pub fn check_transition(from: ResourceState, to: ResourceState) -> Result<(), StateError> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(StateError { from, to })
    }
}

/// The states to step through to get from `from` to `to` along the
/// lifecycle, excluding `from` itself.
///
/// DRAFT reaches SYNCED only via COMMITTED and PENDING; DRIFTED heals
/// directly. Returns `None` when `to` is not reachable going forward.
pub fn forward_path(from: ResourceState, to: ResourceState) -> Option<Vec<ResourceState>> {
    use ResourceState::*;
    if from == to {
        return Some(vec![]);
    }
    if is_allowed(from, to) {
        return Some(vec![to]);
    }
    let chain = [Draft, Committed, Pending, Synced];
    let start = chain.iter().position(|s| *s == from)?;
    let end = chain.iter().position(|s| *s == to)?;
    if end <= start {
        return None;
    }
    Some(chain[start + 1..=end].to_vec())
}

/// `true` if no transition leaves `state` (purge aside).
pub fn is_terminal(state: ResourceState) -> bool {
    state == ResourceState::Orphaned
}

// ---------------------------------------------------------------------------
// Connection observations
// ---------------------------------------------------------------------------

/// Last observed reachability of one external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No call has been made yet.
    #[default]
    Unknown,
    Healthy,
    Unreachable(String),
    AuthFailed(String),
}

impl ConnectionState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ConnectionState::Healthy)
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ConnectionState::Unreachable(_) | ConnectionState::AuthFailed(_)
        )
    }
}

/// Reachability of both stores for one fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionHealth {
    pub git: ConnectionState,
    pub cluster: ConnectionState,
}

impl ConnectionHealth {
    pub fn any_failed(&self) -> bool {
        self.git.is_failed() || self.cluster.is_failed()
    }
}

// ---------------------------------------------------------------------------
// Aggregated status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FabricHealth {
    Healthy,
    /// Some resources drifted or alerting.
    Degraded,
    /// A store is unreachable or credentials failed.
    Unhealthy,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    /// Resources are moving through DRAFT/COMMITTED/PENDING.
    Pending,
    OutOfSync,
    /// Connectivity is not confirmed, so convergence cannot be claimed.
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub draft: usize,
    pub committed: usize,
    pub pending: usize,
    pub synced: usize,
    pub drifted: usize,
    pub orphaned: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: ResourceState) {
        match state {
            ResourceState::Draft => self.draft += 1,
            ResourceState::Committed => self.committed += 1,
            ResourceState::Pending => self.pending += 1,
            ResourceState::Synced => self.synced += 1,
            ResourceState::Drifted => self.drifted += 1,
            ResourceState::Orphaned => self.orphaned += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.draft + self.committed + self.pending + self.synced + self.drifted + self.orphaned
    }
}

/// Composite fabric status. Only ever produced by [`aggregate_fabric`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricStatus {
    pub health: FabricHealth,
    pub sync: SyncStatus,
    pub counts: StateCounts,
    pub open_alerts: usize,
    pub connection: ConnectionHealth,
}

/// Aggregate the status of one fabric from its live (non-tombstoned)
/// resource states.
pub fn aggregate_fabric<I>(
    enabled: bool,
    connection: &ConnectionHealth,
    states: I,
    open_alerts: usize,
) -> FabricStatus
where
    I: IntoIterator<Item = ResourceState>,
{
    let mut counts = StateCounts::default();
    for state in states {
        counts.record(state);
    }

    let sync = if !connection.git.is_healthy() || !connection.cluster.is_healthy() {
        SyncStatus::Unknown
    } else if counts.drifted > 0 || counts.orphaned > 0 || open_alerts > 0 {
        SyncStatus::OutOfSync
    } else if counts.synced == counts.total() {
        SyncStatus::Synced
    } else {
        SyncStatus::Pending
    };

    let health = if !enabled {
        FabricHealth::Disabled
    } else if connection.any_failed() {
        FabricHealth::Unhealthy
    } else if counts.drifted > 0 || open_alerts > 0 {
        FabricHealth::Degraded
    } else {
        FabricHealth::Healthy
    };

    FabricStatus {
        health,
        sync,
        counts,
        open_alerts,
        connection: connection.clone(),
    }
}

/// Repository-level status across every fabric bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub fabrics: usize,
    pub git: ConnectionState,
    pub sync: SyncStatus,
}

pub fn aggregate_repository<'a, I>(fabrics: I) -> RepositoryStatus
where
    I: IntoIterator<Item = &'a FabricStatus>,
{
    let mut count = 0usize;
    let mut git = ConnectionState::Unknown;
    let mut all_synced = true;
    let mut any_unknown = false;
    let mut any_out = false;

    for status in fabrics {
        count += 1;
        git = match (&git, &status.connection.git) {
            (ConnectionState::AuthFailed(r), _) => ConnectionState::AuthFailed(r.clone()),
            (_, ConnectionState::AuthFailed(r)) => ConnectionState::AuthFailed(r.clone()),
            (ConnectionState::Unreachable(r), _) => ConnectionState::Unreachable(r.clone()),
            (_, ConnectionState::Unreachable(r)) => ConnectionState::Unreachable(r.clone()),
            (ConnectionState::Unknown, other) if count == 1 => other.clone(),
            (ConnectionState::Healthy, ConnectionState::Healthy) => ConnectionState::Healthy,
            _ => ConnectionState::Unknown,
        };
        match status.sync {
            SyncStatus::Synced => {}
            SyncStatus::Unknown => {
                all_synced = false;
                any_unknown = true;
            }
            SyncStatus::OutOfSync => {
                all_synced = false;
                any_out = true;
            }
            SyncStatus::Pending => all_synced = false,
        }
    }

    let sync = if any_unknown || count == 0 {
        SyncStatus::Unknown
    } else if any_out {
        SyncStatus::OutOfSync
    } else if all_synced {
        SyncStatus::Synced
    } else {
        SyncStatus::Pending
    };

    RepositoryStatus {
        fabrics: count,
        git,
        sync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceState::*;

    #[test]
    fn forward_path_walks_intermediate_states() {
        assert_eq!(
            forward_path(Draft, Synced),
            Some(vec![Committed, Pending, Synced])
        );
        assert_eq!(forward_path(Committed, Synced), Some(vec![Pending, Synced]));
        assert_eq!(forward_path(Drifted, Synced), Some(vec![Synced]));
        assert_eq!(forward_path(Synced, Synced), Some(vec![]));
        assert_eq!(forward_path(Synced, Committed), None);
        assert_eq!(forward_path(Orphaned, Synced), None);
    }

    fn healthy() -> ConnectionHealth {
        ConnectionHealth {
            git: ConnectionState::Healthy,
            cluster: ConnectionState::Healthy,
        }
    }

    #[test]
    fn happy_path_is_allowed() {
        assert!(check_transition(Draft, Committed).is_ok());
        assert!(check_transition(Committed, Pending).is_ok());
        assert!(check_transition(Pending, Synced).is_ok());
        assert!(check_transition(Synced, Drifted).is_ok());
        assert!(check_transition(Drifted, Synced).is_ok());
    }

    #[test]
    fn shortcuts_to_synced_are_rejected() {
        let err = check_transition(Draft, Synced).unwrap_err();
        assert_eq!(err, StateError { from: Draft, to: Synced });
        assert!(check_transition(Committed, Synced).is_err());
        assert!(check_transition(Draft, Pending).is_err());
    }

    #[test]
    fn orphaned_is_terminal() {
        for to in [Draft, Committed, Pending, Synced, Drifted] {
            assert!(check_transition(Orphaned, to).is_err());
        }
        assert!(is_terminal(Orphaned));
    }

    #[test]
    fn synced_only_when_everything_synced_and_connected() {
        let status = aggregate_fabric(true, &healthy(), [Synced, Synced], 0);
        assert_eq!(status.sync, SyncStatus::Synced);
        assert_eq!(status.health, FabricHealth::Healthy);

        let status = aggregate_fabric(true, &healthy(), [Synced, Pending], 0);
        assert_eq!(status.sync, SyncStatus::Pending);

        let unknown = ConnectionHealth::default();
        let status = aggregate_fabric(true, &unknown, [Synced], 0);
        assert_eq!(status.sync, SyncStatus::Unknown);
    }

    #[test]
    fn drift_degrades_and_connection_failure_is_unhealthy() {
        let status = aggregate_fabric(true, &healthy(), [Synced, Drifted], 0);
        assert_eq!(status.health, FabricHealth::Degraded);
        assert_eq!(status.sync, SyncStatus::OutOfSync);

        let broken = ConnectionHealth {
            git: ConnectionState::AuthFailed("token expired".into()),
            cluster: ConnectionState::Healthy,
        };
        let status = aggregate_fabric(true, &broken, [Synced], 0);
        assert_eq!(status.health, FabricHealth::Unhealthy);

        let status = aggregate_fabric(false, &broken, [Synced], 0);
        assert_eq!(status.health, FabricHealth::Disabled);
    }

    #[test]
    fn repository_synced_only_if_all_fabrics_synced() {
        let a = aggregate_fabric(true, &healthy(), [Synced], 0);
        let b = aggregate_fabric(true, &healthy(), [Synced, Draft], 0);
        let repo = aggregate_repository([&a, &b]);
        assert_eq!(repo.sync, SyncStatus::Pending);
        assert_eq!(repo.git, ConnectionState::Healthy);

        let repo = aggregate_repository([&a]);
        assert_eq!(repo.sync, SyncStatus::Synced);
        assert_eq!(repo.fabrics, 1);
    }
}
