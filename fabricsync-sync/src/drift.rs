//! Drift detection and reconciliation policy.
//!
//! [`classify`] compares the Git hash, the cluster hash and the Record
//! Store's hash for one resource. What to do about a one-sided drift is a
//! [`ReconcilePolicy`] decision; both-sided divergence is never auto-healed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabricsync_core::{ResolutionAction, ResourceState, SyncDirection};

/// The three-way observation for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation<'a> {
    pub state: ResourceState,
    /// Record Store hash of the desired content.
    pub record: &'a str,
    /// Hash last confirmed on all three stores.
    pub confirmed: Option<&'a str>,
    pub git: Option<&'a str>,
    pub cluster: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Git, cluster and record agree.
    InSync,
    /// Git holds the desired content; the cluster has not confirmed it yet.
    AwaitingApply,
    /// An ingested change not yet in Git.
    LocalChange,
    /// An ingested change while Git also moved independently.
    LocalConflict,
    DriftedInGit,
    DriftedInCluster,
    /// Both sides moved, to the same content.
    Converged,
    /// Both sides moved independently.
    BothDiverged,
    /// Gone from both Git and cluster.
    Orphaned,
}

impl Classification {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Classification::BothDiverged | Classification::LocalConflict
        )
    }
}

pub fn classify(obs: &Observation<'_>) -> Classification {
    use Classification::*;
    let record = Some(obs.record);
    let git_ok = obs.git == record;
    let cluster_ok = obs.cluster == record;

    match obs.state {
        ResourceState::Draft => {
            if obs.git.is_some() && !git_ok && obs.git != obs.confirmed {
                LocalConflict
            } else {
                LocalChange
            }
        }
        ResourceState::Committed | ResourceState::Pending => {
            if git_ok {
                return if cluster_ok { InSync } else { AwaitingApply };
            }
            // The cluster may still hold the previously confirmed content.
            let cluster_clean = cluster_ok || obs.cluster == obs.confirmed;
            if obs.git.is_none() && obs.cluster.is_none() {
                Orphaned
            } else if cluster_clean {
                DriftedInGit
            } else if obs.git == obs.cluster {
                Converged
            } else {
                BothDiverged
            }
        }
        ResourceState::Synced | ResourceState::Drifted | ResourceState::Orphaned => {
            match (git_ok, cluster_ok) {
                (true, true) => InSync,
                (false, true) => DriftedInGit,
                (true, false) => DriftedInCluster,
                (false, false) if obs.git.is_none() && obs.cluster.is_none() => Orphaned,
                (false, false) if obs.git == obs.cluster => Converged,
                (false, false) => BothDiverged,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Git,
    Cluster,
}

/// A one-sided drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drift {
    /// The side that moved away from the record.
    pub side: Side,
    /// The move was a deletion.
    pub deleted: bool,
}

/// What to do about a one-sided drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Remedy {
    /// Adopt Git's content and apply it to the cluster.
    AcceptGit,
    /// Adopt the cluster's content and push it to Git.
    AcceptCluster,
    /// Push the record's content back to Git.
    RestoreGit,
    /// Re-apply the record's content to the cluster.
    RestoreCluster,
    /// Propagate the deletion to the other side and tombstone the record.
    Retire,
    /// Leave the resource DRIFTED.
    Report,
}

/// Pluggable, deterministic reconciliation policy.
pub trait ReconcilePolicy: Send + Sync {
    fn remedy(&self, direction: SyncDirection, drift: Drift) -> Remedy;

    /// Resolution actions offered on an alert, most preferred first.
    fn suggested_actions(&self, direction: SyncDirection) -> Vec<ResolutionAction> {
        match direction {
            SyncDirection::ClusterToGit => vec![
                ResolutionAction::AcceptCluster,
                ResolutionAction::AcceptGit,
                ResolutionAction::Dismiss,
            ],
            SyncDirection::GitToCluster | SyncDirection::Bidirectional => vec![
                ResolutionAction::AcceptGit,
                ResolutionAction::AcceptCluster,
                ResolutionAction::Dismiss,
            ],
        }
    }
}

/// Default policy keyed on the fabric's sync direction.
///
/// * `git-to-cluster`: Git wins; Git deletions are propagated.
/// * `cluster-to-git`: the cluster wins; cluster deletions are propagated.
/// * `bidirectional`: the side that changed wins; deletions restore the
///   surviving side.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionPolicy;

impl ReconcilePolicy for DirectionPolicy {
    fn remedy(&self, direction: SyncDirection, drift: Drift) -> Remedy {
        use SyncDirection::*;
        match (drift.side, drift.deleted, direction) {
            (Side::Git, true, GitToCluster) => Remedy::Retire,
            (Side::Git, true, _) => Remedy::RestoreGit,
            (Side::Git, false, ClusterToGit) => Remedy::RestoreGit,
            (Side::Git, false, _) => Remedy::AcceptGit,
            (Side::Cluster, true, ClusterToGit) => Remedy::Retire,
            (Side::Cluster, true, _) => Remedy::RestoreCluster,
            (Side::Cluster, false, GitToCluster) => Remedy::RestoreCluster,
            (Side::Cluster, false, _) => Remedy::AcceptCluster,
        }
    }
}

/// Detect and record drift, never heal it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOnlyPolicy;

impl ReconcilePolicy for ReportOnlyPolicy {
    fn remedy(&self, _direction: SyncDirection, _drift: Drift) -> Remedy {
        Remedy::Report
    }
}

// ---------------------------------------------------------------------------
// Alert scoring
// ---------------------------------------------------------------------------

const BASE_SCORE: u32 = 2;
const DELETION_BONUS: u32 = 1;
const REFERENCED_BONUS: u32 = 2;
const MAX_PERSISTENCE_STEPS: u64 = 4;

/// Alert score for a both-sided divergence.
///
/// Grows by one per `step_mins` the divergence has persisted (capped), plus
/// a bonus when one side is a deletion and another when live resources
/// reference this one.
pub fn alert_score(
    obs: &Observation<'_>,
    divergence_since: DateTime<Utc>,
    now: DateTime<Utc>,
    step_mins: u64,
    referrers: usize,
) -> u32 {
    let mut score = BASE_SCORE;
    if obs.git.is_none() || obs.cluster.is_none() {
        score += DELETION_BONUS;
    }
    if step_mins > 0 {
        let minutes = (now - divergence_since).num_minutes().max(0) as u64;
        score += (minutes / step_mins).min(MAX_PERSISTENCE_STEPS) as u32;
    }
    if referrers > 0 {
        score += REFERENCED_BONUS;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fabricsync_core::AlertPriority;
    use rstest::rstest;
    use Classification::*;
    use ResourceState::*;
    use Classification::Orphaned;

    fn obs<'a>(
        state: ResourceState,
        confirmed: Option<&'a str>,
        git: Option<&'a str>,
        cluster: Option<&'a str>,
    ) -> Observation<'a> {
        Observation {
            state,
            record: "h",
            confirmed,
            git,
            cluster,
        }
    }

    #[rstest]
    #[case(Synced, Some("h"), Some("h"), InSync)]
    #[case(Synced, Some("g"), Some("h"), DriftedInGit)]
    #[case(Synced, None, Some("h"), DriftedInGit)]
    #[case(Synced, Some("h"), Some("c"), DriftedInCluster)]
    #[case(Synced, Some("h"), None, DriftedInCluster)]
    #[case(Synced, Some("x"), Some("x"), Converged)]
    #[case(Synced, Some("g"), Some("c"), BothDiverged)]
    #[case(Synced, None, Some("c"), BothDiverged)]
    #[case(Synced, None, None, Orphaned)]
    #[case(Drifted, Some("g"), Some("c"), BothDiverged)]
    #[case(Drifted, Some("h"), Some("h"), InSync)]
    fn settled_states(
        #[case] state: ResourceState,
        #[case] git: Option<&str>,
        #[case] cluster: Option<&str>,
        #[case] expected: Classification,
    ) {
        assert_eq!(classify(&obs(state, Some("h"), git, cluster)), expected);
    }

    #[rstest]
    #[case(Some("h"), None, AwaitingApply)]
    #[case(Some("h"), Some("old"), AwaitingApply)]
    #[case(Some("h"), Some("h"), InSync)]
    #[case(Some("g"), Some("old"), DriftedInGit)]
    #[case(Some("g"), Some("h"), DriftedInGit)]
    #[case(Some("g"), Some("g"), Converged)]
    #[case(Some("g"), Some("c"), BothDiverged)]
    #[case(None, None, Orphaned)]
    fn in_flight_states(
        #[case] git: Option<&str>,
        #[case] cluster: Option<&str>,
        #[case] expected: Classification,
    ) {
        for state in [Committed, Pending] {
            assert_eq!(classify(&obs(state, Some("old"), git, cluster)), expected);
        }
    }

    #[rstest]
    #[case(None, None, LocalChange)]
    #[case(Some("old"), Some("old"), LocalChange)]
    #[case(Some("old"), Some("h"), LocalChange)]
    #[case(Some("old"), Some("other"), LocalConflict)]
    #[case(None, Some("other"), LocalConflict)]
    fn drafts(
        #[case] confirmed: Option<&str>,
        #[case] git: Option<&str>,
        #[case] expected: Classification,
    ) {
        assert_eq!(classify(&obs(Draft, confirmed, git, None)), expected);
    }

    #[rstest]
    #[case(SyncDirection::GitToCluster, Side::Cluster, false, Remedy::RestoreCluster)]
    #[case(SyncDirection::GitToCluster, Side::Cluster, true, Remedy::RestoreCluster)]
    #[case(SyncDirection::GitToCluster, Side::Git, false, Remedy::AcceptGit)]
    #[case(SyncDirection::GitToCluster, Side::Git, true, Remedy::Retire)]
    #[case(SyncDirection::ClusterToGit, Side::Git, false, Remedy::RestoreGit)]
    #[case(SyncDirection::ClusterToGit, Side::Git, true, Remedy::RestoreGit)]
    #[case(SyncDirection::ClusterToGit, Side::Cluster, false, Remedy::AcceptCluster)]
    #[case(SyncDirection::ClusterToGit, Side::Cluster, true, Remedy::Retire)]
    #[case(SyncDirection::Bidirectional, Side::Git, false, Remedy::AcceptGit)]
    #[case(SyncDirection::Bidirectional, Side::Cluster, false, Remedy::AcceptCluster)]
    #[case(SyncDirection::Bidirectional, Side::Git, true, Remedy::RestoreGit)]
    #[case(SyncDirection::Bidirectional, Side::Cluster, true, Remedy::RestoreCluster)]
    fn direction_policy(
        #[case] direction: SyncDirection,
        #[case] side: Side,
        #[case] deleted: bool,
        #[case] expected: Remedy,
    ) {
        assert_eq!(
            DirectionPolicy.remedy(direction, Drift { side, deleted }),
            expected
        );
    }

    #[test]
    fn suggested_actions_prefer_the_winning_side() {
        assert_eq!(
            DirectionPolicy.suggested_actions(SyncDirection::ClusterToGit)[0],
            ResolutionAction::AcceptCluster
        );
        assert_eq!(
            DirectionPolicy.suggested_actions(SyncDirection::GitToCluster)[0],
            ResolutionAction::AcceptGit
        );
    }

    #[test]
    fn score_grows_with_persistence_and_references() {
        let now = Utc::now();
        let o = obs(Synced, Some("h"), Some("g"), Some("c"));
        let fresh = alert_score(&o, now, now, 60, 0);
        assert_eq!(AlertPriority::from_score(fresh), AlertPriority::Medium);

        let old = alert_score(&o, now - Duration::hours(3), now, 60, 0);
        assert_eq!(old, fresh + 3);

        let referenced = alert_score(&o, now, now, 60, 2);
        assert_eq!(AlertPriority::from_score(referenced), AlertPriority::High);

        let capped = alert_score(&o, now - Duration::days(30), now, 60, 1);
        assert_eq!(AlertPriority::from_score(capped), AlertPriority::Critical);
    }
}
