//! Error types for fabricsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use fabricsync_core::{AlertId, ResourceId, ResourceKey, StateError};
use fabricsync_manifest::ValidationError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local I/O failure, annotated with the path.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file that is not UTF-8 text. Rejected per file, never fatal.
    #[error("{0} is not valid UTF-8 text")]
    NotText(PathBuf),

    /// A path resolved outside the fabric root.
    #[error("path escapes fabric root: {0}")]
    PathEscapesRoot(PathBuf),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Credentials rejected by the Git host. Never retried blindly.
    #[error("git authentication failed: {0}")]
    GitAuth(String),

    /// The remote advanced past the head the push was based on.
    #[error("git remote advanced: expected head {expected:?}, found {found:?}")]
    GitConflict {
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("git host rate limited the request")]
    GitRateLimited { retry_after_secs: Option<u64> },

    #[error("git transient failure: {0}")]
    GitTransient(String),

    #[error("cluster connection failed: {0}")]
    ClusterConnection(String),

    #[error(transparent)]
    State(#[from] StateError),

    /// Git and cluster both moved away from the record; needs an operator.
    #[error("both git and cluster diverged for {0}")]
    ConflictUnresolvable(ResourceKey),

    #[error("sync run cancelled")]
    Cancelled,

    #[error("resource {0} is already tracked")]
    AlreadyTracked(ResourceKey),

    #[error("resource {0} is still present in git or cluster")]
    NotOrphaned(ResourceKey),

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("unknown alert {0}")]
    UnknownAlert(AlertId),

    #[error("alert {0} is already resolved")]
    AlertClosed(AlertId),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Worth retrying with backoff within the same run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::GitTransient(_)
                | SyncError::GitRateLimited { .. }
                | SyncError::ClusterConnection(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::GitAuth(_))
    }
}

/// Convenience constructor for [`SyncError::Storage`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Storage {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::ClusterConnection("refused".into()).is_transient());
        assert!(SyncError::GitRateLimited {
            retry_after_secs: Some(30)
        }
        .is_transient());
        assert!(!SyncError::GitAuth("expired".into()).is_transient());
        assert!(SyncError::GitAuth("expired".into()).is_auth());
        assert!(!SyncError::GitConflict {
            expected: None,
            found: Some("abc".into())
        }
        .is_transient());
    }
}
