//! Error types for fabricsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FabricId, RepositoryId, ResourceState};

/// All errors that can arise from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.fabricsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The configuration file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("duplicate fabric id '{0}'")]
    DuplicateFabric(FabricId),

    #[error("duplicate repository id '{0}'")]
    DuplicateRepository(RepositoryId),

    #[error("fabric '{fabric}' references unknown repository '{repository}'")]
    UnknownRepository {
        fabric: FabricId,
        repository: RepositoryId,
    },

    #[error("unknown fabric '{0}'")]
    UnknownFabric(FabricId),

    /// A repository binding cannot be dropped while fabrics still use it.
    #[error("repository '{repository}' is still referenced by {} fabric(s)", fabrics.len())]
    RepositoryInUse {
        repository: RepositoryId,
        fabrics: Vec<FabricId>,
    },

    #[error("fabric '{0}' has a zero sync interval")]
    ZeroInterval(FabricId),
}

/// An invalid lifecycle transition was attempted.
///
/// This is a logic fault in the caller; it is never corrected automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid resource state transition {from} -> {to}")]
pub struct StateError {
    pub from: ResourceState,
    pub to: ResourceState,
}
