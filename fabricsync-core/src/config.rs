//! YAML configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fabricsync/
//!   config.yaml      (repositories, fabrics, engine tuning, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{Config, FabricConfig, FabricId, GitRepository, RepositoryId};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.fabricsync/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".fabricsync")
}

/// `<home>/.fabricsync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the configuration.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    validate(&config)?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load the configuration, or an empty default when none exists yet.
pub fn load_or_default_at(home: &Path) -> Result<Config, ConfigError> {
    match load_at(home) {
        Err(ConfigError::ConfigNotFound { .. }) => Ok(Config::default()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the configuration.
///
/// Write flow: validate → serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    validate(config)?;
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Validation
// ---------------------------------------------------------------------------

/// Structural checks: unique ids, every binding resolvable, non-zero intervals.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut repos = HashSet::new();
    for repo in &config.repositories {
        if !repos.insert(&repo.id) {
            return Err(ConfigError::DuplicateRepository(repo.id.clone()));
        }
    }

    let mut fabrics = HashSet::new();
    for fabric in &config.fabrics {
        if !fabrics.insert(&fabric.id) {
            return Err(ConfigError::DuplicateFabric(fabric.id.clone()));
        }
        if !repos.contains(&fabric.repository) {
            return Err(ConfigError::UnknownRepository {
                fabric: fabric.id.clone(),
                repository: fabric.repository.clone(),
            });
        }
        if fabric.sync_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval(fabric.id.clone()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Edits
// ---------------------------------------------------------------------------

/// Add or replace a repository binding, then save.
pub fn upsert_repository_at(home: &Path, repository: GitRepository) -> Result<Config, ConfigError> {
    let mut config = load_or_default_at(home)?;
    match config.repositories.iter_mut().find(|r| r.id == repository.id) {
        Some(existing) => *existing = repository,
        None => config.repositories.push(repository),
    }
    save_at(home, &config)?;
    Ok(config)
}

/// Remove a repository. Refuses while any fabric is still bound to it.
pub fn remove_repository_at(home: &Path, id: &RepositoryId) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    let users: Vec<FabricId> = config
        .fabrics_using(id)
        .into_iter()
        .map(|f| f.id.clone())
        .collect();
    if !users.is_empty() {
        return Err(ConfigError::RepositoryInUse {
            repository: id.clone(),
            fabrics: users,
        });
    }
    config.repositories.retain(|r| &r.id != id);
    save_at(home, &config)?;
    Ok(config)
}

/// Onboard a fabric. Fails if the id exists or its repository is unknown.
pub fn add_fabric_at(home: &Path, fabric: FabricConfig) -> Result<Config, ConfigError> {
    let mut config = load_or_default_at(home)?;
    if config.fabric(&fabric.id).is_some() {
        return Err(ConfigError::DuplicateFabric(fabric.id));
    }
    config.fabrics.push(fabric);
    save_at(home, &config)?;
    Ok(config)
}

/// Drop a fabric from the configuration. Its records are tombstoned by the
/// sync engine, not here.
pub fn remove_fabric_at(home: &Path, id: &FabricId) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    if config.fabric(id).is_none() {
        return Err(ConfigError::UnknownFabric(id.clone()));
    }
    config.fabrics.retain(|f| &f.id != id);
    save_at(home, &config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
