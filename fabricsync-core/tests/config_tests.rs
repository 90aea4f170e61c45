//! Config error-message, atomic-write-safety, and edit integration tests.

use assert_fs::prelude::*;
use fabricsync_core::{
    config, ConfigError, Config, FabricConfig, FabricId, GitRepository, RepositoryId,
    SyncDirection,
};
use predicates::prelude::predicate;
use std::fs;
use std::path::PathBuf;

fn repo() -> GitRepository {
    GitRepository {
        id: RepositoryId::from("gitops"),
        url: "file:///srv/git/gitops".into(),
        branch: "main".into(),
        path_prefix: "fabrics/dc1".into(),
        push_enabled: true,
        author_name: "fabricsync".into(),
        author_email: "fabricsync@example.com".into(),
        credential_ref: Some("gitops-token".into()),
    }
}

fn fabric(id: &str) -> FabricConfig {
    FabricConfig {
        id: FabricId::from(id),
        name: id.to_string(),
        repository: RepositoryId::from("gitops"),
        root: PathBuf::from("/srv/fabrics").join(id),
        sync_interval_secs: 120,
        sync_enabled: true,
        sync_direction: SyncDirection::Bidirectional,
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".fabricsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_missing_direction_is_a_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fabricsync/config.yaml")
        .write_str(
            "version: 1\nrepositories:\n  - id: gitops\n    url: file:///x\n    author_name: a\n    author_email: a@b\nfabrics:\n  - id: dc1\n    name: dc1\n    repository: gitops\n    root: /tmp/dc1\n",
        )
        .expect("write");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn defaults_fill_optional_fields() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fabricsync/config.yaml")
        .write_str(
            "version: 1\nrepositories:\n  - id: gitops\n    url: file:///x\n    author_name: a\n    author_email: a@b\nfabrics:\n  - id: dc1\n    name: dc1\n    repository: gitops\n    root: /tmp/dc1\n    sync_direction: cluster-to-git\n",
        )
        .expect("write");
    let cfg = config::load_at(home.path()).expect("load");
    let repo = &cfg.repositories[0];
    assert_eq!(repo.branch, "main");
    assert!(repo.push_enabled);
    let fabric = &cfg.fabrics[0];
    assert_eq!(fabric.sync_interval_secs, 300);
    assert!(fabric.sync_enabled);
    assert_eq!(fabric.sync_direction, SyncDirection::ClusterToGit);
    assert_eq!(cfg.engine.retry.max_attempts, 4);
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_leaves_no_tmp_and_is_private() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = Config {
        repositories: vec![repo()],
        fabrics: vec![fabric("dc1")],
        ..Config::default()
    };
    config::save_at(home.path(), &cfg).expect("save");

    home.child(".fabricsync/config.yaml").assert(predicate::path::exists());
    home.child(".fabricsync/config.yaml.tmp")
        .assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(config::config_path_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn invalid_config_is_never_written() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = Config {
        fabrics: vec![fabric("dc1")],
        ..Config::default()
    };
    assert!(config::save_at(home.path(), &cfg).is_err());
    home.child(".fabricsync/config.yaml")
        .assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 3. Edits
// ---------------------------------------------------------------------------

#[test]
fn one_repository_can_back_several_fabrics() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::upsert_repository_at(home.path(), repo()).expect("repo");
    config::add_fabric_at(home.path(), fabric("dc1")).expect("dc1");
    let cfg = config::add_fabric_at(home.path(), fabric("dc2")).expect("dc2");

    assert_eq!(cfg.fabrics_using(&RepositoryId::from("gitops")).len(), 2);
    assert_eq!(
        cfg.repository_for(&FabricId::from("dc2")).map(|r| r.url.as_str()),
        Some("file:///srv/git/gitops")
    );
}

#[test]
fn duplicate_fabric_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::upsert_repository_at(home.path(), repo()).expect("repo");
    config::add_fabric_at(home.path(), fabric("dc1")).expect("dc1");
    let err = config::add_fabric_at(home.path(), fabric("dc1")).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateFabric(_)));
}

#[test]
fn zero_interval_is_rejected() {
    let mut f = fabric("dc1");
    f.sync_interval_secs = 0;
    let cfg = Config {
        repositories: vec![repo()],
        fabrics: vec![f],
        ..Config::default()
    };
    assert!(matches!(
        config::validate(&cfg),
        Err(ConfigError::ZeroInterval(_))
    ));
}
