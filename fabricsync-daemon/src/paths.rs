use std::path::{Path, PathBuf};
use std::time::Duration;

use fabricsync_core::config::config_dir_at;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.fabricsync/`, shared with the configuration file.
pub fn fabricsync_root(home: &Path) -> PathBuf {
    config_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    fabricsync_root(home).join(DAEMON_SOCKET)
}

pub fn run_dir(home: &Path) -> PathBuf {
    fabricsync_root(home).join("run")
}

/// Directory-backed Git remotes used by [`crate::LocalClientFactory`].
pub fn remotes_root(home: &Path) -> PathBuf {
    fabricsync_root(home).join("remotes")
}

/// The inbound directory the watcher observes for a fabric.
pub fn raw_dir(fabric_root: &Path) -> PathBuf {
    fabric_root.join(fabricsync_sync::directory::RAW_DIR)
}
