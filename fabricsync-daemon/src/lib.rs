//! fabricsync daemon: schedules sync runs per fabric, watches each fabric's
//! `raw/` directory and serves a JSON-lines control socket.
//!
//! Socket commands: `status`, `sync`, `alerts`, `resolve`, `delete`, `stop`.

pub mod error;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_alerts, request_delete, request_resolve, request_status, request_stop, request_sync,
    send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    dispatch, init_tracing, run, start_blocking, ClientFactory, Daemon, LocalClientFactory,
    SyncOutcome,
};
