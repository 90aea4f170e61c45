use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fabricsync_core::{
    aggregate_repository, config, AlertId, ConfigError, FabricConfig, FabricId, FabricStatus,
    GitRepository, ReconciliationAlert, RepositoryId, ResolutionAction, SyncOperation,
};
use fabricsync_sync::{
    CancelFlag, ClusterApi, GitRemote, LocalRemote, MemoryCluster, RecordStore, SyncEngine,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{raw_dir, remotes_root, run_dir, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Builds the Git and cluster clients a fabric's engine talks to.
pub trait ClientFactory: Send + Sync {
    fn git(
        &self,
        fabric: &FabricConfig,
        repository: &GitRepository,
    ) -> Result<Arc<dyn GitRemote>, DaemonError>;

    fn cluster(&self, fabric: &FabricConfig) -> Result<Arc<dyn ClusterApi>, DaemonError>;
}

/// Directory-backed remotes under `<home>/.fabricsync/remotes/<repository>`
/// and one in-memory cluster per fabric.
#[derive(Debug, Clone)]
pub struct LocalClientFactory {
    remotes: PathBuf,
}

impl LocalClientFactory {
    pub fn new(home: &Path) -> Self {
        Self {
            remotes: remotes_root(home),
        }
    }
}

impl ClientFactory for LocalClientFactory {
    fn git(
        &self,
        _fabric: &FabricConfig,
        repository: &GitRepository,
    ) -> Result<Arc<dyn GitRemote>, DaemonError> {
        Ok(Arc::new(LocalRemote::new(
            self.remotes.join(&repository.id.0),
            repository,
        )))
    }

    fn cluster(&self, _fabric: &FabricConfig) -> Result<Arc<dyn ClusterApi>, DaemonError> {
        Ok(Arc::new(MemoryCluster::new()))
    }
}

/// Result of a sync request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed { operation: SyncOperation },
    /// A run for the fabric was already in flight; this request joined it.
    Coalesced,
}

struct FabricHandle {
    config: FabricConfig,
    engine: Mutex<SyncEngine>,
    records: Arc<RecordStore>,
    cancel: CancelFlag,
    last_sync_at_unix: AtomicU64,
}

impl FabricHandle {
    fn new(config: FabricConfig, engine: SyncEngine) -> Self {
        Self {
            config,
            records: engine.records(),
            cancel: engine.cancel_flag(),
            engine: Mutex::new(engine),
            last_sync_at_unix: AtomicU64::new(0),
        }
    }

    fn status(&self) -> FabricStatus {
        self.records.status(self.config.sync_enabled)
    }

    async fn sync(&self, source: &'static str) -> Result<SyncOutcome, DaemonError> {
        let Ok(mut engine) = self.engine.try_lock() else {
            debug!(fabric = %self.config.id, source, "sync already in flight, coalesced");
            return Ok(SyncOutcome::Coalesced);
        };
        if self.cancel.is_cancelled() {
            return Err(DaemonError::UnknownFabric(self.config.id.0.clone()));
        }
        let operation = engine.run().await?;
        self.last_sync_at_unix
            .store(unix_seconds_now(), Ordering::SeqCst);
        info!(
            fabric = %self.config.id,
            source,
            operation = %operation.id,
            outcome = ?operation.outcome,
            "sync run finished",
        );
        Ok(SyncOutcome::Completed { operation })
    }
}

/// Live state shared by the daemon tasks: one engine per configured fabric.
pub struct Daemon {
    home: PathBuf,
    fabrics: RwLock<HashMap<FabricId, Arc<FabricHandle>>>,
    repositories: Vec<RepositoryId>,
    started_at_unix: u64,
}

impl Daemon {
    /// Open an engine for every fabric in `<home>/.fabricsync/config.yaml`.
    pub fn load(home: &Path, factory: &dyn ClientFactory) -> Result<Self, DaemonError> {
        let config = config::load_or_default_at(home)?;
        config::validate(&config)?;

        let mut fabrics = HashMap::new();
        for fabric in &config.fabrics {
            let repository =
                config
                    .repository(&fabric.repository)
                    .ok_or_else(|| ConfigError::UnknownRepository {
                        fabric: fabric.id.clone(),
                        repository: fabric.repository.clone(),
                    })?;
            let engine = SyncEngine::open(
                fabric.clone(),
                repository.clone(),
                config.engine.clone(),
                factory.git(fabric, repository)?,
                factory.cluster(fabric)?,
            )?;
            fabrics.insert(
                fabric.id.clone(),
                Arc::new(FabricHandle::new(fabric.clone(), engine)),
            );
        }
        info!(fabrics = fabrics.len(), "loaded fabric engines");

        Ok(Self {
            home: home.to_path_buf(),
            fabrics: RwLock::new(fabrics),
            repositories: config.repositories.iter().map(|r| r.id.clone()).collect(),
            started_at_unix: unix_seconds_now(),
        })
    }

    async fn handle(&self, id: &FabricId) -> Result<Arc<FabricHandle>, DaemonError> {
        self.fabrics
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::UnknownFabric(id.0.clone()))
    }

    pub async fn fabric_ids(&self) -> Vec<FabricId> {
        let mut ids: Vec<FabricId> = self.fabrics.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Enabled fabrics and their sync periods.
    async fn schedules(&self) -> Vec<(FabricId, Duration)> {
        let mut out: Vec<(FabricId, Duration)> = self
            .fabrics
            .read()
            .await
            .values()
            .filter(|h| h.config.sync_enabled)
            .map(|h| (h.config.id.clone(), h.config.sync_interval()))
            .collect();
        out.sort();
        out
    }

    /// `(raw directory, fabric)` pairs for the watcher.
    async fn raw_dirs(&self) -> Vec<(PathBuf, FabricId)> {
        self.fabrics
            .read()
            .await
            .values()
            .map(|h| (raw_dir(&h.config.root), h.config.id.clone()))
            .collect()
    }

    /// Run a sync for `id` unless one is already in flight.
    pub async fn sync(&self, id: &FabricId, source: &'static str) -> Result<SyncOutcome, DaemonError> {
        self.handle(id).await?.sync(source).await
    }

    /// Sync every fabric in turn; per-fabric failures are reported inline.
    pub async fn sync_all(&self, source: &'static str) -> Value {
        let mut results = Vec::new();
        for id in self.fabric_ids().await {
            let entry = match self.sync(&id, source).await {
                Ok(outcome) => json!({ "fabric": id, "outcome": outcome }),
                Err(err) => json!({ "fabric": id, "error": err.to_string() }),
            };
            results.push(entry);
        }
        Value::Array(results)
    }

    pub async fn alerts(&self, id: &FabricId) -> Result<Vec<ReconciliationAlert>, DaemonError> {
        Ok(self.handle(id).await?.records.alerts(false))
    }

    /// Resolve an alert. Waits for any in-flight run of the fabric.
    pub async fn resolve(
        &self,
        id: &FabricId,
        alert: AlertId,
        action: ResolutionAction,
    ) -> Result<(), DaemonError> {
        let handle = self.handle(id).await?;
        let mut engine = handle.engine.lock().await;
        engine.resolve_alert(alert, action).await?;
        info!(fabric = %id, alert = %alert, ?action, "alert resolved");
        Ok(())
    }

    /// Stop tracking a fabric: cancel its in-flight run, tombstone its
    /// records and drop it from the configuration. Returns the number of
    /// records tombstoned.
    pub async fn delete(&self, id: &FabricId) -> Result<usize, DaemonError> {
        let handle = self
            .fabrics
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DaemonError::UnknownFabric(id.0.clone()))?;
        handle.cancel.cancel();

        let mut engine = handle.engine.lock().await;
        let tombstoned = engine.delete_fabric()?;
        config::remove_fabric_at(&self.home, id)?;
        info!(fabric = %id, tombstoned, "fabric deleted");
        Ok(tombstoned)
    }

    pub async fn status_payload(&self) -> Value {
        let handles: Vec<Arc<FabricHandle>> = {
            let fabrics = self.fabrics.read().await;
            let mut v: Vec<Arc<FabricHandle>> = fabrics.values().cloned().collect();
            v.sort_by(|a, b| a.config.id.cmp(&b.config.id));
            v
        };

        let mut by_repository: HashMap<RepositoryId, Vec<FabricStatus>> = HashMap::new();
        let mut fabrics = Vec::new();
        let mut last_sync_at_unix = 0;
        for handle in &handles {
            let status = handle.status();
            let last_sync = handle.last_sync_at_unix.load(Ordering::SeqCst);
            last_sync_at_unix = last_sync_at_unix.max(last_sync);
            fabrics.push(json!({
                "id": handle.config.id,
                "name": handle.config.name,
                "repository": handle.config.repository,
                "last_sync_at_unix": last_sync,
                "status": status,
            }));
            by_repository
                .entry(handle.config.repository.clone())
                .or_default()
                .push(status);
        }

        let repositories: Vec<Value> = self
            .repositories
            .iter()
            .map(|id| {
                let statuses = by_repository.get(id).map(Vec::as_slice).unwrap_or(&[]);
                json!({ "id": id, "status": aggregate_repository(statuses) })
            })
            .collect();

        json!({
            "running": true,
            "started_at_unix": self.started_at_unix,
            "last_sync_at_unix": last_sync_at_unix,
            "fabrics": fabrics,
            "repositories": repositories,
            "socket": socket_path(&self.home).display().to_string(),
        })
    }
}

/// Start the daemon with local clients and block until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let factory = Arc::new(LocalClientFactory::new(home));
    runtime.block_on(run(home.to_path_buf(), factory))
}

/// Run the daemon until `stop`, ctrl-c or a task failure.
pub async fn run(home: PathBuf, factory: Arc<dyn ClientFactory>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let daemon = Arc::new(Daemon::load(&home, factory.as_ref())?);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let mut tasks = Vec::new();

    for (id, period) in daemon.schedules().await {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        tasks.push((
            "scheduler",
            tokio::spawn(async move {
                let result = scheduler_task(daemon, id, period, shutdown.subscribe()).await;
                if result.is_err() {
                    let _ = shutdown.send(());
                }
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        tasks.push((
            "watcher",
            tokio::spawn(async move {
                let result = watcher_task(daemon, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        let home = home.clone();
        tasks.push((
            "socket_server",
            tokio::spawn(async move {
                let result =
                    socket_server_task(home, daemon, shutdown.clone(), shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        tasks.push((
            "signal_handler",
            tokio::spawn(async move {
                let mut shutdown_rx = shutdown.subscribe();
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok(()),
                    signal = tokio::signal::ctrl_c() => match signal {
                        Ok(()) => {
                            info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    },
                }
            }),
        ));
    }

    for (name, task) in tasks {
        handle_join(name, task.await)?;
    }
    info!("daemon stopped");
    Ok(())
}

async fn scheduler_task(
    daemon: Arc<Daemon>,
    id: FabricId,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => match daemon.sync(&id, "schedule").await {
                Ok(_) => {}
                Err(DaemonError::UnknownFabric(_)) => {
                    debug!(fabric = %id, "fabric removed, scheduler exiting");
                    break;
                }
                Err(err) => error!(fabric = %id, error = %err, "scheduled sync failed"),
            },
        }
    }
    Ok(())
}

async fn watcher_task(
    daemon: Arc<Daemon>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut watched = Vec::new();
    for (raw, id) in daemon.raw_dirs().await {
        fs::create_dir_all(&raw).map_err(|e| io_err(&raw, e))?;
        // Events arrive with canonical paths on some platforms.
        let raw = fs::canonicalize(&raw).map_err(|e| io_err(&raw, e))?;
        watcher.watch(&raw, RecursiveMode::Recursive)?;
        debug!(fabric = %id, path = %raw.display(), "watching raw directory");
        watched.push((raw, id));
    }

    let mut pending = HashMap::<FabricId, Instant>::new();

    loop {
        let next_due = pending.values().min().copied();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until_due(next_due) => {
                for id in take_due(&mut pending, Instant::now()) {
                    let daemon = daemon.clone();
                    tokio::spawn(async move {
                        match daemon.sync(&id, "watcher").await {
                            Ok(_) => {}
                            Err(DaemonError::UnknownFabric(_)) => {}
                            Err(err) => error!(fabric = %id, error = %err, "watcher-triggered sync failed"),
                        }
                    });
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if !is_inbound_file(&path) {
                        continue;
                    }
                    if let Some(id) = fabric_for_path(&watched, &path) {
                        note_event(&mut pending, id, Instant::now());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, daemon, shutdown_tx).await {
                        error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&daemon, &request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Execute one socket command against the daemon.
pub async fn dispatch(
    daemon: &Daemon,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    match execute(daemon, request, shutdown_tx).await {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn execute(
    daemon: &Daemon,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Value, DaemonError> {
    match request.cmd.as_str() {
        "status" => Ok(daemon.status_payload().await),
        "sync" => match &request.fabric {
            Some(fabric) => {
                let outcome = daemon.sync(&FabricId::from(fabric.as_str()), "socket").await?;
                Ok(json!(outcome))
            }
            None => Ok(daemon.sync_all("socket").await),
        },
        "alerts" => {
            let fabric = required_fabric(request)?;
            Ok(json!(daemon.alerts(&fabric).await?))
        }
        "resolve" => {
            let fabric = required_fabric(request)?;
            let alert = request
                .alert
                .map(AlertId)
                .ok_or_else(|| DaemonError::Protocol("'resolve' requires an alert id".to_string()))?;
            let action = request
                .action
                .ok_or_else(|| DaemonError::Protocol("'resolve' requires an action".to_string()))?;
            daemon.resolve(&fabric, alert, action).await?;
            Ok(json!({ "fabric": fabric, "alert": alert.0, "action": action }))
        }
        "delete" => {
            let fabric = required_fabric(request)?;
            let tombstoned = daemon.delete(&fabric).await?;
            Ok(json!({ "fabric": fabric, "tombstoned": tombstoned }))
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn required_fabric(request: &DaemonRequest) -> Result<FabricId, DaemonError> {
    request
        .fabric
        .as_deref()
        .map(FabricId::from)
        .ok_or_else(|| DaemonError::Protocol(format!("'{}' requires a fabric", request.cmd)))
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Regular, non-hidden files only. Files moved out of `raw/` during
/// ingestion no longer exist by the time their event arrives.
fn is_inbound_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));
    !hidden && path.is_file()
}

fn fabric_for_path(watched: &[(PathBuf, FabricId)], path: &Path) -> Option<FabricId> {
    watched
        .iter()
        .find(|(raw, _)| path.starts_with(raw))
        .map(|(_, id)| id.clone())
}

fn note_event(pending: &mut HashMap<FabricId, Instant>, id: FabricId, now: Instant) {
    note_event_with_window(pending, id, now, DEBOUNCE_WINDOW);
}

/// Trailing debounce: every event pushes the fabric's deadline out by
/// `window`, so a burst of drops produces one sync once it goes quiet.
fn note_event_with_window(
    pending: &mut HashMap<FabricId, Instant>,
    id: FabricId,
    now: Instant,
    window: Duration,
) {
    pending.insert(id, now + window);
}

fn take_due(pending: &mut HashMap<FabricId, Instant>, now: Instant) -> Vec<FabricId> {
    let mut due: Vec<FabricId> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(id, _)| id.clone())
        .collect();
    due.sort();
    for id in &due {
        pending.remove(id);
    }
    due
}

async fn sleep_until_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "daemon socket already in use: {}",
            socket.display()
        )));
    }
    warn!(socket = %socket.display(), "removing stale daemon socket before bind");

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [remotes_root(home), run_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filters (default `info`); `FABRICSYNC_LOG_FORMAT=json` switches
/// to one JSON object per line.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FABRICSYNC_LOG_FORMAT").is_ok_and(|v| v == "json");
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
