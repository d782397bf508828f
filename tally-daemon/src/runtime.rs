use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use tally_core::{config, EntityId, SyncStatus};
use tally_sync::orchestrator::{SyncOrchestrator, SyncResult};
use tally_sync::pipeline::{self, BatchReport, Services, SyncScope};
use tally_sync::{AckMessage, SyncError};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncTarget {
    Due,
    Entity(EntityId),
}

impl SyncTarget {
    fn scope(&self, now: DateTime<Utc>) -> SyncScope {
        match self {
            SyncTarget::Due => SyncScope::Due { now },
            SyncTarget::Entity(id) => SyncScope::Entity(id.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            SyncTarget::Due => "due".to_string(),
            SyncTarget::Entity(id) => id.0.clone(),
        }
    }
}

struct SyncJob {
    target: SyncTarget,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<PassSummary, String>>>,
}

/// Outcome of one sync pass, as reported over the socket and in `status`.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub target: String,
    pub source: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub not_ready: usize,
    pub failed: usize,
    /// Ids left alone because another pass was already syncing them.
    pub skipped: Vec<EntityId>,
    pub report: BatchReport,
    pub finished_at_unix: u64,
    pub duration_ms: u128,
}

/// State shared by the processor and the socket server.
struct DaemonState {
    started_at_unix: u64,
    in_flight: Mutex<HashSet<EntityId>>,
    last_pass: RwLock<Option<PassSummary>>,
}

impl DaemonState {
    fn new(started_at_unix: u64) -> Self {
        Self {
            started_at_unix,
            in_flight: Mutex::new(HashSet::new()),
            last_pass: RwLock::new(None),
        }
    }

    /// Mark `id` as being synced. False when a sync for it is already running.
    async fn claim(&self, id: &EntityId) -> bool {
        self.in_flight.lock().await.insert(id.clone())
    }

    async fn release(&self, id: &EntityId) {
        self.in_flight.lock().await.remove(id);
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime against the configured feed, store and outbox.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let services = {
        let home = home.clone();
        tokio::task::spawn_blocking(move || Services::open(&config, &home))
            .await
            .map_err(|err| DaemonError::Protocol(format!("startup join error: {err}")))??
    };
    serve(home, services).await
}

async fn serve(home: PathBuf, services: Services) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = Arc::new(DaemonState::new(unix_seconds_now()));
    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        socket = %socket_path(&home).display(),
        interval_secs = services.settings.interval_secs,
        max_concurrent_fetches = services.settings.max_concurrent_fetches,
        "daemon starting",
    );

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let sync_tx = sync_tx.clone();
        let interval = Duration::from_secs(services.settings.interval_secs.max(1));
        tokio::spawn(async move {
            let result = scheduler_task(interval, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let services = services.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                sync_processor_task(services, state, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let services = services.clone();
        let state = state.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                services,
                state,
                sync_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, processor_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Enqueue a due pass on every tick. The first tick fires immediately.
async fn scheduler_task(
    period: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let job = SyncJob {
                    target: SyncTarget::Due,
                    source: "scheduler",
                    respond_to: None,
                };
                if sync_tx.send(job).await.is_err() {
                    tracing::debug!("sync queue closed, scheduler exiting");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn sync_processor_task(
    services: Services,
    state: Arc<DaemonState>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let permits = Arc::new(Semaphore::new(
        services.settings.max_concurrent_fetches.max(1),
    ));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                tokio::spawn(run_job(
                    services.clone(),
                    state.clone(),
                    permits.clone(),
                    job,
                ));
            }
        }
    }

    Ok(())
}

async fn run_job(
    services: Services,
    state: Arc<DaemonState>,
    permits: Arc<Semaphore>,
    job: SyncJob,
) {
    let started = Instant::now();
    let scope = job.target.scope(Utc::now());
    let outcome = run_pass(&services, &state, &permits, scope).await;

    let outcome = match outcome {
        Ok((report, skipped)) => {
            let summary =
                build_pass_summary(&job.target, job.source, report, skipped, started.elapsed());
            tracing::info!(
                target = %summary.target,
                source = %summary.source,
                created = summary.created,
                updated = summary.updated,
                unchanged = summary.unchanged,
                not_ready = summary.not_ready,
                failed = summary.failed,
                skipped = summary.skipped.len(),
                duration_ms = summary.duration_ms,
                "sync pass completed",
            );
            *state.last_pass.write().await = Some(summary.clone());
            Ok(summary)
        }
        Err(err) => {
            tracing::error!(
                target = %job.target.label(),
                source = job.source,
                error = %err,
                "sync pass failed",
            );
            Err(err.to_string())
        }
    };

    if let Some(respond_to) = job.respond_to {
        let _ = respond_to.send(outcome);
    }
}

/// Sync every id of `scope` on the worker pool. Ids already in flight are
/// returned as skipped. A store failure is returned once every worker of
/// the pass has finished.
async fn run_pass(
    services: &Services,
    state: &Arc<DaemonState>,
    permits: &Arc<Semaphore>,
    scope: SyncScope,
) -> Result<(BatchReport, Vec<EntityId>), DaemonError> {
    let ids = {
        let services = services.clone();
        tokio::task::spawn_blocking(move || pipeline::resolve(&services, &scope))
            .await
            .map_err(|err| DaemonError::Protocol(format!("resolve join error: {err}")))??
    };

    let mut skipped = Vec::new();
    let mut workers = JoinSet::new();
    for id in ids {
        if !state.claim(&id).await {
            tracing::debug!(id = %id, "already in flight, skipped");
            skipped.push(id);
            continue;
        }
        let orchestrator = Arc::clone(&services.orchestrator);
        let permits = Arc::clone(permits);
        let state = Arc::clone(state);
        workers.spawn(async move {
            let outcome = sync_entity(orchestrator, permits, id.clone()).await;
            state.release(&id).await;
            (id, outcome)
        });
    }

    let mut report = BatchReport::default();
    let mut fatal: Option<DaemonError> = None;
    while let Some(joined) = workers.join_next().await {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(err) => {
                fatal.get_or_insert(DaemonError::Protocol(format!(
                    "sync worker join error: {err}"
                )));
                continue;
            }
        };
        let recorded = outcome.and_then(|outcome| report.record(&id, outcome).map_err(Into::into));
        if let Err(err) = recorded {
            fatal.get_or_insert(err);
        }
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    report.synced.sort_by(|a, b| a.id.cmp(&b.id));
    report.not_ready.sort();
    report.failed.sort_by(|a, b| a.id.cmp(&b.id));
    Ok((report, skipped))
}

async fn sync_entity(
    orchestrator: Arc<SyncOrchestrator>,
    permits: Arc<Semaphore>,
    id: EntityId,
) -> Result<Result<Option<SyncResult>, SyncError>, DaemonError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| DaemonError::ChannelClosed("worker pool"))?;
    tokio::task::spawn_blocking(move || orchestrator.sync(&id))
        .await
        .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))
}

async fn socket_server_task(
    home: PathBuf,
    services: Services,
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let services = services.clone();
                let state = state.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        services,
                        state,
                        sync_tx,
                        shutdown_tx,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
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
    home: PathBuf,
    services: Services,
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
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

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&home, &state).await),
            "sync" => {
                let target = match request.id {
                    Some(id) => SyncTarget::Entity(EntityId(id)),
                    None => SyncTarget::Due,
                };
                match enqueue_sync(&sync_tx, target, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "ack" => match (request.message, request.id, request.checksum) {
                (Some(message), _, _) => into_response(ack_message(&services, message).await),
                (None, Some(id), Some(checksum)) => {
                    into_response(ack(&services, id, checksum).await)
                }
                _ => DaemonResponse::error("ack requires 'message', or 'id' and 'checksum'"),
            },
            "unack" => match request.id {
                Some(id) => into_response(unack(&services, id).await),
                None => DaemonResponse::error("unack requires 'id'"),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(home: &Path, state: &DaemonState) -> Value {
    let in_flight = state.in_flight.lock().await.len();
    let last_pass = state.last_pass.read().await.clone();

    let (last_pass_at_unix, last_pass) = match last_pass {
        Some(pass) => (
            pass.finished_at_unix,
            json!({
                "target": pass.target,
                "source": pass.source,
                "created": pass.created,
                "updated": pass.updated,
                "unchanged": pass.unchanged,
                "not_ready": pass.not_ready,
                "failed": pass.failed,
                "skipped": pass.skipped.len(),
                "duration_ms": pass.duration_ms,
            }),
        ),
        None => (0, Value::Null),
    };

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "last_pass_at_unix": last_pass_at_unix,
        "last_pass": last_pass,
        "in_flight": in_flight,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    target: SyncTarget,
    source: &'static str,
) -> Result<PassSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            target,
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn ack(services: &Services, id: String, checksum: String) -> Result<Value, DaemonError> {
    let orchestrator = Arc::clone(&services.orchestrator);
    tokio::task::spawn_blocking(move || {
        orchestrator.acknowledge(&EntityId(id.clone()), &checksum)?;
        Ok(json!({ "id": id, "checksum": checksum }))
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("ack join error: {err}")))?
}

async fn ack_message(services: &Services, message: AckMessage) -> Result<Value, DaemonError> {
    let orchestrator = Arc::clone(&services.orchestrator);
    tokio::task::spawn_blocking(move || {
        orchestrator.handle_ack(&message)?;
        Ok(json!({
            "id": message.id,
            "checksum": message.checksum,
            "source": message.meta.source,
        }))
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("ack join error: {err}")))?
}

async fn unack(services: &Services, id: String) -> Result<Value, DaemonError> {
    let orchestrator = Arc::clone(&services.orchestrator);
    tokio::task::spawn_blocking(move || {
        let existed = orchestrator.unacknowledge(&EntityId(id.clone()))?;
        Ok(json!({ "id": id, "existed": existed }))
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("unack join error: {err}")))?
}

fn into_response(result: Result<Value, DaemonError>) -> DaemonResponse {
    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

fn build_pass_summary(
    target: &SyncTarget,
    source: &'static str,
    report: BatchReport,
    skipped: Vec<EntityId>,
    duration: Duration,
) -> PassSummary {
    PassSummary {
        target: target.label(),
        source: source.to_string(),
        created: report.count(SyncStatus::Created),
        updated: report.count(SyncStatus::Updated),
        unchanged: report.count(SyncStatus::Unchanged),
        not_ready: report.not_ready.len(),
        failed: report.failed.len(),
        skipped,
        report,
        finished_at_unix: unix_seconds_now(),
        duration_ms: duration.as_millis(),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
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

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
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
