//! Daemon runtime: interval-driven cycles, vault watching, socket control.
//!
//! One cycle-runner task owns the task store and executes cycles on a
//! blocking thread. Cycle requests arrive from three sources — the poll
//! ticker, the vault watcher, and the control socket — and are rejected
//! while a cycle is in progress: mutual exclusion across whole cycles is a
//! single in-progress flag, never a queue of stacked-up cycles.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use taskbridge_core::{config, store, SyncConfig, TaskStore};
use taskbridge_engine::{run_cycle, CycleReport, FsVault, NoopPacer};
use taskbridge_remote::HttpRemote;

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, taskbridge_root, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Where a cycle request came from; socket requests get a report back.
struct CycleJob {
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<CycleReport, String>>>,
}

/// Shared runtime stats surfaced over the `status` command.
#[derive(Debug, Default, Clone)]
struct DaemonStats {
    last_cycle_at_unix: u64,
    cycles_run: u64,
    tracked_records: usize,
    last_error: Option<String>,
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

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let task_store = store::load_at(&home)?;
    let started_at_unix = Utc::now().timestamp().max(0) as u64;

    let stats = Arc::new(RwLock::new(DaemonStats {
        tracked_records: task_store.len(),
        ..DaemonStats::default()
    }));
    let in_progress = Arc::new(AtomicBool::new(false));

    let (cycle_tx, cycle_rx) = mpsc::channel::<CycleJob>(8);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let cycle_tx = cycle_tx.clone();
        let in_progress = in_progress.clone();
        let interval = config.poll_interval();
        tokio::spawn(async move {
            let result = ticker_task(interval, cycle_tx, in_progress, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let cycle_tx = cycle_tx.clone();
        let in_progress = in_progress.clone();
        let vault_root = config.vault_root.clone();
        tokio::spawn(async move {
            let result =
                watcher_task(vault_root, cycle_tx, in_progress, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let runner_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let config = config.clone();
        let stats = stats.clone();
        let in_progress = in_progress.clone();
        tokio::spawn(async move {
            let result = cycle_runner_task(
                home,
                config,
                task_store,
                stats,
                in_progress,
                cycle_rx,
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let config = config.clone();
        let stats = stats.clone();
        let in_progress = in_progress.clone();
        let cycle_tx = cycle_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                config,
                stats,
                in_progress,
                cycle_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
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
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (ticker_result, watcher_result, runner_result, socket_result, signal_result) = tokio::join!(
        ticker_handle,
        watcher_handle,
        runner_handle,
        socket_handle,
        signal_handle
    );

    handle_join("ticker", ticker_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("cycle_runner", runner_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn ticker_task(
    interval: Duration,
    cycle_tx: mpsc::Sender<CycleJob>,
    in_progress: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if in_progress.load(Ordering::SeqCst) {
                    tracing::debug!("tick skipped; cycle already in progress");
                    continue;
                }
                let job = CycleJob { source: "ticker", respond_to: None };
                if cycle_tx.send(job).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn watcher_task(
    vault_root: PathBuf,
    cycle_tx: mpsc::Sender<CycleJob>,
    in_progress: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if !vault_root.exists() {
        fs::create_dir_all(&vault_root).map_err(|e| io_err(&vault_root, e))?;
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    _watcher.watch(&vault_root, RecursiveMode::Recursive)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !is_markdown(&path) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    if in_progress.load(Ordering::SeqCst) {
                        // The running cycle will pick this edit up via the
                        // document's mtime on the next pass.
                        tracing::debug!(path = %path.display(), "edit during cycle; deferred");
                        continue;
                    }
                    let job = CycleJob { source: "watcher", respond_to: None };
                    if cycle_tx.send(job).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn cycle_runner_task(
    home: PathBuf,
    config: SyncConfig,
    mut task_store: TaskStore,
    stats: Arc<RwLock<DaemonStats>>,
    in_progress: Arc<AtomicBool>,
    mut cycle_rx: mpsc::Receiver<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut last_cycle_at: Option<DateTime<Utc>> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = cycle_rx.recv() => {
                let Some(job) = maybe_job else { break };

                if in_progress.swap(true, Ordering::SeqCst) {
                    // Raced with another request; reject rather than stack.
                    if let Some(respond_to) = job.respond_to {
                        let _ = respond_to.send(Err("a cycle is already in progress".to_string()));
                    }
                    continue;
                }

                let cycle_started = Utc::now();
                let home_for_cycle = home.clone();
                let config_for_cycle = config.clone();
                let since = last_cycle_at;
                let moved_store = task_store;

                let joined = tokio::task::spawn_blocking(move || {
                    run_one_cycle(home_for_cycle, config_for_cycle, moved_store, since)
                })
                .await;

                let (returned_store, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(err) => {
                        in_progress.store(false, Ordering::SeqCst);
                        return Err(DaemonError::Protocol(format!(
                            "cycle task join error: {err}"
                        )));
                    }
                };
                task_store = returned_store;
                in_progress.store(false, Ordering::SeqCst);

                let response = match outcome {
                    Ok(report) => {
                        last_cycle_at = Some(cycle_started);
                        tracing::info!(
                            source = job.source,
                            documents = report.documents,
                            created = report.created,
                            pushed = report.pushed,
                            written_back = report.written_back,
                            errors = report.errors.len(),
                            duration_ms = report.duration_ms as u64,
                            "cycle completed",
                        );
                        let mut stats = stats.write().await;
                        stats.last_cycle_at_unix = cycle_started.timestamp().max(0) as u64;
                        stats.cycles_run += 1;
                        stats.tracked_records = task_store.len();
                        stats.last_error = None;
                        Ok(report)
                    }
                    Err(err) => {
                        tracing::error!(source = job.source, error = %err, "cycle failed");
                        let mut stats = stats.write().await;
                        stats.last_error = Some(err.to_string());
                        Err(err.to_string())
                    }
                };

                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(response);
                }
            }
        }
    }

    Ok(())
}

/// One blocking cycle: run against the store, persist on success. The store
/// is returned in whatever state it reached — an aborted cycle leaves it
/// as-is for the next cycle to re-derive from document scans.
fn run_one_cycle(
    home: PathBuf,
    config: SyncConfig,
    mut task_store: TaskStore,
    since: Option<DateTime<Utc>>,
) -> (TaskStore, Result<CycleReport, taskbridge_engine::EngineError>) {
    let vault = FsVault::new(config.vault_root.clone());
    let mut remote = HttpRemote::new(&config);
    let mut pacer = NoopPacer;

    let result = run_cycle(&mut task_store, &vault, &mut remote, &config, &mut pacer, since)
        .and_then(|report| {
            store::save_at(&home, &task_store)?;
            Ok(report)
        });
    (task_store, result)
}

#[allow(clippy::too_many_arguments)]
async fn socket_server_task(
    home: PathBuf,
    config: SyncConfig,
    stats: Arc<RwLock<DaemonStats>>,
    in_progress: Arc<AtomicBool>,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let root = taskbridge_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

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
                let config = config.clone();
                let stats = stats.clone();
                let in_progress = in_progress.clone();
                let cycle_tx = cycle_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        config,
                        stats,
                        in_progress,
                        cycle_tx,
                        shutdown_tx,
                        started_at_unix,
                    )
                    .await
                    {
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

#[allow(clippy::too_many_arguments)]
async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    config: SyncConfig,
    stats: Arc<RwLock<DaemonStats>>,
    in_progress: Arc<AtomicBool>,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
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

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
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
            "status" => {
                let payload =
                    build_status_payload(&home, &config, stats.clone(), started_at_unix).await;
                DaemonResponse::ok(payload)
            }
            "sync" => {
                if in_progress.load(Ordering::SeqCst) {
                    DaemonResponse::error("a cycle is already in progress")
                } else {
                    match enqueue_cycle(&cycle_tx).await {
                        Ok(report) => DaemonResponse::ok(json!(report)),
                        Err(err) => DaemonResponse::error(err.to_string()),
                    }
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        let is_stop = request.cmd == "stop";
        write_response(&mut writer, &response).await?;
        if is_stop {
            break;
        }
    }

    Ok(())
}

async fn enqueue_cycle(cycle_tx: &mpsc::Sender<CycleJob>) -> Result<CycleReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    cycle_tx
        .send(CycleJob {
            source: "socket",
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn build_status_payload(
    home: &Path,
    config: &SyncConfig,
    stats: Arc<RwLock<DaemonStats>>,
    started_at_unix: u64,
) -> Value {
    let snapshot = { stats.read().await.clone() };
    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "last_cycle_at_unix": snapshot.last_cycle_at_unix,
        "cycles_run": snapshot.cycles_run,
        "tracked_records": snapshot.tracked_records,
        "last_error": snapshot.last_error,
        "vault_root": config.vault_root.display().to_string(),
        "poll_interval_secs": config.poll_interval_secs,
        "socket": socket_path(home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
        && !path
            .to_string_lossy()
            .ends_with(".taskbridge.tmp")
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::{broadcast, mpsc};
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_saves() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/vault/inbox.md");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }

        advance(Duration::from_millis(150)).await;
        assert_eq!(triggers, 1, "rapid saves collapse to one cycle trigger");
    }

    #[test]
    fn markdown_filter_skips_tmp_and_foreign_files() {
        assert!(is_markdown(Path::new("/vault/inbox.md")));
        assert!(is_markdown(Path::new("/vault/nested/Work.MD")));
        assert!(!is_markdown(Path::new("/vault/store.json")));
        assert!(!is_markdown(Path::new("/vault/inbox.md.taskbridge.tmp")));
    }

    #[test]
    fn in_progress_flag_rejects_overlapping_cycles() {
        let flag = AtomicBool::new(false);
        assert!(!flag.swap(true, Ordering::SeqCst), "first request runs");
        assert!(flag.swap(true, Ordering::SeqCst), "second request rejected");
        flag.store(false, Ordering::SeqCst);
        assert!(!flag.swap(true, Ordering::SeqCst), "runs again after release");
    }

    #[tokio::test]
    async fn socket_protocol_status_and_stop_over_in_memory_channels() {
        let (request_tx, mut request_rx) = mpsc::channel::<Vec<u8>>(8);
        let (response_tx, mut response_rx) = mpsc::channel::<Vec<u8>>(8);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(async move {
            while let Some(bytes) = request_rx.recv().await {
                let line = String::from_utf8(bytes).expect("utf8");
                let request: DaemonRequest = serde_json::from_str(line.trim()).expect("request");
                let response = match request.cmd.as_str() {
                    "status" => DaemonResponse::ok(json!({"running": true})),
                    "stop" => {
                        let _ = shutdown_tx.send(());
                        DaemonResponse::ok(json!({"stopping": true}))
                    }
                    other => DaemonResponse::error(format!("unknown command '{other}'")),
                };
                let encoded = serde_json::to_vec(&response).expect("encode response");
                if response_tx.send(encoded).await.is_err() {
                    break;
                }
            }
        });

        request_tx
            .send(br#"{"cmd":"status"}"#.to_vec())
            .await
            .expect("send status request");
        let status_response = response_rx.recv().await.expect("status response");
        let status_json: serde_json::Value =
            serde_json::from_slice(&status_response).expect("decode status");
        assert_eq!(status_json["ok"], serde_json::Value::Bool(true));

        request_tx
            .send(br#"{"cmd":"stop"}"#.to_vec())
            .await
            .expect("send stop request");
        let stop_response = response_rx.recv().await.expect("stop response");
        let stop_json: serde_json::Value =
            serde_json::from_slice(&stop_response).expect("decode stop");
        assert_eq!(stop_json["ok"], serde_json::Value::Bool(true));

        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn status_payload_reflects_stats() {
        let home = tempfile::TempDir::new().expect("home");
        let vault = tempfile::TempDir::new().expect("vault");
        let config = SyncConfig::new(vault.path().to_path_buf(), "tok".to_string());
        let stats = Arc::new(RwLock::new(DaemonStats {
            last_cycle_at_unix: 1_000_100,
            cycles_run: 3,
            tracked_records: 42,
            last_error: None,
        }));

        let payload = build_status_payload(home.path(), &config, stats, 1_000_000).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_cycle_at_unix"], json!(1_000_100u64));
        assert_eq!(payload["cycles_run"], json!(3u64));
        assert_eq!(payload["tracked_records"], json!(42usize));
    }
}
