//! Daemon lifecycle and RPC front-end.
//!
//! A long-lived single-writer process that owns the store for a workspace
//! and answers length-prefixed JSON-RPC on `.beads/bd.sock`. Threads:
//!
//! - RPC accept/dispatch, one handler thread per connection
//! - a scheduler running either a polling loop or a mirror-watch loop
//! - a parent-death monitor (10 s ticks; PPID 0 and 1 are exempt)
//! - a signal thread (TERM/INT drain gracefully, HUP is logged and ignored)
//!
//! A top-level panic hook writes a crash report next to the database,
//! unregisters, and exits; the OS lock on `daemon.pid` dies with the
//! process.

pub mod registry;
pub mod rpc;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{self, DaemonMode, EngineConfig, WorkspacePaths};
use crate::error::{BeadsError, Result};
use crate::model::{Issue, Status};
use crate::storage::IssueUpdate;
use crate::sync::{SyncContext, SyncOptions, auto_import};
use crate::util::time::to_rfc3339;

pub use rpc::{DaemonClient, Health};

/// Default polling interval for `BEADS_DAEMON_MODE=poll`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const PARENT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Options for `bd daemon`.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Polling interval (poll mode only).
    pub interval: Duration,
    /// Scheduler mode override; defaults to the configured mode.
    pub mode: Option<DaemonMode>,
    /// Also register in the user-scoped global registry.
    pub register_global: bool,
    /// Log destination; defaults to `.beads/daemon.log`.
    pub log_path: Option<PathBuf>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            mode: None,
            register_global: false,
            log_path: None,
        }
    }
}

/// Contents of the `daemon.pid` lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub parent_pid: u32,
    pub version: String,
    pub started_at: String,
    pub db: PathBuf,
}

/// Check whether a PID refers to a live process.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn getppid() -> u32 {
    u32::try_from(unsafe { libc::getppid() }).unwrap_or(0)
}

struct DaemonState {
    ctx: SyncContext,
    started: Instant,
    running: AtomicBool,
}

/// Run the daemon in the foreground until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error when the lock is held by a live compatible daemon,
/// when the workspace cannot be opened, or on socket failures.
#[allow(clippy::too_many_lines)]
pub fn run(beads_dir: &Path, options: &DaemonOptions) -> Result<()> {
    let paths = config::resolve_paths(beads_dir, None)?;
    let engine_config = EngineConfig::resolve(beads_dir)?;

    // Exclusive lock keyed to the database path
    let lock_file = acquire_lock(&paths)?;

    // A previous crash report is stale once we start cleanly
    let _ = std::fs::remove_file(paths.daemon_error_path());

    let ctx = config::open_workspace(beads_dir, None)?;

    if options.register_global {
        let entry = registry::RegistryEntry {
            workspace: paths.workspace_root.clone(),
            socket: paths.socket_path(),
            db: paths.db_path.clone(),
            pid: std::process::id(),
            version: crate::BD_VERSION.to_string(),
            started_at: to_rfc3339(chrono::Utc::now()),
        };
        if let Err(e) = registry::register(&entry) {
            tracing::warn!(error = %e, "Failed to register daemon; discovery disabled");
        }
    }

    // Crash reporting: write the report, unregister, and exit. The lock
    // dies with the process.
    install_panic_hook(&paths, options.register_global);

    let socket_path = paths.socket_path();
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    listener.set_nonblocking(true)?;

    let state = Arc::new(DaemonState {
        ctx,
        started: Instant::now(),
        running: AtomicBool::new(true),
    });

    tracing::info!(
        socket = %socket_path.display(),
        pid = std::process::id(),
        version = crate::BD_VERSION,
        "Daemon started"
    );

    let mut handles = Vec::new();

    // RPC accept/dispatch
    {
        let state = Arc::clone(&state);
        handles.push(thread::Builder::new().name("bd-rpc".into()).spawn(move || {
            accept_loop(&listener, &state);
        })?);
    }

    // Scheduler: poll or mirror-watch
    {
        let state = Arc::clone(&state);
        let mode = options.mode.unwrap_or(engine_config.daemon_mode);
        let interval = options.interval;
        handles.push(
            thread::Builder::new()
                .name("bd-scheduler".into())
                .spawn(move || match mode {
                    DaemonMode::Poll => poll_loop(&state, interval),
                    DaemonMode::Events => watch_loop(&state),
                })?,
        );
    }

    // Parent-death monitor
    {
        let state = Arc::clone(&state);
        handles.push(
            thread::Builder::new()
                .name("bd-parent-monitor".into())
                .spawn(move || parent_monitor_loop(&state))?,
        );
    }

    // Signal handling
    {
        let state = Arc::clone(&state);
        let mut signals = signal_hook::iterator::Signals::new([
            signal_hook::consts::SIGTERM,
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGHUP,
        ])?;
        handles.push(
            thread::Builder::new()
                .name("bd-signals".into())
                .spawn(move || {
                    for signal in signals.forever() {
                        match signal {
                            signal_hook::consts::SIGHUP => {
                                tracing::info!("SIGHUP received; reload is not supported, ignoring");
                            }
                            other => {
                                tracing::info!(signal = other, "Shutdown signal received");
                                state.running.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                })?,
        );
    }

    // Wait until some thread clears the running flag
    while state.running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("Daemon shutting down");
    state.running.store(false, Ordering::SeqCst);

    for handle in handles {
        if handle.thread().name() == Some("bd-signals") {
            // The signal thread blocks in forever(); it dies with the process.
            continue;
        }
        let _ = handle.join();
    }

    // Terminal hook: drain flush, release store, clean the socket.
    // Connection threads may still hold state clones; the flush controller
    // and store handle shut down through the shared handles.
    state.ctx.flush.shutdown();
    if let Ok(mut guard) = state.ctx.store.lock() {
        guard.take();
    }
    let _ = std::fs::remove_file(&socket_path);
    if options.register_global {
        let _ = registry::unregister(&paths.workspace_root);
    }
    drop(lock_file);

    Ok(())
}

fn acquire_lock(paths: &WorkspacePaths) -> Result<std::fs::File> {
    let pid_path = paths.daemon_pid_path();
    std::fs::create_dir_all(&paths.beads_dir)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&pid_path)?;

    if file.try_lock_exclusive().is_err() {
        let holder: Option<LockInfo> = std::fs::read_to_string(&pid_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok());

        if let Some(info) = holder {
            if pid_alive(info.pid) && rpc::version_compatible(&info.version) {
                return Err(BeadsError::Config(format!(
                    "A compatible daemon is already running (pid {}, version {}).\n\
                     1. Use the running daemon, or\n\
                     2. Stop it first: bd daemon --stop",
                    info.pid, info.version
                )));
            }
            // Incompatible or half-dead holder: ask it to stop, then retry.
            tracing::warn!(pid = info.pid, version = %info.version, "Attempting daemon takeover");
            let mut client = DaemonClient::new(&paths.socket_path());
            let _ = client.shutdown();
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if file.try_lock_exclusive().is_ok() {
                    write_lock_info(&file, paths)?;
                    return Ok(file);
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        return Err(BeadsError::Config(
            "daemon lock is held and takeover failed; stop the other daemon manually".to_string(),
        ));
    }

    write_lock_info(&file, paths)?;
    Ok(file)
}

fn write_lock_info(mut file: &std::fs::File, paths: &WorkspacePaths) -> Result<()> {
    let info = LockInfo {
        pid: std::process::id(),
        parent_pid: getppid(),
        version: crate::BD_VERSION.to_string(),
        started_at: to_rfc3339(chrono::Utc::now()),
        db: paths.db_path.clone(),
    };
    file.set_len(0)?;
    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn install_panic_hook(paths: &WorkspacePaths, registered: bool) {
    let error_path = paths.daemon_error_path();
    let workspace = paths.workspace_root.clone();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let report = format!(
            "time: {}\npanic: {info}\n\nbacktrace:\n{backtrace}\n",
            to_rfc3339(chrono::Utc::now()),
        );
        let _ = std::fs::write(&error_path, report);
        if registered {
            let _ = registry::unregister(&workspace);
        }
        // The lock file releases when the process dies.
        std::process::exit(101);
    }));
}

fn accept_loop(listener: &UnixListener, state: &Arc<DaemonState>) {
    while state.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let state = Arc::clone(state);
                let _ = thread::Builder::new()
                    .name("bd-rpc-conn".into())
                    .spawn(move || handle_connection(stream, &state));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, state: &Arc<DaemonState>) {
    let _ = stream.set_read_timeout(Some(rpc::REQUEST_TIMEOUT));
    let _ = stream.set_write_timeout(Some(rpc::REQUEST_TIMEOUT));

    loop {
        let payload = match rpc::read_frame(&mut stream) {
            Ok(payload) => payload,
            Err(_) => return, // client closed or timed out
        };
        let response = match serde_json::from_slice::<rpc::Request>(&payload) {
            Ok(request) => {
                let id = request.id;
                match dispatch(state, &request) {
                    Ok(result) => rpc::Response::ok(id, result),
                    Err(e) => rpc::Response::err(id, e.to_string()),
                }
            }
            Err(e) => rpc::Response::err(0, format!("malformed request: {e}")),
        };
        let Ok(bytes) = serde_json::to_vec(&response) else {
            return;
        };
        if rpc::write_frame(&mut stream, &bytes).is_err() {
            return;
        }
    }
}

/// Every mutation serializes through the store's single writer; requests
/// are linearizable at this dispatch point.
fn dispatch(state: &Arc<DaemonState>, request: &rpc::Request) -> Result<Value> {
    match request.method.as_str() {
        "health" => Ok(json!(Health {
            version: crate::BD_VERSION.to_string(),
            status: "ok".to_string(),
            uptime_secs: state.started.elapsed().as_secs(),
            compatible: true,
        })),
        "ping" => Ok(json!("pong")),
        "flush" => {
            state.ctx.flush.flush()?;
            Ok(json!({"flushed": true}))
        }
        "sync" => {
            let options: SyncParams = serde_json::from_value(request.params.clone())?;
            let report = state.ctx.sync(&options.into_options())?;
            Ok(serde_json::to_value(report)?)
        }
        "get-issue" => {
            let params: IdParams = serde_json::from_value(request.params.clone())?;
            let issue = state.ctx.with_store(|s| s.get_issue(&params.id))?;
            Ok(serde_json::to_value(issue)?)
        }
        "search-issues" => {
            let params: SearchParams = serde_json::from_value(request.params.clone())?;
            let filters = params.to_filters()?;
            let issues = state
                .ctx
                .with_store(|s| s.search_issues(&params.query, &filters))?;
            Ok(serde_json::to_value(issues)?)
        }
        "create-issue" => {
            let issue: Issue = serde_json::from_value(request.params.clone())?;
            let actor = state.ctx.actor.clone();
            state.ctx.with_store(|s| s.create_issue(&issue, &actor))?;
            state.ctx.flush.mark_dirty();
            Ok(json!({"id": issue.id}))
        }
        "update-issue" => {
            let params: UpdateParams = serde_json::from_value(request.params.clone())?;
            let actor = state.ctx.actor.clone();
            let updates = params.to_update()?;
            let updated = state
                .ctx
                .with_store(|s| s.update_issue(&params.id, &updates, &actor))?;
            state.ctx.flush.mark_dirty();
            Ok(serde_json::to_value(updated)?)
        }
        "shutdown" => {
            state.running.store(false, Ordering::SeqCst);
            Ok(json!({"stopping": true}))
        }
        other => Err(BeadsError::Config(format!("unsupported method: {other}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncParams {
    dry_run: bool,
    flush_only: bool,
    import_only: bool,
    no_pull: bool,
    no_push: bool,
    message: Option<String>,
}

impl SyncParams {
    fn into_options(self) -> SyncOptions {
        SyncOptions {
            dry_run: self.dry_run,
            flush_only: self.flush_only,
            import_only: self.import_only,
            no_pull: self.no_pull,
            no_push: self.no_push,
            message: self.message,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchParams {
    query: String,
    status: Option<String>,
    issue_type: Option<String>,
    priority: Option<i32>,
    assignee: Option<String>,
    label: Option<String>,
    limit: Option<usize>,
}

impl SearchParams {
    fn to_filters(&self) -> Result<crate::storage::ListFilters> {
        Ok(crate::storage::ListFilters {
            status: self.status.as_deref().map(str::parse).transpose()?,
            issue_type: self.issue_type.as_deref().map(str::parse).transpose()?,
            priority: self.priority.map(crate::model::Priority),
            assignee: self.assignee.clone(),
            label: self.label.clone(),
            source_repo: None,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
}

impl UpdateParams {
    fn to_update(&self) -> Result<IssueUpdate> {
        let status = match self.status.as_deref() {
            Some(s) => Some(s.parse::<Status>()?),
            None => None,
        };
        Ok(IssueUpdate {
            title: self.title.clone(),
            status,
            assignee: self.assignee.clone().map(Some),
            ..Default::default()
        })
    }
}

fn poll_loop(state: &Arc<DaemonState>, interval: Duration) {
    while state.running.load(Ordering::SeqCst) {
        sleep_while_running(state, interval);
        if !state.running.load(Ordering::SeqCst) {
            break;
        }
        run_import_cycle(state);
        if let Err(e) = state.ctx.flush.flush() {
            tracing::debug!(error = %e, "Scheduled flush failed");
        }
    }
}

fn watch_loop(state: &Arc<DaemonState>) {
    use notify::{RecursiveMode, Watcher};

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "Mirror watcher unavailable; falling back to polling");
            return poll_loop(state, DEFAULT_POLL_INTERVAL);
        }
    };
    if let Err(e) = watcher.watch(&state.ctx.beads_dir, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, "Mirror watch failed; falling back to polling");
        return poll_loop(state, DEFAULT_POLL_INTERVAL);
    }

    let mirror_name = state
        .ctx
        .mirror_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string);

    while state.running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(event)) => {
                let touches_mirror = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == mirror_name);
                if touches_mirror {
                    run_import_cycle(state);
                }
            }
            Ok(Err(e)) => tracing::debug!(error = %e, "Watch error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_import_cycle(state: &Arc<DaemonState>) {
    let mirror = state.ctx.mirror_path.clone();
    let result = state
        .ctx
        .with_store(|storage| auto_import(storage, &mirror, Some(&state.ctx.flush)).map(|_| ()));
    if let Err(e) = result {
        tracing::warn!(error = %e, "Auto-import cycle failed");
    }
}

fn parent_monitor_loop(state: &Arc<DaemonState>) {
    while state.running.load(Ordering::SeqCst) {
        sleep_while_running(state, PARENT_CHECK_INTERVAL);
        let ppid = getppid();
        // PPID 0 and 1 are exempt: the daemon was adopted by init.
        if ppid > 1 && !pid_alive(ppid) {
            tracing::info!(ppid, "Parent process died; shutting down");
            state.running.store(false, Ordering::SeqCst);
        }
    }
}

fn sleep_while_running(state: &Arc<DaemonState>, total: Duration) {
    let deadline = Instant::now() + total;
    while state.running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
}

/// Read the lock file for `bd daemon --status`.
///
/// # Errors
///
/// Returns an error if paths cannot be resolved.
pub fn read_lock_info(beads_dir: &Path) -> Result<Option<LockInfo>> {
    let paths = config::resolve_paths(beads_dir, None)?;
    let pid_path = paths.daemon_pid_path();
    if !pid_path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&pid_path)?;
    let info: Option<LockInfo> = serde_json::from_str(&text).ok();
    Ok(info.filter(|info| pid_alive(info.pid)))
}

/// Stop a running daemon via RPC.
///
/// # Errors
///
/// Returns `DaemonUnavailable` when nothing is listening.
pub fn stop(beads_dir: &Path) -> Result<()> {
    let paths = config::resolve_paths(beads_dir, None)?;
    let mut client = DaemonClient::new(&paths.socket_path());
    client.shutdown()
}

/// Query a running daemon's health.
///
/// # Errors
///
/// Returns `DaemonUnavailable` when nothing is listening.
pub fn health(beads_dir: &Path) -> Result<Health> {
    let paths = config::resolve_paths(beads_dir, None)?;
    let mut client = DaemonClient::new(&paths.socket_path());
    client.health()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_alive_self() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(0));
        // A PID far beyond pid_max
        assert!(!pid_alive(u32::MAX - 7));
    }

    #[test]
    fn test_lock_info_round_trip() {
        let info = LockInfo {
            pid: 42,
            parent_pid: 1,
            version: crate::BD_VERSION.to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            db: PathBuf::from(".beads/beads.db"),
        };
        let text = serde_json::to_string(&info).unwrap();
        let parsed: LockInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.pid, 42);
        assert_eq!(parsed.db, info.db);
    }
}
