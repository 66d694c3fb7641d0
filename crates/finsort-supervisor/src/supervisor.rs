//! Ownership of the single backend process.
//!
//! [`BackendSupervisor`] holds at most one live child. A monitor task owns the
//! `tokio::process::Child` itself and is the only place the process is waited
//! on; the supervisor keeps a handle that can ask the monitor to kill it.

use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::launch::LaunchSpec;
use crate::output::{forward_lines, OutputSink, OutputStream};

/// How long [`BackendSupervisor::shutdown`] waits for a killed process to be reaped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of the backend process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendState {
    /// Never started.
    #[default]
    Idle,
    /// Process is live.
    Running { pid: u32 },
    /// Terminated by [`BackendSupervisor::stop`].
    Stopped,
    /// Exited on its own. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// Spawn failed.
    Failed { reason: String },
}

impl BackendState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running { pid } => write!(f, "running (pid {pid})"),
            Self::Stopped => f.write_str("stopped"),
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => f.write_str("exited by signal"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

struct LiveHandle {
    /// Distinguishes successive launches so a stale monitor never clears a newer handle.
    id: u64,
    pid: u32,
    kill_tx: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    live: Option<LiveHandle>,
    next_id: u64,
    /// Monitors of stopped processes, awaited by `shutdown`.
    retired: Vec<JoinHandle<()>>,
}

/// Supervisor for the backend process.
///
/// Must be used from within a Tokio runtime. Dropping the supervisor stops the
/// backend.
pub struct BackendSupervisor {
    spec: LaunchSpec,
    sink: Arc<dyn OutputSink>,
    slot: Arc<Mutex<Slot>>,
    state_tx: Arc<watch::Sender<BackendState>>,
}

impl BackendSupervisor {
    pub fn new(spec: LaunchSpec, sink: Arc<dyn OutputSink>) -> Self {
        let (state_tx, _) = watch::channel(BackendState::Idle);
        Self {
            spec,
            sink,
            slot: Arc::new(Mutex::new(Slot::default())),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BackendState {
        self.state_tx.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<BackendState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).live.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.slot).live.as_ref().map(|live| live.pid)
    }

    /// Spawn the backend.
    ///
    /// Returns the child's pid. A second call while a process is live is
    /// rejected with [`SupervisorError::AlreadyRunning`]; the running process
    /// is left untouched. Spawn failures are logged, recorded as
    /// [`BackendState::Failed`] and returned.
    pub fn start(&self) -> Result<u32, SupervisorError> {
        let mut slot = lock(&self.slot);

        if let Some(live) = &slot.live {
            warn!(pid = live.pid, "Backend already running, refusing to start another");
            return Err(SupervisorError::AlreadyRunning { pid: live.pid });
        }

        info!(
            program = %self.spec.program.display(),
            cwd = %self.spec.cwd.display(),
            args = ?self.spec.args,
            "Starting backend"
        );

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .current_dir(&self.spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(
                    program = %self.spec.program.display(),
                    error = %source,
                    "Failed to start backend"
                );
                self.state_tx.send_replace(BackendState::Failed {
                    reason: source.to_string(),
                });
                return Err(SupervisorError::Spawn {
                    program: self.spec.program.clone(),
                    source,
                });
            }
        };

        // `id()` is only `None` once the child has been reaped, which cannot
        // have happened yet.
        let pid = child.id().unwrap_or_default();

        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingStream("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::MissingStream("stderr"))?;

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move { forward_lines(stdout, OutputStream::Stdout, sink.as_ref()).await });
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move { forward_lines(stderr, OutputStream::Stderr, sink.as_ref()).await });

        let id = slot.next_id;
        slot.next_id += 1;

        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            kill_rx,
            id,
            pid,
            Arc::clone(&self.slot),
            Arc::clone(&self.state_tx),
        ));

        slot.live = Some(LiveHandle {
            id,
            pid,
            kill_tx,
            monitor,
        });
        self.state_tx.send_replace(BackendState::Running { pid });

        info!(pid = pid, "Backend process spawned");
        Ok(pid)
    }

    /// Terminate the live backend, if any.
    ///
    /// Returns `true` if a process was signalled. Calling this again, or with
    /// nothing running, is a no-op that returns `false`.
    pub fn stop(&self) -> bool {
        let mut slot = lock(&self.slot);

        let Some(live) = slot.live.take() else {
            debug!("No backend running, nothing to stop");
            return false;
        };

        info!(pid = live.pid, "Stopping backend");
        // The monitor may already be gone if the process just exited.
        let _ = live.kill_tx.send(());

        slot.retired.retain(|monitor| !monitor.is_finished());
        slot.retired.push(live.monitor);
        self.state_tx.send_replace(BackendState::Stopped);
        true
    }

    /// Stop the backend and wait for the process to be reaped.
    pub async fn shutdown(&self) {
        self.stop();

        let monitors = std::mem::take(&mut lock(&self.slot).retired);
        for monitor in monitors {
            match tokio::time::timeout(SHUTDOWN_GRACE, monitor).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Backend monitor task failed"),
                Err(_) => warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "Timed out waiting for backend to exit"
                ),
            }
        }
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for BackendSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSupervisor")
            .field("spec", &self.spec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the child until it exits or a kill is requested.
async fn monitor(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    id: u64,
    pid: u32,
    slot: Arc<Mutex<Slot>>,
    state_tx: Arc<watch::Sender<BackendState>>,
) {
    // A dropped sender counts as a kill request.
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    match exited {
        Some(status) => {
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(pid = pid, error = %e, "Failed waiting on backend process");
                    None
                }
            };
            info!(pid = pid, exit_code = ?code, "Backend process exited");

            let mut slot = lock(&slot);
            if slot.live.as_ref().map(|live| live.id) == Some(id) {
                slot.live = None;
                state_tx.send_replace(BackendState::Exited { code });
            }
        }
        None => {
            if let Err(e) = child.start_kill() {
                debug!(pid = pid, error = %e, "Kill signal not delivered");
            }
            match child.wait().await {
                Ok(status) => info!(pid = pid, exit_code = ?status.code(), "Backend process terminated"),
                Err(e) => warn!(pid = pid, error = %e, "Failed reaping backend process"),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::output::{ChannelSink, TracingSink};

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", std::env::temp_dir()).with_args(["-c", script])
    }

    fn supervisor(script: &str) -> BackendSupervisor {
        BackendSupervisor::new(sh(script), Arc::new(TracingSink))
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let supervisor = supervisor("sleep 30");
        assert!(!supervisor.stop());
        assert!(!supervisor.stop());
        assert_eq!(supervisor.state(), BackendState::Idle);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_twice_terminates_once() {
        let supervisor = supervisor("sleep 30");
        let pid = supervisor.start().unwrap();

        assert!(pid > 0);
        assert!(supervisor.is_running());
        assert_eq!(supervisor.pid(), Some(pid));
        assert_eq!(supervisor.state(), BackendState::Running { pid });

        assert!(supervisor.stop());
        assert!(!supervisor.stop());
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.state(), BackendState::Stopped);

        let started = Instant::now();
        supervisor.shutdown().await;
        assert!(started.elapsed() < SHUTDOWN_GRACE);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let supervisor = supervisor("sleep 30");
        let pid = supervisor.start().unwrap();

        match supervisor.start() {
            Err(SupervisorError::AlreadyRunning { pid: running }) => assert_eq!(running, pid),
            other => panic!("Expected AlreadyRunning, got {:?}", other),
        }
        assert_eq!(supervisor.pid(), Some(pid));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let supervisor = supervisor("sleep 30");
        let first = supervisor.start().unwrap();
        assert!(supervisor.stop());

        let second = supervisor.start().unwrap();
        assert_ne!(first, second);
        assert_eq!(supervisor.state(), BackendState::Running { pid: second });

        supervisor.shutdown().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let spec = LaunchSpec::new("/nonexistent/finsort/backend_server", std::env::temp_dir());
        let supervisor = BackendSupervisor::new(spec, Arc::new(TracingSink));

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(matches!(supervisor.state(), BackendState::Failed { .. }));
        assert!(!supervisor.is_running());
        assert!(!supervisor.stop());
    }

    #[tokio::test]
    async fn test_output_is_forwarded_with_stream_kind() {
        let (sink, mut rx) = ChannelSink::new();
        let supervisor = BackendSupervisor::new(
            sh("echo 'Uvicorn running'; echo 'import warning' >&2; sleep 30"),
            Arc::new(sink),
        );
        supervisor.start().unwrap();

        let mut chunks = Vec::new();
        while chunks.len() < 2 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("sink closed");
            chunks.push(chunk);
        }
        chunks.sort_by_key(|c| c.stream == OutputStream::Stderr);

        assert_eq!(chunks[0].stream, OutputStream::Stdout);
        assert_eq!(chunks[0].line, "Uvicorn running");
        assert_eq!(chunks[1].stream, OutputStream::Stderr);
        assert_eq!(chunks[1].line, "import warning");

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_backend_alive() {
        let (sink, mut rx) = ChannelSink::new();
        let supervisor = BackendSupervisor::new(
            sh("printf 'caf\\351\\n' >&2; sleep 0.5; echo still-alive >&2; sleep 30"),
            Arc::new(sink),
        );
        let pid = supervisor.start().unwrap();

        let mut lines = Vec::new();
        while !lines.iter().any(|l: &String| l == "still-alive") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("sink closed");
            assert_eq!(chunk.stream, OutputStream::Stderr);
            lines.push(chunk.line);
        }

        assert_eq!(lines[0], "caf\u{FFFD}");
        assert_eq!(supervisor.state(), BackendState::Running { pid });

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsolicited_exit_clears_handle() {
        let supervisor = supervisor("exit 3");
        let mut states = supervisor.subscribe();
        supervisor.start().unwrap();

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| matches!(s, BackendState::Exited { .. })),
        )
        .await
        .expect("backend never exited")
        .unwrap()
        .clone();

        assert_eq!(state, BackendState::Exited { code: Some(3) });
        assert!(!supervisor.is_running());
        assert!(!supervisor.stop());
        assert_eq!(supervisor.state(), BackendState::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn test_drop_stops_backend() {
        let supervisor = supervisor("sleep 30");
        let mut states = supervisor.subscribe();
        supervisor.start().unwrap();

        drop(supervisor);
        assert_eq!(*states.borrow_and_update(), BackendState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BackendState::Running { pid: 42 }.to_string(), "running (pid 42)");
        assert_eq!(BackendState::Exited { code: Some(1) }.to_string(), "exited with code 1");
        assert_eq!(BackendState::Exited { code: None }.to_string(), "exited by signal");
        assert!(!BackendState::Stopped.is_running());
    }
}
