//! Application lifecycle: backend start, readiness, window, teardown.

use finsort_supervisor::{BackendSupervisor, Readiness, ReadinessGate};
use tracing::{error, info, warn};

use crate::error::ShellError;
use crate::window::{ShellEvent, WindowHost, WindowSpec};

/// Why the shell stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    AllWindowsClosed,
    BeforeQuit,
    /// The host stopped reporting events.
    HostClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellOutcome {
    pub readiness: Readiness,
    pub exit: ExitReason,
}

/// Drives one run of the desktop application.
pub struct Shell<H> {
    supervisor: BackendSupervisor,
    gate: ReadinessGate,
    host: H,
    window: WindowSpec,
    quit_on_all_closed: bool,
}

impl<H: WindowHost> Shell<H> {
    pub fn new(
        supervisor: BackendSupervisor,
        gate: ReadinessGate,
        host: H,
        window: WindowSpec,
    ) -> Self {
        Self {
            supervisor,
            gate,
            host,
            window,
            quit_on_all_closed: true,
        }
    }

    pub fn with_quit_on_all_closed(mut self, quit: bool) -> Self {
        self.quit_on_all_closed = quit;
        self
    }

    /// Run until the application quits.
    ///
    /// Backend failures never abort the run: the window is shown either way
    /// and the UI reports connection errors per request. The backend is
    /// stopped before this returns.
    pub async fn run(mut self) -> Result<ShellOutcome, ShellError> {
        if let Err(e) = self.supervisor.start() {
            warn!(error = %e, "Backend did not start");
        }

        let readiness = self.gate.wait().await;
        if !readiness.is_ready() {
            error!(%readiness, "Failed to connect to backend server, opening window anyway");
        }

        if let Err(e) = self.host.open(&self.window).await {
            self.supervisor.shutdown().await;
            return Err(e);
        }

        let exit = loop {
            match self.host.next_event().await {
                Some(ShellEvent::AllWindowsClosed) => {
                    self.supervisor.stop();
                    if self.quit_on_all_closed {
                        break ExitReason::AllWindowsClosed;
                    }
                    info!("All windows closed, staying resident");
                }
                Some(ShellEvent::BeforeQuit) => {
                    self.supervisor.stop();
                    break ExitReason::BeforeQuit;
                }
                None => break ExitReason::HostClosed,
            }
        };

        self.supervisor.shutdown().await;
        info!(exit = ?exit, "Shell stopped");

        Ok(ShellOutcome { readiness, exit })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use finsort_supervisor::{
        BackendState, HealthProbe, LaunchSpec, ProbeError, TracingSink,
    };
    use tokio::sync::watch;

    use super::*;
    use crate::window::WindowTarget;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records each check together with the backend state it observed.
    struct RecordingProbe {
        journal: Journal,
        backend: watch::Receiver<BackendState>,
        ready_on: Option<usize>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl HealthProbe for RecordingProbe {
        async fn check(&self) -> Result<(), ProbeError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            let state = self.backend.borrow().clone();
            self.journal
                .lock()
                .unwrap()
                .push(format!("probe {} {}", *calls, state.is_running()));
            if Some(*calls) == self.ready_on {
                Ok(())
            } else {
                Err(ProbeError::Status(503))
            }
        }
    }

    struct ScriptedHost {
        journal: Journal,
        events: VecDeque<ShellEvent>,
        fail_open: bool,
    }

    #[async_trait]
    impl WindowHost for ScriptedHost {
        async fn open(&mut self, spec: &WindowSpec) -> Result<(), ShellError> {
            self.journal.lock().unwrap().push(format!("open {}", spec.target));
            if self.fail_open {
                return Err(ShellError::Window("no display".into()));
            }
            Ok(())
        }

        async fn next_event(&mut self) -> Option<ShellEvent> {
            self.events.pop_front()
        }
    }

    struct Fixture {
        journal: Journal,
        backend: watch::Receiver<BackendState>,
        shell: Shell<ScriptedHost>,
    }

    fn fixture(program: &str, ready_on: Option<usize>, events: Vec<ShellEvent>) -> Fixture {
        let journal: Journal = Arc::default();
        let spec = LaunchSpec::new(program, std::env::temp_dir()).with_args(["-c", "sleep 30"]);
        let supervisor = BackendSupervisor::new(spec, Arc::new(TracingSink));
        let backend = supervisor.subscribe();

        let probe = Arc::new(RecordingProbe {
            journal: journal.clone(),
            backend: supervisor.subscribe(),
            ready_on,
            calls: Mutex::new(0),
        });
        let gate = ReadinessGate::new(probe)
            .with_max_attempts(3)
            .with_interval(Duration::from_millis(10));

        let host = ScriptedHost {
            journal: journal.clone(),
            events: events.into(),
            fail_open: false,
        };
        let window = WindowSpec {
            title: "Financial Sorting".into(),
            width: 1400,
            height: 900,
            target: WindowTarget::Url("http://localhost:5123/".into()),
        };

        Fixture {
            journal,
            backend,
            shell: Shell::new(supervisor, gate, host, window),
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_window_opens_after_backend_ready() {
        let f = fixture("sh", Some(2), vec![ShellEvent::BeforeQuit]);

        let outcome = f.shell.run().await.unwrap();

        assert_eq!(outcome.readiness, Readiness::Ready { attempts: 2 });
        assert_eq!(outcome.exit, ExitReason::BeforeQuit);
        assert_eq!(
            entries(&f.journal),
            vec!["probe 1 true", "probe 2 true", "open http://localhost:5123/"]
        );
        assert_eq!(*f.backend.borrow(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn test_timeout_still_opens_window() {
        let f = fixture("sh", None, vec![ShellEvent::BeforeQuit]);

        let outcome = f.shell.run().await.unwrap();

        assert_eq!(outcome.readiness, Readiness::TimedOut { attempts: 3 });
        let journal = entries(&f.journal);
        assert_eq!(journal.len(), 4);
        assert_eq!(journal[3], "open http://localhost:5123/");
        assert_eq!(*f.backend.borrow(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_not_fatal() {
        let f = fixture("/nonexistent/finsort/backend_server", None, vec![]);

        let outcome = f.shell.run().await.unwrap();

        assert!(!outcome.readiness.is_ready());
        assert_eq!(outcome.exit, ExitReason::HostClosed);
        assert!(entries(&f.journal).iter().any(|e| e.starts_with("open")));
        assert!(matches!(*f.backend.borrow(), BackendState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_all_windows_closed_quits() {
        let f = fixture(
            "sh",
            Some(1),
            vec![ShellEvent::AllWindowsClosed, ShellEvent::BeforeQuit],
        );

        let outcome = f.shell.run().await.unwrap();

        assert_eq!(outcome.exit, ExitReason::AllWindowsClosed);
        assert_eq!(*f.backend.borrow(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn test_resident_platform_waits_for_quit() {
        let f = fixture(
            "sh",
            Some(1),
            vec![ShellEvent::AllWindowsClosed, ShellEvent::BeforeQuit],
        );
        let shell = f.shell.with_quit_on_all_closed(false);

        let outcome = shell.run().await.unwrap();

        assert_eq!(outcome.exit, ExitReason::BeforeQuit);
        assert_eq!(*f.backend.borrow(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn test_open_failure_stops_backend() {
        let mut f = fixture("sh", Some(1), vec![]);
        f.shell.host.fail_open = true;

        let err = f.shell.run().await.unwrap_err();

        assert!(matches!(err, ShellError::Window(_)));
        assert_eq!(*f.backend.borrow(), BackendState::Stopped);
    }
}
