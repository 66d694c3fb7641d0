//! Error types for backend supervision.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing the backend process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A backend process is already live; a second one is never started.
    #[error("Backend already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Failed to spawn the backend process.
    #[error("Failed to spawn backend '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The spawned process did not expose a piped stream.
    #[error("Backend {0} was not captured")]
    MissingStream(&'static str),

    /// The launch strategy could not be resolved.
    #[error("Cannot resolve backend launch: {0}")]
    Launch(String),
}

/// A single failed health check.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The backend answered, but not with 200.
    #[error("health endpoint returned HTTP {0}")]
    Status(u16),

    /// Connection refused, reset, DNS, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// No answer within the per-request timeout.
    #[error("health check timed out")]
    Timeout,

    /// The HTTP client could not be built.
    #[error("failed to build health check client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}
