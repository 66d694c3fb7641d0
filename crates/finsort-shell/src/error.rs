//! Shell errors.

use std::path::PathBuf;

use finsort_supervisor::{ProbeError, SupervisorError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Config file could not be read.
    #[error("Failed to read config '{}': {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`ShellConfig`](crate::config::ShellConfig).
    #[error("Invalid config '{}': {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Backend launch could not be resolved.
    #[error(transparent)]
    Launch(#[from] SupervisorError),

    /// The health check client could not be built.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// The window host failed to show the UI.
    #[error("Window error: {0}")]
    Window(String),
}
