//! Window hosting.
//!
//! The shell does not render anything itself. A [`WindowHost`] shows the UI
//! and reports the application events that end the backend's life.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ShellError;

/// What the window loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    /// A served UI, e.g. the dev server.
    Url(String),
    /// A bundled static entry file.
    File(PathBuf),
}

impl fmt::Display for WindowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub target: WindowTarget,
}

/// Application events that matter to the backend lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellEvent {
    /// The last window was closed.
    AllWindowsClosed,
    /// The application is about to quit.
    BeforeQuit,
}

#[async_trait]
pub trait WindowHost: Send {
    /// Show the UI.
    async fn open(&mut self, spec: &WindowSpec) -> Result<(), ShellError>;

    /// Next lifecycle event, or `None` once the host has nothing more to report.
    async fn next_event(&mut self) -> Option<ShellEvent>;
}

/// Headless host: prints where the UI lives and quits on Ctrl-C.
#[derive(Debug, Default)]
pub struct ConsoleHost {
    interrupted: bool,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowHost for ConsoleHost {
    async fn open(&mut self, spec: &WindowSpec) -> Result<(), ShellError> {
        info!(
            title = %spec.title,
            width = spec.width,
            height = spec.height,
            target = %spec.target,
            "Opening window"
        );
        println!("{} is available at {}", spec.title, spec.target);
        println!("Press Ctrl-C to quit.");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        if self.interrupted {
            return None;
        }
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                self.interrupted = true;
                info!("Interrupt received");
                Some(ShellEvent::BeforeQuit)
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(
            WindowTarget::Url("http://localhost:5123/".into()).to_string(),
            "http://localhost:5123/"
        );
        assert_eq!(
            WindowTarget::File(PathBuf::from("/opt/finsort/app/dist-react/index.html")).to_string(),
            "file:///opt/finsort/app/dist-react/index.html"
        );
    }
}
