//! Shell configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use finsort_supervisor::{
    default_backend_dir, default_resources_dir, BackendAddr, LaunchMode, LaunchStrategy,
    ReadinessGate, DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS,
};
use serde::Deserialize;

use crate::error::ShellError;
use crate::window::{WindowSpec, WindowTarget};

/// Shell configuration.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Development runs the backend from source and loads the UI dev server.
    /// `FINSORT_ENV` is applied by the binary, not by `Default`.
    pub mode: LaunchMode,

    /// Backend source tree (development). Defaults to `./backend`.
    pub backend_dir: Option<PathBuf>,

    /// Bundled resources (production). Defaults to next to the executable.
    pub resources_dir: Option<PathBuf>,

    /// Directory holding the built UI (production). Defaults to `<resources>/app`.
    pub app_dir: Option<PathBuf>,

    /// Where the backend listens. Only development launches honour the port.
    pub backend: BackendAddr,

    /// Health checks before giving up on the backend.
    pub max_attempts: u32,

    /// Pause between health checks, in milliseconds.
    pub interval_ms: u64,

    /// UI dev server (development).
    pub dev_ui_url: String,

    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,

    /// Quit once the last window closes. macOS apps stay resident.
    pub quit_on_all_closed: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: LaunchMode::default(),
            backend_dir: None,
            resources_dir: None,
            app_dir: None,
            backend: BackendAddr::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            dev_ui_url: "http://localhost:5123/".to_string(),
            window_title: "Financial Sorting".to_string(),
            window_width: 1400,
            window_height: 900,
            quit_on_all_closed: !cfg!(target_os = "macos"),
        }
    }
}

impl ShellConfig {
    /// Load from a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ShellError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ShellError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ShellError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn resources_dir(&self) -> Result<PathBuf, ShellError> {
        match &self.resources_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(default_resources_dir()?),
        }
    }

    /// Launch strategy for the configured mode and directories.
    pub fn launch_strategy(&self) -> Result<LaunchStrategy, ShellError> {
        Ok(match self.mode {
            LaunchMode::Development => LaunchStrategy::Development {
                backend_dir: match &self.backend_dir {
                    Some(dir) => dir.clone(),
                    None => default_backend_dir()?,
                },
            },
            LaunchMode::Production => LaunchStrategy::Production {
                resources_dir: self.resources_dir()?,
            },
        })
    }

    /// Readiness gate against the backend's health endpoint.
    pub fn readiness_gate(&self) -> Result<ReadinessGate, ShellError> {
        Ok(ReadinessGate::http(self.backend.health_url())?
            .with_max_attempts(self.max_attempts)
            .with_interval(self.interval()))
    }

    /// The bundled backend takes no arguments and always listens on the
    /// default port, so a different port only moves the health check.
    pub fn port_ignored_by_backend(&self) -> bool {
        self.mode == LaunchMode::Production && self.backend.port != BackendAddr::default().port
    }

    /// The window the UI is shown in.
    pub fn window_spec(&self) -> Result<WindowSpec, ShellError> {
        let target = match self.mode {
            LaunchMode::Development => WindowTarget::Url(self.dev_ui_url.clone()),
            LaunchMode::Production => {
                let app_dir = match &self.app_dir {
                    Some(dir) => dir.clone(),
                    None => self.resources_dir()?.join("app"),
                };
                WindowTarget::File(app_dir.join("dist-react").join("index.html"))
            }
        };

        Ok(WindowSpec {
            title: self.window_title.clone(),
            width: self.window_width,
            height: self.window_height,
            target,
        })
    }
}
