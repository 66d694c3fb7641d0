//! Launch strategy resolution.
//!
//! The backend runs either from source through the project's virtualenv
//! interpreter (development) or as a prebuilt executable shipped in the
//! application's resources directory (production).

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// Environment variable that selects the launch mode.
pub const MODE_ENV_VAR: &str = "FINSORT_ENV";

/// Which launch strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Run the backend from source.
    Development,
    /// Run the bundled backend executable.
    #[default]
    Production,
}

impl LaunchMode {
    /// Read the mode from `FINSORT_ENV`.
    pub fn from_env() -> Self {
        Self::from_env_value(env::var(MODE_ENV_VAR).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("development") || v.eq_ignore_ascii_case("dev") => {
                Self::Development
            }
            _ => Self::Production,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Loopback address the backend binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendAddr {
    pub host: String,
    pub port: u16,
}

impl Default for BackendAddr {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl BackendAddr {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A fully resolved command line for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// How to launch the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// `python -m uvicorn app.main:app` from the backend source tree.
    Development { backend_dir: PathBuf },
    /// Bundled `backend_server` executable under the resources directory.
    Production { resources_dir: PathBuf },
    /// Explicit command line.
    Custom(LaunchSpec),
}

impl LaunchStrategy {
    /// Pick the strategy for `mode` using the default locations.
    pub fn for_mode(mode: LaunchMode) -> Result<Self, SupervisorError> {
        Ok(match mode {
            LaunchMode::Development => Self::Development {
                backend_dir: default_backend_dir()?,
            },
            LaunchMode::Production => Self::Production {
                resources_dir: default_resources_dir()?,
            },
        })
    }

    /// Resolve to a concrete command bound to `addr`.
    pub fn resolve(&self, addr: &BackendAddr) -> LaunchSpec {
        match self {
            Self::Development { backend_dir } => {
                LaunchSpec::new(venv_python(backend_dir), backend_dir.clone()).with_args([
                    "-m".to_string(),
                    "uvicorn".to_string(),
                    "app.main:app".to_string(),
                    "--host".to_string(),
                    addr.host.clone(),
                    "--port".to_string(),
                    addr.port.to_string(),
                ])
            }
            Self::Production { resources_dir } => {
                let dir = resources_dir.join("backend");
                LaunchSpec::new(dir.join(bundled_executable_name()), dir)
            }
            Self::Custom(spec) => spec.clone(),
        }
    }
}

/// `<cwd>/backend`.
pub fn default_backend_dir() -> Result<PathBuf, SupervisorError> {
    let cwd = env::current_dir()
        .map_err(|e| SupervisorError::Launch(format!("current directory: {e}")))?;
    Ok(cwd.join("backend"))
}

/// Directory holding bundled resources, next to the running executable.
pub fn default_resources_dir() -> Result<PathBuf, SupervisorError> {
    let exe = env::current_exe()
        .map_err(|e| SupervisorError::Launch(format!("current executable: {e}")))?;
    let exe_dir = exe
        .parent()
        .ok_or_else(|| SupervisorError::Launch("executable has no parent directory".into()))?;
    Ok(resources_dir_for(exe_dir))
}

#[cfg(target_os = "macos")]
fn resources_dir_for(exe_dir: &Path) -> PathBuf {
    // Contents/MacOS/<exe> -> Contents/Resources
    exe_dir.join("..").join("Resources")
}

#[cfg(not(target_os = "macos"))]
fn resources_dir_for(exe_dir: &Path) -> PathBuf {
    exe_dir.join("resources")
}

#[cfg(windows)]
fn venv_python(backend_dir: &Path) -> PathBuf {
    backend_dir.join(".venv").join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_python(backend_dir: &Path) -> PathBuf {
    backend_dir.join(".venv").join("bin").join("python")
}

fn bundled_executable_name() -> &'static str {
    if cfg!(windows) {
        "backend_server.exe"
    } else {
        "backend_server"
    }
}
