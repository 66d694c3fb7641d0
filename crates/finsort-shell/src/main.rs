//! Finsort desktop shell.
//!
//! Starts the classification backend, waits for it to report healthy, shows
//! the UI, and stops the backend again when the application quits.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use finsort_supervisor::{BackendSupervisor, LaunchMode, TracingSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod error;
mod window;

use app::Shell;
use config::ShellConfig;
use window::ConsoleHost;

/// Finsort desktop shell.
#[derive(Parser, Debug)]
#[command(name = "finsort", about = "Finsort desktop shell", version)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the backend from source and load the UI dev server
    #[arg(long)]
    dev: bool,

    /// Backend source tree (development)
    #[arg(long)]
    backend_dir: Option<PathBuf>,

    /// Bundled resources directory (production)
    #[arg(long)]
    resources_dir: Option<PathBuf>,

    /// Directory containing the built UI (production)
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// Backend port (development only; the bundled backend always uses 8000)
    #[arg(long)]
    port: Option<u16>,

    /// Health checks before opening the window regardless
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Milliseconds between health checks
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ShellConfig, error::ShellError> {
        let mut config = match &self.config {
            Some(path) => ShellConfig::load(path)?,
            None => ShellConfig {
                mode: LaunchMode::from_env(),
                ..ShellConfig::default()
            },
        };

        if self.dev {
            config.mode = LaunchMode::Development;
        }
        if self.backend_dir.is_some() {
            config.backend_dir = self.backend_dir;
        }
        if self.resources_dir.is_some() {
            config.resources_dir = self.resources_dir;
        }
        if self.app_dir.is_some() {
            config.app_dir = self.app_dir;
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }

        Ok(config)
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env().add_directive("finsort=info".parse()?);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;

    let config = args.into_config()?;

    info!(
        mode = ?config.mode,
        backend = %config.backend,
        "Finsort starting"
    );

    if config.port_ignored_by_backend() {
        warn!(
            port = config.backend.port,
            "The bundled backend always listens on 8000; the readiness check will use the configured port anyway"
        );
    }

    let spec = config.launch_strategy()?.resolve(&config.backend);
    let supervisor = BackendSupervisor::new(spec, Arc::new(TracingSink));
    let gate = config.readiness_gate()?;
    let window = config.window_spec()?;

    let outcome = Shell::new(supervisor, gate, ConsoleHost::new(), window)
        .with_quit_on_all_closed(config.quit_on_all_closed)
        .run()
        .await?;

    info!(
        readiness = %outcome.readiness,
        exit = ?outcome.exit,
        "Finsort stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "finsort",
            "--dev",
            "--backend-dir",
            "/src/finsort/backend",
            "--port",
            "8100",
            "--max-attempts",
            "3",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.mode, LaunchMode::Development);
        assert_eq!(config.backend_dir, Some(PathBuf::from("/src/finsort/backend")));
        assert_eq!(config.backend.port, 8100);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.interval_ms, 500);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = Args::parse_from(["finsort", "--config", "/nonexistent/finsort.json"]);
        assert!(args.into_config().is_err());
    }
}
