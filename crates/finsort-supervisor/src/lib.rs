//! Backend supervision for the finsort desktop shell.
//!
//! The desktop shell depends on a separate HTTP backend that parses and
//! classifies imported transactions. This crate owns that backend's process
//! and decides when it is safe to show the UI:
//!
//! - [`LaunchStrategy`] picks how to run the backend (from source in
//!   development, bundled executable in production).
//! - [`BackendSupervisor`] spawns it, forwards its output to an
//!   [`OutputSink`], and stops it.
//! - [`ReadinessGate`] polls the health endpoint until it answers 200.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use finsort_supervisor::{
//!     BackendAddr, BackendSupervisor, LaunchMode, LaunchStrategy, ReadinessGate, TracingSink,
//! };
//!
//! async fn boot() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr = BackendAddr::default();
//!     let spec = LaunchStrategy::for_mode(LaunchMode::from_env())?.resolve(&addr);
//!     let supervisor = BackendSupervisor::new(spec, Arc::new(TracingSink));
//!
//!     supervisor.start()?;
//!     let readiness = ReadinessGate::http(addr.health_url())?.wait().await;
//!     println!("Backend {}", readiness);
//!
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
mod launch;
mod output;
mod readiness;
mod supervisor;

pub use error::{ProbeError, SupervisorError};
pub use launch::{
    default_backend_dir, default_resources_dir, BackendAddr, LaunchMode, LaunchSpec,
    LaunchStrategy, MODE_ENV_VAR,
};
pub use output::{ChannelSink, OutputChunk, OutputSink, OutputStream, TracingSink};
pub use readiness::{
    HealthProbe, HttpHealthProbe, Readiness, ReadinessGate, DEFAULT_INTERVAL,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT,
};
pub use supervisor::{BackendState, BackendSupervisor};
