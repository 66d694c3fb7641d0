//! Readiness gate: poll the backend health endpoint until it answers 200.
//!
//! The gate runs a bounded loop with a constant interval and exactly one
//! outstanding probe. Every probe is raced against the per-request timeout;
//! a probe that loses is dropped, so a late answer can never settle an
//! attempt that has already been counted as failed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, error, info};

use crate::error::ProbeError;

/// Default number of health checks before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Default pause between health checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Default ceiling for a single health check.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Outcome of [`ReadinessGate::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The backend answered 200 on attempt `attempts`.
    Ready { attempts: u32 },
    /// All `attempts` failed.
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts } | Self::TimedOut { attempts } => *attempts,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { attempts } => write!(f, "ready after {attempts} attempt(s)"),
            Self::TimedOut { attempts } => write!(f, "not ready after {attempts} attempt(s)"),
        }
    }
}

/// A single liveness check against the backend.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// `GET <url>`, healthy only on exactly `200 OK`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, ProbeError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a probe whose requests never go through a proxy and give up after `timeout`.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeError::Status(status.as_u16())),
        }
    }
}

/// Polls a [`HealthProbe`] until it succeeds or attempts run out.
#[derive(Clone)]
pub struct ReadinessGate {
    probe: Arc<dyn HealthProbe>,
    max_attempts: u32,
    interval: Duration,
    request_timeout: Duration,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Gate for the HTTP health endpoint at `url`.
    pub fn http(url: impl Into<String>) -> Result<Self, ProbeError> {
        Ok(Self::new(Arc::new(HttpHealthProbe::new(url)?)))
    }

    /// Set the attempt budget. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on how long [`wait`](Self::wait) can take.
    pub fn ceiling(&self) -> Duration {
        self.interval * (self.max_attempts - 1) + self.request_timeout * self.max_attempts
    }

    /// Poll until the backend is ready or the attempt budget is spent.
    pub async fn wait(&self) -> Readiness {
        info!(
            max_attempts = self.max_attempts,
            interval_ms = self.interval.as_millis() as u64,
            "Waiting for backend"
        );

        for attempt in 1..=self.max_attempts {
            let outcome = match tokio::time::timeout(self.request_timeout, self.probe.check()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProbeError::Timeout),
            };

            match outcome {
                Ok(()) => {
                    info!(attempts = attempt, "Backend is ready");
                    return Readiness::Ready { attempts: attempt };
                }
                Err(e) => {
                    debug!(attempt = attempt, error = %e, "Backend not ready yet");
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        error!(
            attempts = self.max_attempts,
            "Backend failed to start after {} attempts", self.max_attempts
        );
        Readiness::TimedOut {
            attempts: self.max_attempts,
        }
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
