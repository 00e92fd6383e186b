//! Health probing of the managed server.
//!
//! Two layers: [`HealthProbe`] answers a single yes/no question and never fails, while
//! [`wait_for_health`] polls it against a deadline and turns the deadline into an error.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::{constants::HEALTH_REQUEST_TIMEOUT, error::ServiceError};

/// Single-shot health check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` only when the server answered its health endpoint successfully.
    async fn is_healthy(&self) -> bool;

    /// Endpoint being probed, for diagnostics.
    fn endpoint(&self) -> &str;
}

/// Probes an HTTP endpoint; any 2xx response counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    endpoint: String,
}

impl HttpHealthProbe {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_timeout(endpoint, HEALTH_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self) -> bool {
        match self.client.get(&self.endpoint).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    debug!(endpoint = %self.endpoint, status = %response.status(), "Health probe rejected");
                }
                healthy
            }
            Err(err) => {
                debug!(endpoint = %self.endpoint, "Health probe failed: {err}");
                false
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Polls `probe` every `interval` until it reports `expect_up`, giving up after `ceiling`.
///
/// Sleeps before each probe. Returns the time spent waiting.
pub async fn wait_for_health(
    probe: &dyn HealthProbe,
    expect_up: bool,
    interval: Duration,
    ceiling: Duration,
) -> Result<Duration, ServiceError> {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        sleep(interval).await;
        attempt += 1;

        let healthy = probe.is_healthy().await;
        let elapsed = started.elapsed();
        if healthy == expect_up {
            info!(
                endpoint = probe.endpoint(),
                "Health endpoint {} after {}s (attempt {attempt})",
                if expect_up { "is up" } else { "is down" },
                elapsed.as_secs()
            );
            return Ok(elapsed);
        }

        if elapsed >= ceiling {
            let endpoint = probe.endpoint().to_string();
            return Err(if expect_up {
                ServiceError::StartTimeout { endpoint, elapsed }
            } else {
                ServiceError::StopTimeout { endpoint, elapsed }
            });
        }

        debug!(
            endpoint = probe.endpoint(),
            "Health check attempt {attempt} not yet {}, retrying in {:?}",
            if expect_up { "up" } else { "down" },
            interval
        );
    }
}
