//! # Agent Registration
//!
//! Publishes this member cluster's [`FleetAgentStatus`] and keeps the agent
//! document's allowed versions in line with configuration.
//!
//! ## Registration Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. fetch_agent ── allowed_versions differ? ──► put_agent (updated)    │
//! │                                                                         │
//! │  2. push_agent_status(status)                                          │
//! │     fetch_agent ── status == pushed? ──► registered                    │
//! │                    otherwise         ──► RegistrationUnconfirmed       │
//! │                                                                         │
//! │  Step 2 is retried with exponential backoff while the error is         │
//! │  retryable, until max_attempts or max_elapsed is reached.              │
//! │                                                                         │
//! │  Every pass afterwards: refresh(active, health) pushes new capacity.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tracing::{debug, info, warn};

use fleet_core::{AgentHealth, CapacityTotals, FleetAgentStatus};

use crate::config::FleetConfig;
use crate::control_plane::{bounded, ControlPlaneClient};
use crate::error::{SyncError, SyncResult};

/// Retry bounds for the registration handshake.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        // Restarts the clock and the current interval from initial_interval
        backoff.reset();
        backoff
    }
}

pub struct AgentRegistration {
    client: Arc<dyn ControlPlaneClient>,
    cluster_id: String,
    allowed_versions: Vec<String>,
    max_workloads: u32,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl AgentRegistration {
    pub fn new(client: Arc<dyn ControlPlaneClient>, config: &FleetConfig) -> Self {
        AgentRegistration {
            client,
            cluster_id: config.cluster_id().to_string(),
            allowed_versions: config.cluster.allowed_versions.clone(),
            max_workloads: config.control_plane.max_workloads,
            request_timeout: config.request_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Status document for the current number of active workloads.
    pub fn build_status(&self, active_workloads: u32, health: AgentHealth) -> FleetAgentStatus {
        FleetAgentStatus {
            capacity: CapacityTotals::new(self.max_workloads, active_workloads),
            allowed_versions: self.allowed_versions.clone(),
            health,
            updated_at: Utc::now(),
        }
    }

    /// Runs the full handshake. Returns the confirmed status.
    pub async fn register(&self, active_workloads: u32) -> SyncResult<FleetAgentStatus> {
        info!(cluster_id = %self.cluster_id, "Registering fleet agent");

        self.sync_allowed_versions().await?;

        let status = self.build_status(active_workloads, AgentHealth::Healthy);
        let mut backoff = self.retry.backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.push_and_confirm(&status).await {
                Ok(()) => {
                    info!(cluster_id = %self.cluster_id, attempt, "Fleet agent registered");
                    return Ok(status);
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                warn!(?err, attempt, "Registration failed");
                return Err(err);
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    debug!(?delay, attempt, ?err, "Retrying registration");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(?err, attempt, "Registration retries exhausted");
                    return Err(err);
                }
            }
        }
    }

    /// Updates `spec.allowed_versions` only when it differs from config.
    /// Returns whether the document was written.
    pub async fn sync_allowed_versions(&self) -> SyncResult<bool> {
        let mut agent = bounded(self.request_timeout, self.client.fetch_agent(&self.cluster_id)).await?;
        if agent.spec.allowed_versions == self.allowed_versions {
            debug!(cluster_id = %self.cluster_id, "Allowed versions unchanged");
            return Ok(false);
        }

        agent.cluster_id = self.cluster_id.clone();
        agent.spec.allowed_versions = self.allowed_versions.clone();
        bounded(self.request_timeout, self.client.put_agent(&agent)).await?;

        info!(
            cluster_id = %self.cluster_id,
            versions = ?self.allowed_versions,
            "Updated allowed versions on agent document"
        );
        Ok(true)
    }

    /// Pushes fresh capacity counts. Called once per pass.
    pub async fn refresh(&self, active_workloads: u32, health: AgentHealth) -> SyncResult<()> {
        let status = self.build_status(active_workloads, health);
        bounded(
            self.request_timeout,
            self.client.push_agent_status(&self.cluster_id, &status),
        )
        .await
    }

    async fn push_and_confirm(&self, status: &FleetAgentStatus) -> SyncResult<()> {
        bounded(
            self.request_timeout,
            self.client.push_agent_status(&self.cluster_id, status),
        )
        .await?;

        let agent = bounded(self.request_timeout, self.client.fetch_agent(&self.cluster_id)).await?;
        if agent.status.as_ref() == Some(status) {
            Ok(())
        } else {
            Err(SyncError::RegistrationUnconfirmed {
                cluster_id: self.cluster_id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_control_plane::MockControlPlane;
    use crate::test_support::FlakyControlPlane;

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
            max_attempts,
        }
    }

    fn config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.cluster.allowed_versions = vec!["3.0.0".into(), "3.1.0".into()];
        config
    }

    #[tokio::test]
    async fn test_register_confirms_pushed_status() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let registration = AgentRegistration::new(cp.clone(), &config());

        let status = registration.register(1).await.unwrap();
        assert_eq!(status.capacity, CapacityTotals::new(3, 1));

        let agent = cp.get_agent().await;
        assert_eq!(agent.status, Some(status));
        assert_eq!(agent.spec.allowed_versions, vec!["3.0.0", "3.1.0"]);
    }

    #[tokio::test]
    async fn test_allowed_versions_written_only_on_change() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let registration = AgentRegistration::new(cp.clone(), &config());

        assert!(registration.sync_allowed_versions().await.unwrap());
        assert!(!registration.sync_allowed_versions().await.unwrap());
    }

    #[tokio::test]
    async fn test_register_retries_transport_failures() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let flaky = Arc::new(FlakyControlPlane::new(cp.clone()));
        let registration = AgentRegistration::new(flaky.clone(), &config()).with_retry(quick_retry(5));

        flaky.fail_agent_pushes(2);
        registration.register(0).await.unwrap();
        assert!(cp.get_agent_status().await.is_some());
    }

    #[tokio::test]
    async fn test_register_gives_up_after_max_attempts() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let flaky = Arc::new(FlakyControlPlane::new(cp.clone()));
        let registration = AgentRegistration::new(flaky.clone(), &config()).with_retry(quick_retry(3));

        flaky.fail_agent_pushes(10);
        let err = registration.register(0).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(flaky.remaining_agent_push_failures(), 7);
    }

    #[tokio::test]
    async fn test_unconfirmed_when_status_not_echoed() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let flaky = Arc::new(FlakyControlPlane::new(cp.clone()));
        let registration = AgentRegistration::new(flaky.clone(), &config()).with_retry(quick_retry(2));

        flaky.drop_agent_pushes(true);
        let err = registration.register(0).await.unwrap_err();
        assert!(matches!(err, SyncError::RegistrationUnconfirmed { .. }));
    }

    #[tokio::test]
    async fn test_refresh_reports_capacity() {
        let cp = Arc::new(MockControlPlane::new("testing", 3));
        let registration = AgentRegistration::new(cp.clone(), &config());

        registration.refresh(2, AgentHealth::Degraded).await.unwrap();
        let status = cp.get_agent_status().await.unwrap();
        assert_eq!(status.capacity.remaining_workloads, 1);
        assert_eq!(status.health, AgentHealth::Degraded);
    }
}
