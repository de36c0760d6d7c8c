//! # Control-Plane Client
//!
//! The agent's view of the remote registry. One member cluster talks to it
//! under its own cluster id.
//!
//! | Operation                 | Transport              | Failure            |
//! |---------------------------|------------------------|--------------------|
//! | `fetch_desired_workloads` | `GET  .../workloads`   | `Transport`        |
//! | `push_observed_status`    | `PUT  .../workloads/status` | `Transport`   |
//! | `fetch_agent`             | `GET  .../`            | `Transport`        |
//! | `put_agent`               | `PUT  .../`            | `Transport`        |
//! | `push_agent_status`       | `PUT  .../status`      | `Transport`        |
//!
//! An empty desired list is a valid answer. A status push may be applied
//! partially by the remote side.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleet_core::{FleetAgent, FleetAgentStatus, ManagedWorkload, StatusMap};

use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Desired workloads for this cluster. Authoritative for one pass only.
    async fn fetch_desired_workloads(&self, cluster_id: &str) -> SyncResult<Vec<ManagedWorkload>>;

    /// Observed status per workload id.
    async fn push_observed_status(&self, cluster_id: &str, statuses: &StatusMap) -> SyncResult<()>;

    /// The cluster's agent document.
    async fn fetch_agent(&self, cluster_id: &str) -> SyncResult<FleetAgent>;

    /// Creates or replaces the cluster's agent document.
    async fn put_agent(&self, agent: &FleetAgent) -> SyncResult<()>;

    async fn push_agent_status(&self, cluster_id: &str, status: &FleetAgentStatus) -> SyncResult<()>;
}

#[async_trait]
impl<T: ControlPlaneClient + ?Sized> ControlPlaneClient for Arc<T> {
    async fn fetch_desired_workloads(&self, cluster_id: &str) -> SyncResult<Vec<ManagedWorkload>> {
        (**self).fetch_desired_workloads(cluster_id).await
    }

    async fn push_observed_status(&self, cluster_id: &str, statuses: &StatusMap) -> SyncResult<()> {
        (**self).push_observed_status(cluster_id, statuses).await
    }

    async fn fetch_agent(&self, cluster_id: &str) -> SyncResult<FleetAgent> {
        (**self).fetch_agent(cluster_id).await
    }

    async fn put_agent(&self, agent: &FleetAgent) -> SyncResult<()> {
        (**self).put_agent(agent).await
    }

    async fn push_agent_status(&self, cluster_id: &str, status: &FleetAgentStatus) -> SyncResult<()> {
        (**self).push_agent_status(cluster_id, status).await
    }
}

/// Runs one remote call under a deadline.
pub(crate) async fn bounded<T, F>(deadline: Duration, call: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(deadline.as_secs())),
    }
}
