//! # Local Reconciler
//!
//! Contract between the sync engine and whatever turns a workload spec into
//! concrete cluster resources, plus [`SimulatedCluster`], an in-memory member
//! cluster used in simulation mode and in tests.
//!
//! ## Simulated Cluster
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SimulatedCluster                                 │
//! │                                                                         │
//! │  reconcile(desired)                                                    │
//! │    unchanged spec ──► no-op                                            │
//! │    otherwise      ──► store workload (Ready=True/Installed)            │
//! │                       store deployment "<name>-kafka" (3/3 ready)      │
//! │                       emit Applied(workload), Applied(deployment)      │
//! │                                                                         │
//! │  teardown(id)                                                          │
//! │    remove deployment  ──► emit Deleted(deployment)                     │
//! │    remove workload    ──► emit Deleted(workload, Ready=False/Deleted)  │
//! │    keep a tombstone so current_status(id) still answers Deleted        │
//! │    absent id          ──► Ok (idempotent)                              │
//! │                                                                         │
//! │  release(id) drops the tombstone once the engine removed the workload  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use fleet_core::{
    Condition, ManagedWorkload, WorkloadDeployment, WorkloadStatus, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE, WORKLOAD_ID_LABEL,
};

use crate::error::{SyncError, SyncResult};
use crate::event_bus::EventSink;

// =============================================================================
// Local Reconciler Contract
// =============================================================================

/// Materializes workloads inside the member cluster.
///
/// Every call must return quickly; none waits for resources to converge.
#[async_trait]
pub trait LocalReconciler: Send + Sync {
    /// Creates or updates the resources for `desired`. Idempotent.
    async fn reconcile(&self, desired: &ManagedWorkload) -> SyncResult<()>;

    /// Current status of a workload, if the reconciler knows it.
    async fn current_status(&self, id: &str) -> Option<WorkloadStatus>;

    /// Starts removing a workload's resources. Idempotent, and Ok for an
    /// unknown id.
    async fn teardown(&self, id: &str) -> SyncResult<()>;

    /// The workload is gone on both sides; drop any residual bookkeeping.
    async fn release(&self, _id: &str) {}
}

// =============================================================================
// Simulated Member Cluster
// =============================================================================

/// Replicas every simulated deployment runs with.
const SIMULATED_REPLICAS: u32 = 3;

/// In-memory member cluster feeding the Event Bus.
pub struct SimulatedCluster {
    namespace: String,
    workloads: DashMap<String, ManagedWorkload>,
    deployments: DashMap<String, WorkloadDeployment>,
    tombstones: DashMap<String, WorkloadStatus>,
    workload_events: EventSink<ManagedWorkload>,
    deployment_events: EventSink<WorkloadDeployment>,
}

impl SimulatedCluster {
    pub fn new(
        namespace: impl Into<String>,
        workload_events: EventSink<ManagedWorkload>,
        deployment_events: EventSink<WorkloadDeployment>,
    ) -> Self {
        SimulatedCluster {
            namespace: namespace.into(),
            workloads: DashMap::new(),
            deployments: DashMap::new(),
            tombstones: DashMap::new(),
            workload_events,
            deployment_events,
        }
    }

    /// A cluster whose events go nowhere.
    pub fn detached(namespace: impl Into<String>) -> Self {
        Self::new(namespace, EventSink::detached(), EventSink::detached())
    }

    pub fn workload(&self, id: &str) -> Option<ManagedWorkload> {
        self.workloads.get(id).map(|w| w.value().clone())
    }

    pub fn deployment(&self, workload_id: &str) -> Option<WorkloadDeployment> {
        self.deployments.get(workload_id).map(|d| d.value().clone())
    }

    fn managed_labels(&self, workload_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (WORKLOAD_ID_LABEL.to_string(), workload_id.to_string()),
        ])
    }

    fn materialize(&self, desired: &ManagedWorkload) -> (ManagedWorkload, WorkloadDeployment) {
        let previous = self.workload(&desired.id);

        let mut status = previous
            .and_then(|w| w.status)
            .unwrap_or_default();
        status.set_condition(Condition::ready_installed());
        status.versions = Some(desired.spec.versions.clone());
        status.updated_timestamp = Some(Utc::now());

        let mut workload = desired.clone();
        workload.labels = self.managed_labels(&desired.id);
        workload.status = Some(status);

        let uid = self
            .deployment(&desired.id)
            .map(|d| d.uid)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let deployment = WorkloadDeployment {
            name: format!("{}-kafka", desired.name),
            namespace: self.namespace.clone(),
            workload_id: desired.id.clone(),
            labels: self.managed_labels(&desired.id),
            replicas: SIMULATED_REPLICAS,
            ready_replicas: SIMULATED_REPLICAS,
            uid,
        };

        (workload, deployment)
    }
}

#[async_trait]
impl LocalReconciler for SimulatedCluster {
    async fn reconcile(&self, desired: &ManagedWorkload) -> SyncResult<()> {
        if desired.is_deleted() {
            return self.teardown(&desired.id).await;
        }

        if let Some(existing) = self.workloads.get(&desired.id) {
            if existing.spec == desired.spec && existing.name == desired.name {
                debug!(workload_id = %desired.id, "Spec unchanged, nothing to reconcile");
                return Ok(());
            }
        }

        let (workload, deployment) = self.materialize(desired);
        let created = self
            .workloads
            .insert(desired.id.clone(), workload.clone())
            .is_none();
        self.deployments
            .insert(desired.id.clone(), deployment.clone());
        self.tombstones.remove(&desired.id);

        self.workload_events.apply(workload);
        self.deployment_events.apply(deployment);

        if created {
            info!(workload_id = %desired.id, namespace = %self.namespace, "Created workload resources");
        } else {
            info!(workload_id = %desired.id, "Updated workload resources");
        }
        Ok(())
    }

    async fn current_status(&self, id: &str) -> Option<WorkloadStatus> {
        if let Some(workload) = self.workloads.get(id) {
            return workload.status.clone();
        }
        self.tombstones.get(id).map(|s| s.value().clone())
    }

    async fn teardown(&self, id: &str) -> SyncResult<()> {
        if id.is_empty() {
            return Err(SyncError::reconciler(id, "empty workload id"));
        }

        if let Some((_, deployment)) = self.deployments.remove(id) {
            debug!(workload_id = %id, deployment = %deployment.name, "Deleting deployment");
            self.deployment_events.delete(deployment);
        }

        if let Some((_, mut workload)) = self.workloads.remove(id) {
            workload.mark_deleted();
            let mut status = workload.status.take().unwrap_or_default();
            status.set_condition(Condition::ready_deleted());
            status.updated_timestamp = Some(Utc::now());

            self.tombstones.insert(id.to_string(), status.clone());
            workload.status = Some(status);
            self.workload_events.delete(workload);

            info!(workload_id = %id, "Workload torn down");
        }

        Ok(())
    }

    async fn release(&self, id: &str) {
        self.tombstones.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::ConditionReason;

    #[tokio::test]
    async fn test_reconcile_creates_resources() {
        let cluster = SimulatedCluster::detached("fleet-system");
        let desired = ManagedWorkload::dummy(1);

        cluster.reconcile(&desired).await.unwrap();

        let workload = cluster.workload("1").unwrap();
        assert_eq!(workload.labels.get(MANAGED_BY_LABEL).unwrap(), MANAGED_BY_VALUE);
        let status = cluster.current_status("1").await.unwrap();
        assert_eq!(status.ready_reason(), Some(ConditionReason::Installed));

        let deployment = cluster.deployment("1").unwrap();
        assert_eq!(deployment.name, "workload-1-kafka");
        assert_eq!(deployment.namespace, "fleet-system");
    }

    #[tokio::test]
    async fn test_update_keeps_deployment_uid() {
        let cluster = SimulatedCluster::detached("ns");
        let mut desired = ManagedWorkload::dummy(1);
        cluster.reconcile(&desired).await.unwrap();
        let uid = cluster.deployment("1").unwrap().uid;

        desired.spec.capacity.max_partitions = 500;
        cluster.reconcile(&desired).await.unwrap();

        assert_eq!(cluster.deployment("1").unwrap().uid, uid);
        assert_eq!(cluster.workload("1").unwrap().spec.capacity.max_partitions, 500);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let cluster = SimulatedCluster::detached("ns");
        cluster.reconcile(&ManagedWorkload::dummy(3)).await.unwrap();

        cluster.teardown("3").await.unwrap();
        cluster.teardown("3").await.unwrap();
        cluster.teardown("never-existed").await.unwrap();

        assert!(cluster.workload("3").is_none());
        assert!(cluster.deployment("3").is_none());
        assert!(cluster.current_status("3").await.unwrap().is_fully_deleted());

        cluster.release("3").await;
        assert!(cluster.current_status("3").await.is_none());
    }
}
