//! # Observed Status Cache
//!
//! Event Bus observers for both watched kinds, writing into one shared
//! [`StatusCache`]. The sync engine reads a merged snapshot per workload.
//!
//! ```text
//! WorkloadObserver   ──► statuses:    id → WorkloadStatus
//! DeploymentObserver ──► deployments: id → { deployment name → ComponentStatus }
//!
//! snapshot(id) = statuses[id] with components = deployments[id] (name order)
//! ```
//!
//! Both maps are `DashMap`s: callbacks from the informer tasks and reads from
//! the engine only contend on the shard of one workload id.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use fleet_core::{ComponentStatus, ManagedWorkload, WorkloadDeployment, WorkloadStatus};

use crate::event_bus::ResourceObserver;

// =============================================================================
// Status Cache
// =============================================================================

#[derive(Default)]
struct CacheInner {
    statuses: DashMap<String, WorkloadStatus>,
    deployments: DashMap<String, BTreeMap<String, ComponentStatus>>,
}

/// Latest observed status per workload id. Cheap to clone.
#[derive(Clone, Default)]
pub struct StatusCache {
    inner: Arc<CacheInner>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_status(&self, id: &str, status: WorkloadStatus) {
        self.inner.statuses.insert(id.to_string(), status);
    }

    pub fn record_deployment(&self, deployment: &WorkloadDeployment) {
        self.inner
            .deployments
            .entry(deployment.workload_id.clone())
            .or_default()
            .insert(deployment.name.clone(), deployment.component_status());
    }

    pub fn remove_deployment(&self, deployment: &WorkloadDeployment) {
        let now_empty = match self.inner.deployments.get_mut(&deployment.workload_id) {
            Some(mut components) => {
                components.remove(&deployment.name);
                components.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner
                .deployments
                .remove_if(&deployment.workload_id, |_, c| c.is_empty());
        }
    }

    /// Drops everything known about a workload.
    pub fn forget(&self, id: &str) {
        self.inner.statuses.remove(id);
        self.inner.deployments.remove(id);
        debug!(workload_id = %id, "Evicted workload from status cache");
    }

    /// Merged status of one workload, or `None` when no workload status has
    /// been observed yet.
    pub fn snapshot(&self, id: &str) -> Option<WorkloadStatus> {
        let mut status = self.inner.statuses.get(id)?.value().clone();
        status.components = self
            .inner
            .deployments
            .get(id)
            .map(|components| components.values().cloned().collect())
            .unwrap_or_default();
        Some(status)
    }

    /// Evicts fully deleted workloads for which `tracked` is false and
    /// returns how many were dropped. Covers resources deleted on the
    /// cluster that the engine never tracked or has already removed.
    pub fn prune_deleted(&self, tracked: impl Fn(&str) -> bool) -> usize {
        let stale: Vec<String> = self
            .inner
            .statuses
            .iter()
            .filter(|entry| entry.value().is_fully_deleted() && !tracked(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            self.forget(id);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.statuses.is_empty()
    }
}

// =============================================================================
// Observers
// =============================================================================

/// Caches the status carried by managed workload resources.
pub struct WorkloadObserver {
    cache: StatusCache,
}

impl WorkloadObserver {
    pub fn new(cache: StatusCache) -> Self {
        Self { cache }
    }

    fn record(&self, workload: &ManagedWorkload) {
        match workload.status {
            Some(ref status) => self.cache.record_status(&workload.id, status.clone()),
            None => trace!(workload_id = %workload.id, "Workload has no status yet"),
        }
    }
}

impl ResourceObserver<ManagedWorkload> for WorkloadObserver {
    fn on_add(&self, workload: &ManagedWorkload) {
        debug!(workload_id = %workload.id, "Workload added");
        self.record(workload);
    }

    fn on_update(&self, _old: &ManagedWorkload, new: &ManagedWorkload) {
        self.record(new);
    }

    fn on_delete(&self, workload: &ManagedWorkload) {
        // The final status stays cached until the engine removes the workload
        // or prunes it as untracked
        debug!(workload_id = %workload.id, "Workload resource deleted");
        self.record(workload);
    }
}

/// Caches readiness of backing deployments.
pub struct DeploymentObserver {
    cache: StatusCache,
}

impl DeploymentObserver {
    pub fn new(cache: StatusCache) -> Self {
        Self { cache }
    }
}

impl ResourceObserver<WorkloadDeployment> for DeploymentObserver {
    fn on_add(&self, deployment: &WorkloadDeployment) {
        self.cache.record_deployment(deployment);
    }

    fn on_update(&self, _old: &WorkloadDeployment, new: &WorkloadDeployment) {
        self.cache.record_deployment(new);
    }

    fn on_delete(&self, deployment: &WorkloadDeployment) {
        debug!(
            workload_id = %deployment.workload_id,
            deployment = %deployment.name,
            "Deployment deleted"
        );
        self.cache.remove_deployment(deployment);
    }
}
