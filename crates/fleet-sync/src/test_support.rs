//! Test doubles shared by the engine, registration and agent tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fleet_core::{FleetAgent, FleetAgentStatus, ManagedWorkload, StatusMap, WorkloadStatus};

use crate::control_plane::ControlPlaneClient;
use crate::error::{SyncError, SyncResult};
use crate::mock_control_plane::MockControlPlane;
use crate::reconciler::{LocalReconciler, SimulatedCluster};

// =============================================================================
// Counting Reconciler
// =============================================================================

/// Wraps a [`SimulatedCluster`] and counts calls. Ids in `failing` make
/// `reconcile` and `teardown` return a reconciler error.
pub struct CountingReconciler {
    inner: SimulatedCluster,
    reconciles: AtomicUsize,
    teardowns: AtomicUsize,
    releases: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl CountingReconciler {
    pub fn new() -> Self {
        Self::wrapping(SimulatedCluster::detached("fleet-system"))
    }

    pub fn wrapping(inner: SimulatedCluster) -> Self {
        CountingReconciler {
            inner,
            reconciles: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn cluster(&self) -> &SimulatedCluster {
        &self.inner
    }

    pub fn reconciles(&self) -> usize {
        self.reconciles.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    fn check(&self, id: &str) -> SyncResult<()> {
        if self.failing.lock().unwrap().contains(id) {
            Err(SyncError::reconciler(id, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalReconciler for CountingReconciler {
    async fn reconcile(&self, desired: &ManagedWorkload) -> SyncResult<()> {
        self.reconciles.fetch_add(1, Ordering::SeqCst);
        self.check(&desired.id)?;
        self.inner.reconcile(desired).await
    }

    async fn current_status(&self, id: &str) -> Option<WorkloadStatus> {
        self.inner.current_status(id).await
    }

    async fn teardown(&self, id: &str) -> SyncResult<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.check(id)?;
        self.inner.teardown(id).await
    }

    async fn release(&self, id: &str) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(id).await
    }
}

// =============================================================================
// Flaky Control Plane
// =============================================================================

/// Forwards to a [`MockControlPlane`] and fails the next N calls of a kind
/// with a transport error.
pub struct FlakyControlPlane {
    inner: Arc<MockControlPlane>,
    fetch_failures: AtomicUsize,
    push_failures: AtomicUsize,
    agent_push_failures: AtomicUsize,
    drop_agent_pushes: AtomicBool,
    pushes: Mutex<Vec<StatusMap>>,
}

impl FlakyControlPlane {
    pub fn new(inner: Arc<MockControlPlane>) -> Self {
        FlakyControlPlane {
            inner,
            fetch_failures: AtomicUsize::new(0),
            push_failures: AtomicUsize::new(0),
            agent_push_failures: AtomicUsize::new(0),
            drop_agent_pushes: AtomicBool::new(false),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_pushes(&self, n: usize) {
        self.push_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_agent_pushes(&self, n: usize) {
        self.agent_push_failures.store(n, Ordering::SeqCst);
    }

    pub fn remaining_agent_push_failures(&self) -> usize {
        self.agent_push_failures.load(Ordering::SeqCst)
    }

    /// Acknowledges agent status pushes without forwarding them.
    pub fn drop_agent_pushes(&self, drop: bool) {
        self.drop_agent_pushes.store(drop, Ordering::SeqCst);
    }

    /// Every status map successfully pushed, in order.
    pub fn pushes(&self) -> Vec<StatusMap> {
        self.pushes.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize, what: &str) -> SyncResult<()> {
        let failed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(SyncError::Transport(format!("injected {} failure", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ControlPlaneClient for FlakyControlPlane {
    async fn fetch_desired_workloads(&self, cluster_id: &str) -> SyncResult<Vec<ManagedWorkload>> {
        Self::take_failure(&self.fetch_failures, "fetch")?;
        self.inner.fetch_desired_workloads(cluster_id).await
    }

    async fn push_observed_status(&self, cluster_id: &str, statuses: &StatusMap) -> SyncResult<()> {
        Self::take_failure(&self.push_failures, "push")?;
        self.pushes.lock().unwrap().push(statuses.clone());
        self.inner.push_observed_status(cluster_id, statuses).await
    }

    async fn fetch_agent(&self, cluster_id: &str) -> SyncResult<FleetAgent> {
        self.inner.fetch_agent(cluster_id).await
    }

    async fn put_agent(&self, agent: &FleetAgent) -> SyncResult<()> {
        self.inner.put_agent(agent).await
    }

    async fn push_agent_status(&self, cluster_id: &str, status: &FleetAgentStatus) -> SyncResult<()> {
        Self::take_failure(&self.agent_push_failures, "agent status")?;
        if self.drop_agent_pushes.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.push_agent_status(cluster_id, status).await
    }
}
