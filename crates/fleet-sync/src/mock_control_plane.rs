//! # Reference Control Plane
//!
//! In-memory registry implementing the control-plane contract. It is the
//! ground truth for the two-sided removal rule and optionally churns
//! workloads at random so a member-cluster agent has something to do.
//!
//! ## Registry and Termination Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       MockControlPlane                                  │
//! │                                                                         │
//! │   workloads: id → ManagedWorkload      statuses: id → WorkloadStatus   │
//! │                                                                         │
//! │   report_status(map), per reported id:                                 │
//! │     unknown id                         → ignored                       │
//! │     spec.deleted && Ready/Deleted      → removed from BOTH maps        │
//! │     otherwise                          → status stored / replaced      │
//! │                                                                         │
//! │   tick() (simulation mode):                                            │
//! │     1. empty?           seed max_workloads fresh entries               │
//! │     2. len > 1 && coin  mark a uniformly chosen entry deleted          │
//! │     3. len < max && coin create one entry                              │
//! │     4. log every (id, deleted)                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The coin flips come from an injectable [`ChurnSource`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use fleet_core::{
    FleetAgent, FleetAgentStatus, ManagedWorkload, StatusMap, WorkloadStatus,
};

use crate::control_plane::ControlPlaneClient;
use crate::error::SyncResult;

// =============================================================================
// Churn Source
// =============================================================================

/// Random draws used by the simulation tick.
pub trait ChurnSource: Send {
    /// A fair coin flip.
    fn next_bool(&mut self) -> bool;

    /// Uniform index in `0..bound`. `bound` is never zero.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// [`ChurnSource`] backed by a real RNG.
pub struct RandomChurn<R> {
    rng: R,
}

impl RandomChurn<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible churn.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng + Send> ChurnSource for RandomChurn<R> {
    fn next_bool(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }
}

/// Replays fixed draws; falls back to `false` / `0` once exhausted.
#[derive(Debug, Default, Clone)]
pub struct ScriptedChurn {
    bools: VecDeque<bool>,
    indices: VecDeque<usize>,
}

impl ScriptedChurn {
    pub fn new(bools: impl IntoIterator<Item = bool>, indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            bools: bools.into_iter().collect(),
            indices: indices.into_iter().collect(),
        }
    }
}

impl ChurnSource for ScriptedChurn {
    fn next_bool(&mut self) -> bool {
        self.bools.pop_front().unwrap_or(false)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        self.indices.pop_front().unwrap_or(0) % bound
    }
}

// =============================================================================
// Mock Control Plane
// =============================================================================

pub struct MockControlPlane {
    cluster_id: String,
    max_workloads: usize,
    workloads: DashMap<String, ManagedWorkload>,
    statuses: DashMap<String, WorkloadStatus>,
    agent: RwLock<FleetAgent>,
    next_id: AtomicU64,
    churn: Mutex<Box<dyn ChurnSource>>,
}

impl MockControlPlane {
    /// Creates a registry with entropy-seeded churn.
    pub fn new(cluster_id: impl Into<String>, max_workloads: usize) -> Self {
        Self::with_churn(cluster_id, max_workloads, RandomChurn::from_entropy())
    }

    pub fn with_churn(
        cluster_id: impl Into<String>,
        max_workloads: usize,
        churn: impl ChurnSource + 'static,
    ) -> Self {
        let cluster_id = cluster_id.into();
        MockControlPlane {
            agent: RwLock::new(FleetAgent::placeholder(cluster_id.clone())),
            cluster_id,
            max_workloads,
            workloads: DashMap::new(),
            statuses: DashMap::new(),
            next_id: AtomicU64::new(1),
            churn: Mutex::new(Box::new(churn)),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    // =========================================================================
    // Registry Operations
    // =========================================================================

    /// Upserts by id; last writer wins.
    pub fn create_or_update(&self, workload: ManagedWorkload) {
        info!(workload_id = %workload.id, "control plane: create/update workload");
        self.workloads.insert(workload.id.clone(), workload);
    }

    /// Adds a fresh dummy workload with the next id.
    pub fn create_workload(&self) -> String {
        let workload = ManagedWorkload::dummy(self.next_id.fetch_add(1, Ordering::SeqCst));
        let id = workload.id.clone();
        info!(workload_id = %id, "control plane: marking workload for addition");
        self.workloads.insert(id.clone(), workload);
        id
    }

    /// Sets `spec.deleted` once. Returns false (and logs) when the id is
    /// unknown or already marked.
    pub fn mark_for_deletion(&self, id: &str) -> bool {
        let marked = match self.workloads.get_mut(id) {
            Some(mut workload) => workload.mark_deleted(),
            None => false,
        };
        if marked {
            info!(workload_id = %id, "control plane: marking workload for deletion");
        } else {
            info!(workload_id = %id, "control plane: workload absent or already deleted");
        }
        marked
    }

    /// Marks every workload for deletion. Returns how many changed.
    pub fn mark_all_for_deletion(&self) -> usize {
        info!("control plane: deleting all workloads");
        self.sorted_ids()
            .iter()
            .filter(|id| self.mark_for_deletion(id))
            .count()
    }

    /// Applies a status report, one id at a time.
    pub fn report_status(&self, cluster_id: &str, statuses: &StatusMap) {
        info!(cluster_id = %cluster_id, count = statuses.len(), "control plane: status report received");
        if cluster_id != self.cluster_id {
            warn!(cluster_id = %cluster_id, expected = %self.cluster_id, "control plane: report for another cluster");
        }

        for (id, status) in statuses {
            let deleted = match self.workloads.get(id) {
                Some(workload) => workload.is_deleted(),
                None => {
                    debug!(workload_id = %id, "control plane: status for unknown workload ignored");
                    continue;
                }
            };

            if deleted && status.is_fully_deleted() {
                info!(workload_id = %id, "control plane: removing workload as it is deleted");
                self.workloads.remove(id);
                self.statuses.remove(id);
            } else {
                self.statuses.insert(id.clone(), status.clone());
            }
        }
    }

    /// Snapshot of the registry, ordered by id.
    pub fn list_workloads(&self) -> Vec<ManagedWorkload> {
        self.sorted_ids()
            .iter()
            .filter_map(|id| self.workloads.get(id).map(|w| w.value().clone()))
            .collect()
    }

    pub fn get_status(&self, id: &str) -> Option<WorkloadStatus> {
        self.statuses.get(id).map(|s| s.value().clone())
    }

    pub async fn get_agent(&self) -> FleetAgent {
        self.agent.read().await.clone()
    }

    pub async fn get_agent_status(&self) -> Option<FleetAgentStatus> {
        self.agent.read().await.status.clone()
    }

    pub async fn replace_agent(&self, agent: FleetAgent) {
        info!(cluster_id = %agent.cluster_id, "control plane: agent document replaced");
        *self.agent.write().await = agent;
    }

    pub async fn put_agent_status(&self, status: FleetAgentStatus) {
        info!(
            active = status.capacity.active_workloads,
            remaining = status.capacity.remaining_workloads,
            "control plane: agent status received"
        );
        self.agent.write().await.status = Some(status);
    }

    /// Ids ordered numerically when both parse, lexicographically otherwise.
    fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workloads.iter().map(|e| e.key().clone()).collect();
        ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        ids
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// One simulation step.
    pub async fn tick(&self) {
        info!("control plane: running simulation");
        let mut churn = self.churn.lock().await;

        if self.workloads.is_empty() {
            for _ in 0..self.max_workloads {
                self.create_workload();
            }
        }

        let ids = self.sorted_ids();
        if ids.len() > 1 && churn.next_bool() {
            let idx = churn.next_index(ids.len());
            self.mark_for_deletion(&ids[idx]);
        }

        if self.workloads.len() < self.max_workloads && churn.next_bool() {
            let id = self.create_workload();
            info!(workload_id = %id, "control plane: created a new workload");
        }

        info!("--------------------------------------------------");
        for workload in self.list_workloads() {
            info!(workload_id = %workload.id, deleted = workload.is_deleted(), "ManagedWorkload");
        }
        info!("--------------------------------------------------");
    }

    /// Runs [`MockControlPlane::tick`] every `period` until shutdown.
    pub async fn run_simulation(self: Arc<Self>, period: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(period_secs = period.as_secs(), "Control plane simulation starting");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown_rx.recv() => {
                    info!("Control plane simulation shutting down");
                    break;
                }
            }
        }

        info!("Control plane simulation stopped");
    }
}

// =============================================================================
// Client Contract
// =============================================================================

#[async_trait]
impl ControlPlaneClient for MockControlPlane {
    async fn fetch_desired_workloads(&self, _cluster_id: &str) -> SyncResult<Vec<ManagedWorkload>> {
        Ok(self.list_workloads())
    }

    async fn push_observed_status(&self, cluster_id: &str, statuses: &StatusMap) -> SyncResult<()> {
        self.report_status(cluster_id, statuses);
        Ok(())
    }

    async fn fetch_agent(&self, _cluster_id: &str) -> SyncResult<FleetAgent> {
        Ok(self.get_agent().await)
    }

    async fn put_agent(&self, agent: &FleetAgent) -> SyncResult<()> {
        self.replace_agent(agent.clone()).await;
        Ok(())
    }

    async fn push_agent_status(&self, _cluster_id: &str, status: &FleetAgentStatus) -> SyncResult<()> {
        self.put_agent_status(status.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Condition;

    fn ids(cp: &MockControlPlane) -> Vec<String> {
        cp.list_workloads().into_iter().map(|w| w.id).collect()
    }

    fn deleted_report(id: &str) -> StatusMap {
        StatusMap::from([(id.to_string(), WorkloadStatus::deleted())])
    }

    #[tokio::test]
    async fn test_seed_tick_then_scripted_deletion() {
        // tick 1: no delete (size 3 == max, so no create draw)
        // tick 2: delete index 1 -> id "2"
        let cp = MockControlPlane::with_churn("testing", 3, ScriptedChurn::new([false, true], [1]));

        cp.tick().await;
        assert_eq!(ids(&cp), vec!["1", "2", "3"]);
        assert!(cp.list_workloads().iter().all(|w| !w.is_deleted()));

        cp.tick().await;
        let deleted: Vec<_> = cp
            .list_workloads()
            .into_iter()
            .filter(|w| w.is_deleted())
            .map(|w| w.id)
            .collect();
        assert_eq!(deleted, vec!["2"]);

        cp.report_status("testing", &deleted_report("2"));
        assert_eq!(ids(&cp), vec!["1", "3"]);
        assert!(cp.get_status("2").is_none());
    }

    #[tokio::test]
    async fn test_tick_refills_below_max() {
        let cp = MockControlPlane::with_churn("testing", 3, ScriptedChurn::new([false, true], Vec::new()));
        cp.create_or_update(ManagedWorkload::dummy(42));

        // size 1: no delete draw; create draw consumes `false`
        cp.tick().await;
        assert_eq!(ids(&cp), vec!["42"]);

        // next create draw is `true`
        cp.tick().await;
        assert_eq!(ids(&cp), vec!["1", "42"]);
    }

    #[test]
    fn test_removal_requires_both_sides() {
        let cp = MockControlPlane::new("testing", 3);
        cp.create_or_update(ManagedWorkload::dummy(1));
        cp.create_or_update(ManagedWorkload::dummy(2));

        // Ready/Deleted reported but spec not deleted: stored, not removed
        cp.report_status("testing", &deleted_report("1"));
        assert_eq!(ids(&cp), vec!["1", "2"]);
        assert!(cp.get_status("1").unwrap().is_fully_deleted());

        // spec deleted but status not Ready/Deleted: stored, not removed
        assert!(cp.mark_for_deletion("2"));
        let mut installed = WorkloadStatus::default();
        installed.set_condition(Condition::ready_installed());
        cp.report_status("testing", &StatusMap::from([("2".to_string(), installed)]));
        assert_eq!(ids(&cp), vec!["1", "2"]);

        // both: removed from both maps
        cp.report_status("testing", &deleted_report("2"));
        assert_eq!(ids(&cp), vec!["1"]);
        assert!(cp.get_status("2").is_none());
    }

    #[test]
    fn test_mark_for_deletion_is_one_shot() {
        let cp = MockControlPlane::new("testing", 3);
        cp.create_or_update(ManagedWorkload::dummy(1));

        assert!(cp.mark_for_deletion("1"));
        assert!(!cp.mark_for_deletion("1"));
        assert!(!cp.mark_for_deletion("missing"));
        assert!(cp.list_workloads()[0].is_deleted());
    }

    #[test]
    fn test_unknown_ids_in_report_are_ignored() {
        let cp = MockControlPlane::new("testing", 3);
        cp.report_status("testing", &deleted_report("9"));
        assert!(cp.get_status("9").is_none());
        assert!(cp.list_workloads().is_empty());
    }

    #[test]
    fn test_mark_all_for_deletion() {
        let cp = MockControlPlane::new("testing", 3);
        for n in 1..=3 {
            cp.create_or_update(ManagedWorkload::dummy(n));
        }
        cp.mark_for_deletion("2");

        assert_eq!(cp.mark_all_for_deletion(), 2);
        assert!(cp.list_workloads().iter().all(|w| w.is_deleted()));
    }

    #[tokio::test]
    async fn test_agent_document_embeds_last_status() {
        let cp = MockControlPlane::new("testing", 3);
        assert!(cp.get_agent_status().await.is_none());
        assert_eq!(cp.get_agent().await.cluster_id, "testing");

        let status = FleetAgentStatus {
            capacity: fleet_core::CapacityTotals::new(3, 1),
            allowed_versions: vec!["3.0.0".into()],
            health: fleet_core::AgentHealth::Healthy,
            updated_at: chrono::Utc::now(),
        };
        cp.push_agent_status("testing", &status).await.unwrap();

        assert_eq!(cp.get_agent_status().await, Some(status.clone()));
        assert_eq!(cp.fetch_agent("testing").await.unwrap().status, Some(status));
    }

    #[test]
    fn test_seeded_churn_is_reproducible() {
        let mut a = RandomChurn::seeded(7);
        let mut b = RandomChurn::seeded(7);
        for _ in 0..16 {
            assert_eq!(a.next_bool(), b.next_bool());
            assert_eq!(a.next_index(5), b.next_index(5));
        }
    }
}
