//! # Sync Engine
//!
//! Periodic reconciliation loop between the control plane's desired state
//! and the member cluster. Owns the known-state map and drives the deletion
//! lifecycle of every workload it tracks.
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            run_pass()                                   │
//! │                                                                         │
//! │  1. fetch desired ── Transport/Timeout ──► skip pass (warn)             │
//! │                                                                         │
//! │  2. for each desired workload                                          │
//! │       unknown, not deleted   ──► reconcile, track as Active            │
//! │       unknown, deleted       ──► track as DeleteRequested              │
//! │       known, spec changed    ──► reconcile (update)                    │
//! │       known, now deleted     ──► Active → DeleteRequested              │
//! │       known deleted, desired not ──► StateConflict no-op (debug)       │
//! │                                                                         │
//! │  3. for each known id absent from desired                              │
//! │       Active                 ──► implicit delete (warn)                │
//! │       ReadyDeleted, reported ──► Removed, dropped from the map         │
//! │     deleted statuses of untracked ids ──► evicted from the cache       │
//! │                                                                         │
//! │  4. DeleteRequested/TearingDown ──► teardown (every pass)              │
//! │     TearingDown + Ready/Deleted observed ──► ReadyDeleted              │
//! │                                                                         │
//! │  5. push cached status of every known workload                         │
//! │     (reconciler fills in while deleting)  ── ok ──► mark Ready/Deleted │
//! │                                                 ids as reported        │
//! │                                                                         │
//! │  6. refresh agent status (capacity, health)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reconciler failure only skips that workload. A fetch failure skips the
//! pass, a push failure skips only the push.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{AgentHealth, LifecycleState, ManagedWorkload, StatusMap, WorkloadStatus};

use crate::control_plane::{bounded, ControlPlaneClient};
use crate::error::{SyncError, SyncResult};
use crate::observer::StatusCache;
use crate::reconciler::LocalReconciler;
use crate::registration::AgentRegistration;

// =============================================================================
// Known State
// =============================================================================

/// One entry of the known-state map.
#[derive(Debug, Clone)]
pub struct TrackedWorkload {
    /// Last desired copy that was applied locally.
    pub workload: ManagedWorkload,

    pub state: LifecycleState,

    /// A `Ready/Deleted` status for this id was pushed successfully.
    pub deletion_reported: bool,

    /// First seen already deleted; nothing was ever created locally.
    pub never_materialized: bool,
}

impl TrackedWorkload {
    fn active(workload: ManagedWorkload) -> Self {
        TrackedWorkload {
            workload,
            state: LifecycleState::Active,
            deletion_reported: false,
            never_materialized: false,
        }
    }

    fn born_deleted(workload: ManagedWorkload) -> Self {
        TrackedWorkload {
            workload,
            state: LifecycleState::DeleteRequested,
            deletion_reported: false,
            never_materialized: true,
        }
    }
}

/// Counters of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub fetch_failed: bool,
    pub desired: usize,
    pub created: usize,
    pub updated: usize,
    pub deletions_requested: usize,
    pub teardowns: usize,
    pub reconcile_failures: usize,
    pub conflicts: usize,
    pub removed: usize,
    pub statuses_pushed: usize,
    pub push_failed: bool,
}

impl PassOutcome {
    pub fn is_clean(&self) -> bool {
        !self.fetch_failed && !self.push_failed && self.reconcile_failures == 0
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

pub struct SyncEngine {
    cluster_id: String,
    client: Arc<dyn ControlPlaneClient>,
    reconciler: Arc<dyn LocalReconciler>,
    cache: StatusCache,
    registration: Option<Arc<AgentRegistration>>,
    request_timeout: Duration,
    known: DashMap<String, TrackedWorkload>,
}

impl SyncEngine {
    pub fn new(
        cluster_id: impl Into<String>,
        client: Arc<dyn ControlPlaneClient>,
        reconciler: Arc<dyn LocalReconciler>,
        cache: StatusCache,
    ) -> Self {
        SyncEngine {
            cluster_id: cluster_id.into(),
            client,
            reconciler,
            cache,
            registration: None,
            request_timeout: Duration::from_secs(10),
            known: DashMap::new(),
        }
    }

    /// Refreshes the agent status at the end of every pass.
    pub fn with_registration(mut self, registration: Arc<AgentRegistration>) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn known_workloads(&self) -> usize {
        self.known.len()
    }

    /// Workloads not on their way out.
    pub fn active_workloads(&self) -> usize {
        self.known
            .iter()
            .filter(|t| t.state == LifecycleState::Active)
            .count()
    }

    pub fn tracked(&self, id: &str) -> Option<TrackedWorkload> {
        self.known.get(id).map(|t| t.value().clone())
    }

    pub fn lifecycle_state(&self, id: &str) -> Option<LifecycleState> {
        self.known.get(id).map(|t| t.state)
    }

    /// Runs one reconciliation pass. Never fails; problems are counted in
    /// the outcome and logged.
    pub async fn run_pass(&self) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        let desired = match bounded(
            self.request_timeout,
            self.client.fetch_desired_workloads(&self.cluster_id),
        )
        .await
        {
            Ok(desired) => desired,
            Err(e) => {
                warn!(cluster_id = %self.cluster_id, ?e, "Failed to fetch desired workloads, skipping pass");
                outcome.fetch_failed = true;
                return outcome;
            }
        };
        outcome.desired = desired.len();

        let desired_ids: HashSet<String> = desired.iter().map(|w| w.id.clone()).collect();
        for workload in desired {
            self.apply_desired(workload, &mut outcome).await;
        }

        for id in self.known_ids() {
            if !desired_ids.contains(&id) {
                self.handle_absent(&id, &mut outcome).await;
            }
        }

        let pruned = self.cache.prune_deleted(|id| self.known.contains_key(id));
        if pruned > 0 {
            debug!(pruned, "Evicted deleted statuses of untracked workloads");
        }

        for id in self.known_ids() {
            self.advance_deletion(&id, &mut outcome).await;
        }

        self.push_statuses(&mut outcome).await;
        self.refresh_agent(&outcome).await;

        debug!(
            cluster_id = %self.cluster_id,
            desired = outcome.desired,
            known = self.known.len(),
            created = outcome.created,
            updated = outcome.updated,
            teardowns = outcome.teardowns,
            removed = outcome.removed,
            failures = outcome.reconcile_failures,
            pushed = outcome.statuses_pushed,
            "Sync pass complete"
        );
        outcome
    }

    fn known_ids(&self) -> Vec<String> {
        self.known.iter().map(|t| t.key().clone()).collect()
    }

    // =========================================================================
    // Desired State
    // =========================================================================

    async fn apply_desired(&self, desired: ManagedWorkload, outcome: &mut PassOutcome) {
        // Copy out so no map guard is held across reconciler calls
        let local = self.known.get(&desired.id).map(|t| t.workload.clone());

        let Some(local) = local else {
            self.adopt(desired, outcome).await;
            return;
        };

        if let Err(e) = local.check_deletion_monotonic(&desired) {
            let conflict = SyncError::from(e);
            debug!(workload_id = %desired.id, %conflict, "Ignoring desired copy");
            outcome.conflicts += 1;
            return;
        }

        if desired.is_deleted() {
            if !local.is_deleted() {
                self.request_deletion(&desired.id, outcome);
            }
            return;
        }

        if local.name == desired.name && local.spec.same_shape(&desired.spec) {
            return;
        }

        match self.reconciler.reconcile(&desired).await {
            Ok(()) => {
                info!(workload_id = %desired.id, "Updated workload");
                if let Some(mut tracked) = self.known.get_mut(&desired.id) {
                    tracked.workload = desired;
                }
                outcome.updated += 1;
            }
            Err(e) => {
                error!(workload_id = %desired.id, ?e, "Failed to update workload");
                outcome.reconcile_failures += 1;
            }
        }
    }

    /// First sighting of a workload id.
    async fn adopt(&self, desired: ManagedWorkload, outcome: &mut PassOutcome) {
        if desired.is_deleted() {
            debug!(workload_id = %desired.id, "Workload first seen already deleted");
            self.known
                .insert(desired.id.clone(), TrackedWorkload::born_deleted(desired));
            outcome.deletions_requested += 1;
            return;
        }

        match self.reconciler.reconcile(&desired).await {
            Ok(()) => {
                info!(workload_id = %desired.id, "Created workload");
                self.known
                    .insert(desired.id.clone(), TrackedWorkload::active(desired));
                outcome.created += 1;
            }
            Err(e) => {
                // Not tracked, so the next pass tries again
                error!(workload_id = %desired.id, ?e, "Failed to create workload");
                outcome.reconcile_failures += 1;
            }
        }
    }

    fn request_deletion(&self, id: &str, outcome: &mut PassOutcome) {
        if let Some(mut tracked) = self.known.get_mut(id) {
            tracked.workload.mark_deleted();
            tracked.state = tracked.state.on_deletion_requested();
            info!(workload_id = %id, state = %tracked.state, "Workload deletion requested");
            outcome.deletions_requested += 1;
        }
    }

    async fn handle_absent(&self, id: &str, outcome: &mut PassOutcome) {
        let Some((state, reported)) = self
            .known
            .get(id)
            .map(|t| (t.state, t.deletion_reported))
        else {
            return;
        };

        match state {
            LifecycleState::Active => {
                warn!(workload_id = %id, "Workload no longer desired, deleting it");
                self.request_deletion(id, outcome);
            }
            LifecycleState::ReadyDeleted
                if state.on_absent_from_desired(reported) == LifecycleState::Removed =>
            {
                self.known.remove(id);
                self.cache.forget(id);
                self.reconciler.release(id).await;
                info!(workload_id = %id, "Workload removed");
                outcome.removed += 1;
            }
            _ => debug!(workload_id = %id, %state, "Absent workload still being deleted"),
        }
    }

    // =========================================================================
    // Deletion Lifecycle
    // =========================================================================

    async fn advance_deletion(&self, id: &str, outcome: &mut PassOutcome) {
        let Some(mut state) = self.lifecycle_state(id) else {
            return;
        };

        if state.needs_teardown() {
            match self.reconciler.teardown(id).await {
                Ok(()) => {
                    outcome.teardowns += 1;
                    state = state.on_teardown_invoked();
                    self.set_state(id, state);
                }
                Err(e) => {
                    error!(workload_id = %id, ?e, "Teardown failed");
                    outcome.reconcile_failures += 1;
                    return;
                }
            }
        }

        if state == LifecycleState::TearingDown {
            let status = self.observed_status(id).await;
            let next = state.on_status_observed(status.as_ref());
            if next != state {
                info!(workload_id = %id, "Workload fully deleted locally");
                self.set_state(id, next);
            }
        }
    }

    fn set_state(&self, id: &str, next: LifecycleState) {
        let Some(mut tracked) = self.known.get_mut(id) else {
            return;
        };
        match tracked.state.transition(id, next) {
            Ok(state) => tracked.state = state,
            Err(e) => debug!(workload_id = %id, %e, "Lifecycle transition rejected"),
        }
    }

    /// Status of a tracked workload as it should be reported.
    ///
    /// An active workload reports only what the Event Bus delivered. While a
    /// workload is being deleted and the cache has not caught up with the
    /// teardown yet, the reconciler answers.
    async fn observed_status(&self, id: &str) -> Option<WorkloadStatus> {
        let (state, never_materialized) = self
            .known
            .get(id)
            .map(|t| (t.state, t.never_materialized))?;

        let cached = self.cache.snapshot(id);
        if !state.is_deleting() {
            return cached;
        }

        // Nothing was created locally, so a completed teardown means deleted
        let torn_down_unseen = never_materialized
            && matches!(state, LifecycleState::TearingDown | LifecycleState::ReadyDeleted);

        match cached {
            Some(status) if status.is_fully_deleted() => Some(status),
            cached => match self.reconciler.current_status(id).await {
                Some(status) => Some(status),
                None if torn_down_unseen => Some(WorkloadStatus::deleted()),
                None => cached,
            },
        }
    }

    // =========================================================================
    // Status Reporting
    // =========================================================================

    async fn collect_statuses(&self) -> StatusMap {
        let mut statuses = StatusMap::new();
        for id in self.known_ids() {
            if let Some(status) = self.observed_status(&id).await {
                statuses.insert(id, status);
            }
        }
        statuses
    }

    async fn push_statuses(&self, outcome: &mut PassOutcome) {
        let statuses = self.collect_statuses().await;

        let pushed = bounded(
            self.request_timeout,
            self.client.push_observed_status(&self.cluster_id, &statuses),
        )
        .await;

        match pushed {
            Ok(()) => {
                outcome.statuses_pushed = statuses.len();
                for (id, status) in &statuses {
                    if !status.is_fully_deleted() {
                        continue;
                    }
                    if let Some(mut tracked) = self.known.get_mut(id) {
                        if tracked.state == LifecycleState::ReadyDeleted {
                            tracked.deletion_reported = true;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(cluster_id = %self.cluster_id, ?e, "Failed to push observed status");
                outcome.push_failed = true;
            }
        }
    }

    async fn refresh_agent(&self, outcome: &PassOutcome) {
        let Some(registration) = &self.registration else {
            return;
        };

        let health = if outcome.is_clean() {
            AgentHealth::Healthy
        } else {
            AgentHealth::Degraded
        };
        let active = u32::try_from(self.active_workloads()).unwrap_or(u32::MAX);

        if let Err(e) = registration.refresh(active, health).await {
            warn!(?e, "Failed to refresh agent status");
        }
    }

    // =========================================================================
    // Poll Loop
    // =========================================================================

    /// Spawns the poll loop. Each tick runs one pass under the handle's gate.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration) -> (JoinHandle<()>, SyncEngineHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let gate = Arc::new(Mutex::new(()));
        let last_outcome = Arc::new(RwLock::new(None));

        let handle = SyncEngineHandle {
            shutdown_tx,
            gate: gate.clone(),
            last_outcome: last_outcome.clone(),
        };
        let task = tokio::spawn(self.run(poll_interval, shutdown_rx, gate, last_outcome));
        (task, handle)
    }

    async fn run(
        self: Arc<Self>,
        poll_interval: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
        gate: Arc<Mutex<()>>,
        last_outcome: Arc<RwLock<Option<PassOutcome>>>,
    ) {
        info!(
            cluster_id = %self.cluster_id,
            poll_secs = poll_interval.as_secs(),
            "Sync engine starting"
        );

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _pass = gate.lock().await;
                    // Shutdown may have been requested while waiting on the gate
                    if shutdown_rx.try_recv().is_ok() {
                        info!("Sync engine received shutdown");
                        break;
                    }
                    let outcome = self.run_pass().await;
                    *last_outcome.write().await = Some(outcome);
                }
                _ = shutdown_rx.recv() => {
                    info!("Sync engine received shutdown");
                    break;
                }
            }
        }

        info!("Sync engine stopped");
    }
}

/// Handle for controlling a spawned [`SyncEngine`].
#[derive(Clone)]
pub struct SyncEngineHandle {
    shutdown_tx: mpsc::Sender<()>,
    gate: Arc<Mutex<()>>,
    last_outcome: Arc<RwLock<Option<PassOutcome>>>,
}

impl SyncEngineHandle {
    /// Waits for an in-flight pass and keeps the next one from starting
    /// until the guard is dropped.
    pub async fn hold(&self) -> OwnedMutexGuard<()> {
        self.gate.clone().lock_owned().await
    }

    pub async fn last_outcome(&self) -> Option<PassOutcome> {
        self.last_outcome.read().await.clone()
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Sync engine already stopped".into()))
    }
}
