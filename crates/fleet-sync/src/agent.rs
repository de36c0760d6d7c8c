//! # Fleet Agent
//!
//! Top-level orchestrator for one member cluster. Owns the Event Bus and the
//! Sync Engine and sequences their start and stop.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FleetSyncAgent                                   │
//! │                                                                         │
//! │  start():    register ──► EventBus::start ──► SyncEngine::spawn        │
//! │  shutdown(): hold engine gate ──► EventBus::stop (drain)               │
//! │              ──► stop engine ──► join                                  │
//! │                                                                         │
//! │         ┌────────────────────┬──────────────────────┐                  │
//! │         ▼                    ▼                      ▼                   │
//! │  ┌──────────────┐   ┌─────────────────┐   ┌────────────────────┐       │
//! │  │  EventBus    │   │   SyncEngine    │   │ AgentRegistration  │       │
//! │  │              │   │                 │   │                    │       │
//! │  │ workloads,   │──►│ StatusCache     │──►│ capacity, allowed  │       │
//! │  │ deployments  │   │ known-state map │   │ versions, health   │       │
//! │  └──────────────┘   └─────────────────┘   └────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use fleet_core::{ManagedWorkload, WorkloadDeployment};

use crate::config::FleetConfig;
use crate::control_plane::ControlPlaneClient;
use crate::engine::{PassOutcome, SyncEngine, SyncEngineHandle};
use crate::error::{SyncError, SyncResult};
use crate::event_bus::{EventBus, EventSink};
use crate::observer::{DeploymentObserver, StatusCache, WorkloadObserver};
use crate::reconciler::{LocalReconciler, SimulatedCluster};
use crate::registration::{AgentRegistration, RetryPolicy};

// =============================================================================
// Agent Snapshot
// =============================================================================

/// Point-in-time view of the agent for external queries.
#[derive(Debug, Clone, Default)]
pub struct FleetAgentSnapshot {
    pub running: bool,
    pub cluster_id: String,
    pub known_workloads: usize,
    pub last_outcome: Option<PassOutcome>,
    pub last_error: Option<String>,
}

// =============================================================================
// Fleet Sync Agent
// =============================================================================

pub struct FleetSyncAgent {
    config: Arc<FleetConfig>,
    bus: EventBus,
    engine: Arc<SyncEngine>,
    registration: Arc<AgentRegistration>,
    workload_events: EventSink<ManagedWorkload>,
    deployment_events: EventSink<WorkloadDeployment>,
    status: Arc<RwLock<FleetAgentSnapshot>>,
    engine_task: Option<JoinHandle<()>>,
    engine_handle: Option<SyncEngineHandle>,
}

impl FleetSyncAgent {
    pub fn builder(config: FleetConfig) -> FleetSyncAgentBuilder {
        FleetSyncAgentBuilder::new(config)
    }

    /// Sink for workload watch events. A reconciler supplied through the
    /// builder feeds its observations here.
    pub fn workload_events(&self) -> EventSink<ManagedWorkload> {
        self.workload_events.clone()
    }

    pub fn deployment_events(&self) -> EventSink<WorkloadDeployment> {
        self.deployment_events.clone()
    }

    pub async fn status(&self) -> FleetAgentSnapshot {
        let mut snapshot = self.status.read().await.clone();
        snapshot.known_workloads = self.engine.known_workloads();
        if let Some(ref handle) = self.engine_handle {
            snapshot.last_outcome = handle.last_outcome().await;
        }
        snapshot
    }

    /// Registers with the control plane, then starts the Event Bus and the
    /// poll loop.
    ///
    /// A failed registration is recorded in the snapshot but does not stop
    /// the agent; every pass pushes the agent status again.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.engine_handle.is_some() {
            info!("Fleet agent already running");
            return Ok(());
        }

        self.config.validate()?;

        info!(
            cluster_id = %self.config.cluster_id(),
            poll_secs = self.config.sync.poll_interval_secs,
            simulate = self.config.is_simulation(),
            "Starting fleet agent"
        );

        let active = u32::try_from(self.engine.active_workloads()).unwrap_or(u32::MAX);
        if let Err(e) = self.registration.register(active).await {
            error!(?e, "Fleet agent registration failed, continuing");
            self.status.write().await.last_error = Some(e.to_string());
        }

        self.bus.start()?;

        let (task, handle) = self.engine.clone().spawn(self.config.poll_interval());
        self.engine_task = Some(task);
        self.engine_handle = Some(handle);

        self.status.write().await.running = true;
        info!("Fleet agent started");
        Ok(())
    }

    /// Stops the Event Bus (draining callbacks) before the engine can start
    /// another pass, then stops the engine.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down fleet agent");

        let Some(handle) = self.engine_handle.take() else {
            self.bus.stop().await;
            info!("Fleet agent stopped");
            return Ok(());
        };

        let gate = handle.hold().await;
        self.bus.stop().await;
        if let Err(e) = handle.shutdown().await {
            warn!(?e, "Sync engine shutdown signal not delivered");
        }
        let last_outcome = handle.last_outcome().await;
        drop(gate);

        if let Some(task) = self.engine_task.take() {
            task.await
                .map_err(|e| SyncError::Internal(format!("Sync engine task failed: {}", e)))?;
        }

        {
            let mut s = self.status.write().await;
            s.running = false;
            s.last_outcome = last_outcome;
        }

        info!("Fleet agent stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Assembles a [`FleetSyncAgent`].
///
/// Without an explicit reconciler the agent drives a [`SimulatedCluster`]
/// wired to its own Event Bus.
pub struct FleetSyncAgentBuilder {
    config: FleetConfig,
    client: Option<Arc<dyn ControlPlaneClient>>,
    reconciler: Option<Arc<dyn LocalReconciler>>,
    retry: Option<RetryPolicy>,
}

impl FleetSyncAgentBuilder {
    pub fn new(config: FleetConfig) -> Self {
        FleetSyncAgentBuilder {
            config,
            client: None,
            reconciler: None,
            retry: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ControlPlaneClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn LocalReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> SyncResult<FleetSyncAgent> {
        let client = self
            .client
            .ok_or_else(|| SyncError::InvalidConfig("Control plane client required".into()))?;
        self.config.validate()?;

        let cache = StatusCache::new();
        let mut bus = EventBus::new(self.config.resync_interval());
        let workload_events = bus.watch(WorkloadObserver::new(cache.clone()))?;
        let deployment_events = bus.watch(DeploymentObserver::new(cache.clone()))?;

        let reconciler: Arc<dyn LocalReconciler> = match self.reconciler {
            Some(reconciler) => reconciler,
            None => Arc::new(SimulatedCluster::new(
                self.config.cluster.namespace.clone(),
                workload_events.clone(),
                deployment_events.clone(),
            )),
        };

        let mut registration = AgentRegistration::new(client.clone(), &self.config);
        if let Some(retry) = self.retry {
            registration = registration.with_retry(retry);
        }
        let registration = Arc::new(registration);

        let engine = SyncEngine::new(self.config.cluster_id(), client, reconciler, cache)
            .with_registration(registration.clone())
            .with_request_timeout(self.config.request_timeout());

        let status = FleetAgentSnapshot {
            cluster_id: self.config.cluster_id().to_string(),
            ..Default::default()
        };

        Ok(FleetSyncAgent {
            config: Arc::new(self.config),
            bus,
            engine: Arc::new(engine),
            registration,
            workload_events,
            deployment_events,
            status: Arc::new(RwLock::new(status)),
            engine_task: None,
            engine_handle: None,
        })
    }
}
