//! # fleet-sync: Synchronization Engine for the Fleet Agent
//!
//! Keeps one member cluster's managed workloads consistent with the desired
//! state held by a remote control plane, and reports observed status back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fleet Agent Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                FleetSyncAgent (Main Orchestrator)                │  │
//! │  │                                                                  │  │
//! │  │  Registers with the control plane, starts and stops components   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   EventBus     │  │  SyncEngine    │  │  ControlPlaneClient    │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Watches        │  │ Polls desired, │  │ Desired workloads,     │    │
//! │  │ workloads and  │─►│ reconciles,    │◄►│ status map, agent      │    │
//! │  │ deployments    │  │ deletes, pushes│  │ document               │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              ▼                                          │
//! │                      ┌────────────────┐  ┌────────────────────────┐    │
//! │                      │LocalReconciler │  │  MockControlPlane      │    │
//! │                      │(SimulatedClus- │  │  + REST surface        │    │
//! │                      │ ter in sim)    │  │  + churn simulation    │    │
//! │                      └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `FleetSyncAgent` orchestrator and builder
//! - [`config`] - Agent configuration (TOML + environment)
//! - [`error`] - Sync error types
//! - [`event_bus`] - Informer layer with resync and label filtering
//! - [`observer`] - Observers and the observed status cache
//! - [`reconciler`] - Local Reconciler contract and the simulated cluster
//! - [`control_plane`] - Control-plane client contract
//! - [`mock_control_plane`] - In-memory reference control plane
//! - [`control_plane_api`] - REST surface of the reference control plane
//! - [`registration`] - Agent status registration
//! - [`engine`] - The reconciliation loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleet_sync::{FleetConfig, FleetSyncAgent, MockControlPlane};
//!
//! let config = FleetConfig::load_or_default(None);
//! let control_plane = Arc::new(MockControlPlane::new(config.cluster_id(), 3));
//!
//! let mut agent = FleetSyncAgent::builder(config)
//!     .with_client(control_plane)
//!     .build()?;
//! agent.start().await?;
//!
//! let status = agent.status().await;
//! println!("Tracking {} workloads", status.known_workloads);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod observer;
pub mod reconciler;

pub mod control_plane;
pub mod control_plane_api;
pub mod mock_control_plane;

pub mod engine;
pub mod registration;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{FleetAgentSnapshot, FleetSyncAgent, FleetSyncAgentBuilder};
pub use config::{ClusterConfig, ControlPlaneSettings, FleetConfig, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use event_bus::{EventBus, EventSink, LabelSelector, Resource, ResourceObserver, WatchEvent};
pub use observer::{DeploymentObserver, StatusCache, WorkloadObserver};
pub use reconciler::{LocalReconciler, SimulatedCluster};

pub use control_plane::ControlPlaneClient;
pub use control_plane_api::{ControlPlaneServer, ControlPlaneServerHandle};
pub use mock_control_plane::{ChurnSource, MockControlPlane, RandomChurn, ScriptedChurn};

pub use engine::{PassOutcome, SyncEngine, SyncEngineHandle, TrackedWorkload};
pub use registration::{AgentRegistration, RetryPolicy};
