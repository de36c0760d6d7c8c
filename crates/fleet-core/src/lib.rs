//! # fleet-core: Pure Domain Model for the Fleet Agent
//!
//! This crate holds the data model shared by the member-cluster agent and the
//! control plane, plus the rules that govern it. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fleet Agent Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Control Plane (remote)                       │   │
//! │  │        desired workloads ─┐          ┌─ observed status         │   │
//! │  └───────────────────────────┼──────────┼──────────────────────────┘   │
//! │                              ▼          │                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 fleet-sync (Sync Engine, Event Bus)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fleet-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ condition │  │ lifecycle │  │ validation│  │   │
//! │  │   │ Workload  │  │ Ready/    │  │ Active →  │  │   ids,    │  │   │
//! │  │   │ Agent doc │  │ Deleted   │  │ Removed   │  │ versions  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • PURE FUNCTIONS                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Managed workloads, deployments, the agent document
//! - [`condition`] - Status conditions and the `Ready/Deleted` termination check
//! - [`lifecycle`] - Deletion lifecycle state machine
//! - [`error`] - Domain error types
//! - [`validation`] - Identifier and version-list validation
//!
//! ## Example Usage
//!
//! ```rust
//! use fleet_core::condition::{is_fully_deleted, Condition};
//! use fleet_core::types::WorkloadStatus;
//!
//! let mut status = WorkloadStatus::default();
//! assert!(!is_fully_deleted(&status));
//!
//! status.set_condition(Condition::ready_deleted());
//! assert!(is_fully_deleted(&status));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod condition;
pub mod error;
pub mod lifecycle;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use condition::{Condition, ConditionReason, ConditionStatus, ConditionType};
pub use error::{CoreError, CoreResult, ValidationError};
pub use lifecycle::LifecycleState;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Label every resource owned by the agent carries.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on agent-owned resources.
pub const MANAGED_BY_VALUE: &str = "fleet-agent";

/// Label on backing deployments naming the workload they belong to.
pub const WORKLOAD_ID_LABEL: &str = "fleet.bf2.dev/workload-id";

/// Maximum length of a workload id (DNS label length).
pub const MAX_WORKLOAD_ID_LEN: usize = 63;
