//! # Domain Types
//!
//! Documents exchanged between a member-cluster agent and the control plane.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ ManagedWorkload  │   │  WorkloadStatus  │   │ WorkloadDeploy-  │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ment             │    │
//! │  │ id (immutable)   │   │ conditions       │   │ ──────────────── │    │
//! │  │ name             │   │ components       │   │ workload_id      │    │
//! │  │ spec.deleted     │   │ versions         │   │ replicas         │    │
//! │  │ spec.capacity    │   │ updated_timestamp│   │ ready_replicas   │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │   FleetAgent     │   │ FleetAgentStatus │   │  CapacityTotals  │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ cluster_id       │   │ capacity         │   │ max              │    │
//! │  │ spec.allowed_... │   │ allowed_versions │   │ active           │    │
//! │  │ status (opt)     │   │ health           │   │ remaining        │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Every document serializes in camelCase JSON. Unknown spec fields are kept
//! in `WorkloadSpec::extra` and handed to the reconciler untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{self, Condition, ConditionReason, ConditionType};
use crate::error::{CoreError, CoreResult};

/// Observed status per workload id, as pushed upstream in one report.
pub type StatusMap = BTreeMap<String, WorkloadStatus>;

// =============================================================================
// Managed Workload
// =============================================================================

/// One managed workload (a Kafka-like cluster) assigned to this member cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedWorkload {
    /// Fleet-unique identifier, never changes.
    pub id: String,

    /// Resource name inside the member cluster.
    pub name: String,

    /// Labels on the local resource. Empty on control-plane copies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    pub spec: WorkloadSpec,

    /// Last status the owner attached, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkloadStatus>,
}

impl ManagedWorkload {
    /// Sample workload used by the simulated control plane.
    ///
    /// ## Example
    /// ```rust
    /// use fleet_core::ManagedWorkload;
    ///
    /// let w = ManagedWorkload::dummy(2);
    /// assert_eq!(w.id, "2");
    /// assert_eq!(w.name, "workload-2");
    /// assert!(!w.is_deleted());
    /// ```
    pub fn dummy(n: u64) -> Self {
        Self {
            id: n.to_string(),
            name: format!("workload-{}", n),
            labels: BTreeMap::new(),
            spec: WorkloadSpec {
                deleted: false,
                capacity: Capacity {
                    ingress_per_sec: "50Mi".to_string(),
                    egress_per_sec: "100Mi".to_string(),
                    total_max_connections: 3000,
                    max_data_retention_size: "1000Gi".to_string(),
                    max_partitions: 1000,
                },
                versions: Versions {
                    software: "3.0.0".to_string(),
                    operator: "0.26.0".to_string(),
                },
                extra: BTreeMap::new(),
            },
            status: None,
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.spec.deleted
    }

    /// Sets `spec.deleted`. Returns `false` when it was already set.
    pub fn mark_deleted(&mut self) -> bool {
        if self.spec.deleted {
            return false;
        }
        self.spec.deleted = true;
        true
    }

    /// Rejects a desired copy that would clear a deletion already observed.
    pub fn check_deletion_monotonic(&self, desired: &ManagedWorkload) -> CoreResult<()> {
        if self.spec.deleted && !desired.spec.deleted {
            return Err(CoreError::DeletionReversal {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Desired state of a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// One-way flag: once true it stays true.
    #[serde(default)]
    pub deleted: bool,

    pub capacity: Capacity,

    pub versions: Versions,

    /// Fields the agent does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WorkloadSpec {
    /// Compares everything except the deletion flag.
    pub fn same_shape(&self, other: &WorkloadSpec) -> bool {
        self.capacity == other.capacity
            && self.versions == other.versions
            && self.extra == other.extra
    }
}

/// Capacity limits of one workload. Quantities are kept as strings ("50Mi").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub ingress_per_sec: String,
    pub egress_per_sec: String,
    pub total_max_connections: u32,
    pub max_data_retention_size: String,
    pub max_partitions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    /// Workload software version (checked against the agent's allowed list).
    pub software: String,
    pub operator: String,
}

// =============================================================================
// Workload Status
// =============================================================================

/// Observed status of a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Readiness of the backing deployments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Versions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_timestamp: Option<DateTime<Utc>>,
}

impl WorkloadStatus {
    /// A status carrying only `Ready=False/Deleted`.
    pub fn deleted() -> Self {
        let mut status = Self::default();
        status.set_condition(Condition::ready_deleted());
        status.updated_timestamp = Some(Utc::now());
        status
    }

    pub fn set_condition(&mut self, condition: Condition) {
        condition::set_condition(&mut self.conditions, condition);
    }

    pub fn condition(&self, ty: ConditionType) -> Option<&Condition> {
        condition::find_condition(&self.conditions, ty)
    }

    /// Reason on the `Ready` condition, if present.
    pub fn ready_reason(&self) -> Option<ConditionReason> {
        self.condition(ConditionType::Ready).and_then(|c| c.reason)
    }

    #[inline]
    pub fn is_fully_deleted(&self) -> bool {
        condition::is_fully_deleted(self)
    }
}

/// Readiness of one backing deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub name: String,
    pub replicas: u32,
    pub ready_replicas: u32,
}

impl ComponentStatus {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.replicas > 0 && self.ready_replicas >= self.replicas
    }
}

// =============================================================================
// Workload Deployment
// =============================================================================

/// Deployment backing a managed workload inside the member cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDeployment {
    pub name: String,
    pub namespace: String,
    pub workload_id: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub uid: String,
}

impl WorkloadDeployment {
    pub fn component_status(&self) -> ComponentStatus {
        ComponentStatus {
            name: self.name.clone(),
            replicas: self.replicas,
            ready_replicas: self.ready_replicas,
        }
    }
}

/// Body of `GET .../workloads`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedWorkloadList {
    pub items: Vec<ManagedWorkload>,
}

// =============================================================================
// Fleet Agent Document
// =============================================================================

/// The member cluster's own document on the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAgent {
    pub cluster_id: String,
    pub spec: FleetAgentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FleetAgentStatus>,
}

impl FleetAgent {
    /// Document the control plane hands out before the agent registers.
    pub fn placeholder(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            spec: FleetAgentSpec::default(),
            status: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAgentSpec {
    #[serde(default)]
    pub allowed_versions: Vec<String>,
}

/// Status document owned and pushed by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAgentStatus {
    pub capacity: CapacityTotals,
    pub allowed_versions: Vec<String>,
    pub health: AgentHealth,
    pub updated_at: DateTime<Utc>,
}

/// Workload slots on this member cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityTotals {
    pub max_workloads: u32,
    pub active_workloads: u32,
    pub remaining_workloads: u32,
}

impl CapacityTotals {
    pub fn new(max_workloads: u32, active_workloads: u32) -> Self {
        Self {
            max_workloads,
            active_workloads,
            remaining_workloads: max_workloads.saturating_sub(active_workloads),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentHealth {
    Healthy,
    Degraded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_deleted_once() {
        let mut w = ManagedWorkload::dummy(1);
        assert!(w.mark_deleted());
        assert!(!w.mark_deleted());
        assert!(w.is_deleted());
    }

    #[test]
    fn test_deletion_never_reverses() {
        let mut local = ManagedWorkload::dummy(4);
        local.mark_deleted();
        let desired = ManagedWorkload::dummy(4);

        let err = local.check_deletion_monotonic(&desired).unwrap_err();
        assert!(matches!(err, CoreError::DeletionReversal { ref id } if id == "4"));

        // The other direction is the normal propagation path
        assert!(desired.check_deletion_monotonic(&local).is_ok());
    }

    #[test]
    fn test_same_shape_ignores_deleted_flag() {
        let a = ManagedWorkload::dummy(1);
        let mut b = a.clone();
        b.mark_deleted();
        assert!(a.spec.same_shape(&b.spec));

        b.spec.capacity.max_partitions = 10;
        assert!(!a.spec.same_shape(&b.spec));
    }

    #[test]
    fn test_unknown_spec_fields_survive_round_trip() {
        let json = r#"{
            "id": "9",
            "name": "workload-9",
            "spec": {
                "capacity": {
                    "ingressPerSec": "1Mi",
                    "egressPerSec": "1Mi",
                    "totalMaxConnections": 10,
                    "maxDataRetentionSize": "1Gi",
                    "maxPartitions": 5
                },
                "versions": { "software": "3.1.0", "operator": "0.27.0" },
                "endpoint": { "host": "w9.example.com" }
            }
        }"#;
        let workload: ManagedWorkload = serde_json::from_str(json).unwrap();
        assert!(!workload.is_deleted());
        assert!(workload.spec.extra.contains_key("endpoint"));

        let back = serde_json::to_value(&workload).unwrap();
        assert_eq!(back["spec"]["endpoint"]["host"], "w9.example.com");
        assert_eq!(back["spec"]["deleted"], false);
    }

    #[test]
    fn test_capacity_totals_saturate() {
        let totals = CapacityTotals::new(3, 5);
        assert_eq!(totals.remaining_workloads, 0);
        assert_eq!(CapacityTotals::new(3, 1).remaining_workloads, 2);
    }

    #[test]
    fn test_component_readiness() {
        let mut c = ComponentStatus {
            name: "workload-1-broker".to_string(),
            replicas: 3,
            ready_replicas: 2,
        };
        assert!(!c.is_ready());
        c.ready_replicas = 3;
        assert!(c.is_ready());
    }
}
