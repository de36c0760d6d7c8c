//! # Status Conditions
//!
//! Conditions describe where a workload stands. The set on a status holds at
//! most one condition per type, in insertion order.
//!
//! ## Termination Condition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Ready condition reasons                            │
//! │                                                                         │
//! │   Installing ──► Installed ──► ... ──► Deleted                         │
//! │   (False)        (True)                (False)                          │
//! │                                                                         │
//! │   A workload is FULLY DELETED iff                                      │
//! │       conditions contains { type: Ready, reason: Deleted }             │
//! │                                                                         │
//! │   The status value (True/False/Unknown) does not take part in the      │
//! │   check. Both the agent and the control plane use `is_fully_deleted`.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::WorkloadStatus;

// =============================================================================
// Condition Enums
// =============================================================================

/// Condition type. Only `Ready` drives agent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    /// Any type this agent does not interpret; kept so foreign conditions
    /// survive a round trip through the status cache.
    #[serde(other)]
    Other,
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Installing,
    Installed,
    Deleted,
    Error,
    Rejected,
    #[serde(other)]
    Other,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionReason::Installing => "Installing",
            ConditionReason::Installed => "Installed",
            ConditionReason::Deleted => "Deleted",
            ConditionReason::Error => "Error",
            ConditionReason::Rejected => "Rejected",
            ConditionReason::Other => "Other",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Condition
// =============================================================================

/// One entry of `status.conditions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a condition stamped with the current time.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Option<ConditionReason>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// `Ready=False/Installing`
    pub fn ready_installing() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            Some(ConditionReason::Installing),
        )
    }

    /// `Ready=True/Installed`
    pub fn ready_installed() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::True,
            Some(ConditionReason::Installed),
        )
    }

    /// `Ready=False/Deleted`, the termination marker.
    pub fn ready_deleted() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            Some(ConditionReason::Deleted),
        )
    }

    #[inline]
    pub fn is_ready_deleted(&self) -> bool {
        self.condition_type == ConditionType::Ready && self.reason == Some(ConditionReason::Deleted)
    }
}

// =============================================================================
// Condition Set Helpers
// =============================================================================

/// Finds the condition of the given type.
pub fn find_condition(conditions: &[Condition], ty: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == ty)
}

/// Inserts or replaces the condition with the same type.
///
/// An existing entry keeps its position. When the status value does not
/// change, the original `last_transition_time` is retained.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// True iff the status carries a `Ready` condition with reason `Deleted`.
pub fn is_fully_deleted(status: &WorkloadStatus) -> bool {
    status.conditions.iter().any(Condition::is_ready_deleted)
}
