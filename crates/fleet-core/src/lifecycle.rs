//! # Deletion Lifecycle
//!
//! Per-workload state machine that drives a workload marked `deleted` to
//! full removal on both sides.
//!
//! ## State Diagram
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌────────┐ desired.deleted ┌─────────────────┐ teardown  ┌─────────┐ │
//! │   │ Active │────────────────►│ DeleteRequested │──────────►│ Tearing │ │
//! │   └────────┘                 └─────────────────┘  invoked  │  Down   │ │
//! │                                                            └────┬────┘ │
//! │                                    teardown re-invoked ┌────────┤      │
//! │                                    every pass          └───────►│      │
//! │                                                                 │      │
//! │                                       status Ready/Deleted      ▼      │
//! │   ┌─────────┐  pushed + absent from  ┌──────────────┐                  │
//! │   │ Removed │◄───────────────────────│ ReadyDeleted │◄─────────────────┘
//! │   └─────────┘  next desired snapshot └──────────────┘                  │
//! │                                                                         │
//! │   No edge ever leads back to Active: spec.deleted never reverses.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::WorkloadStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    DeleteRequested,
    TearingDown,
    ReadyDeleted,
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Active => "active",
            LifecycleState::DeleteRequested => "delete_requested",
            LifecycleState::TearingDown => "tearing_down",
            LifecycleState::ReadyDeleted => "ready_deleted",
            LifecycleState::Removed => "removed",
        };
        f.write_str(s)
    }
}

impl LifecycleState {
    /// True once deletion has been requested.
    #[inline]
    pub fn is_deleting(self) -> bool {
        !matches!(self, LifecycleState::Active)
    }

    /// Teardown must be (re-)invoked in this state.
    #[inline]
    pub fn needs_teardown(self) -> bool {
        matches!(
            self,
            LifecycleState::DeleteRequested | LifecycleState::TearingDown
        )
    }

    /// Checks whether `next` is a legal successor.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Active, DeleteRequested)
                | (DeleteRequested, TearingDown)
                | (TearingDown, TearingDown)
                | (TearingDown, ReadyDeleted)
                | (ReadyDeleted, Removed)
        )
    }

    /// Moves to `next`, or fails with [`CoreError::InvalidTransition`].
    pub fn transition(self, id: &str, next: LifecycleState) -> CoreResult<LifecycleState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                id: id.to_string(),
                from: self,
                to: next,
            })
        }
    }

    // =========================================================================
    // Event-driven steps
    // =========================================================================
    // Each step returns the state after the event. Events that do not apply
    // to the current state leave it unchanged.

    /// The desired copy shows `deleted = true`.
    pub fn on_deletion_requested(self) -> LifecycleState {
        match self {
            LifecycleState::Active => LifecycleState::DeleteRequested,
            other => other,
        }
    }

    /// Teardown was invoked on the local reconciler.
    pub fn on_teardown_invoked(self) -> LifecycleState {
        match self {
            LifecycleState::DeleteRequested | LifecycleState::TearingDown => {
                LifecycleState::TearingDown
            }
            other => other,
        }
    }

    /// The latest observed status arrived.
    pub fn on_status_observed(self, status: Option<&WorkloadStatus>) -> LifecycleState {
        match (self, status) {
            (LifecycleState::TearingDown, Some(s)) if s.is_fully_deleted() => {
                LifecycleState::ReadyDeleted
            }
            (other, _) => other,
        }
    }

    /// The id is missing from a desired snapshot. Removal requires that a
    /// `Ready/Deleted` status was already pushed.
    pub fn on_absent_from_desired(self, deletion_reported: bool) -> LifecycleState {
        match self {
            LifecycleState::ReadyDeleted if deletion_reported => LifecycleState::Removed,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    #[test]
    fn test_full_lifecycle() {
        let deleted = WorkloadStatus::deleted();

        let s = LifecycleState::Active;
        let s = s.on_deletion_requested();
        assert_eq!(s, LifecycleState::DeleteRequested);
        let s = s.on_teardown_invoked();
        assert_eq!(s, LifecycleState::TearingDown);
        let s = s.on_status_observed(None);
        assert_eq!(s, LifecycleState::TearingDown);
        let s = s.on_status_observed(Some(&deleted));
        assert_eq!(s, LifecycleState::ReadyDeleted);
        assert_eq!(s.on_absent_from_desired(false), LifecycleState::ReadyDeleted);
        assert_eq!(s.on_absent_from_desired(true), LifecycleState::Removed);
    }

    #[test]
    fn test_status_before_teardown_is_ignored() {
        let deleted = WorkloadStatus::deleted();
        assert_eq!(
            LifecycleState::Active.on_status_observed(Some(&deleted)),
            LifecycleState::Active
        );
        assert_eq!(
            LifecycleState::DeleteRequested.on_status_observed(Some(&deleted)),
            LifecycleState::DeleteRequested
        );
    }

    #[test]
    fn test_installed_status_does_not_complete_teardown() {
        let mut status = WorkloadStatus::default();
        status.set_condition(Condition::ready_installed());
        assert_eq!(
            LifecycleState::TearingDown.on_status_observed(Some(&status)),
            LifecycleState::TearingDown
        );
    }

    #[test]
    fn test_no_edge_back_to_active() {
        use LifecycleState::*;
        for from in [Active, DeleteRequested, TearingDown, ReadyDeleted, Removed] {
            assert!(!from.can_transition_to(Active));
            assert!(from.transition("1", Active).is_err());
        }
        assert!(Removed.on_deletion_requested() == Removed);
    }

    #[test]
    fn test_teardown_repeats_while_tearing_down() {
        assert!(LifecycleState::TearingDown.needs_teardown());
        assert_eq!(
            LifecycleState::TearingDown.transition("1", LifecycleState::TearingDown).unwrap(),
            LifecycleState::TearingDown
        );
        assert!(!LifecycleState::ReadyDeleted.needs_teardown());
    }
}
