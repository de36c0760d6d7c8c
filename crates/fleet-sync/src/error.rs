//! # Sync Error Types
//!
//! Error types for synchronization operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Reconciler          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Reconciler {id, msg}   │ │
//! │  │  MissingCluster │  │  Timeout        │  │                         │ │
//! │  │  InvalidUrl     │  │  Registration   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │ State Conflict  │  │  Serialization  │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StateConflict  │  │  Serialization  │  │  Internal, ShuttingDown │ │
//! │  │                 │  │  Failed         │  │  ChannelError           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Handling Policy
//! | Category       | Scope of the skip          | Log level |
//! |----------------|----------------------------|-----------|
//! | Transport      | current phase of the pass  | `warn!`   |
//! | Reconciler     | one workload, one pass     | `error!`  |
//! | StateConflict  | nothing, the call is no-op | `debug!`  |
//!
//! Nothing here is fatal to the process.

use fleet_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all failures of the agent.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cluster id missing (required to talk to the control plane).
    #[error("Cluster ID not configured. Set [cluster].id or FLEET_CLUSTER_ID.")]
    MissingClusterId,

    /// Invalid control-plane URL.
    #[error("Invalid control plane URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// A control-plane call failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A control-plane call did not complete in time.
    #[error("Control plane call timed out after {0} seconds")]
    Timeout(u64),

    /// The agent status pulled back differs from the one pushed.
    #[error("Registration of cluster {cluster_id} not confirmed by the control plane")]
    RegistrationUnconfirmed { cluster_id: String },

    // =========================================================================
    // Reconciler Errors
    // =========================================================================
    /// The local reconciler failed for one workload.
    #[error("Reconciler failed for workload {id}: {message}")]
    Reconciler { id: String, message: String },

    // =========================================================================
    // State Conflicts
    // =========================================================================
    /// Request conflicts with current state; treated as a no-op.
    #[error("State conflict: {0}")]
    StateConflict(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Fleet agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::InvalidConfig(v.to_string()),
            other => SyncError::StateConflict(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried on a later tick.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Unconfirmed registration
    /// - Per-workload reconciler failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::RegistrationUnconfirmed { .. }
                | SyncError::Reconciler { .. }
        )
    }

    /// Returns true for failures talking to the control plane.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::RegistrationUnconfirmed { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingClusterId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true for no-op conflicts.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, SyncError::StateConflict(_))
    }

    /// Shorthand for a reconciler failure.
    pub fn reconciler(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Reconciler {
            id: id.into(),
            message: message.to_string(),
        }
    }
}
