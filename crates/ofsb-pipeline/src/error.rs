//! # Pipeline Error Types
//!
//! Every failure a submitted operation can complete with.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Pipeline Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Precondition   │  │   Dependency    │  │     Device              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidTableId │  │  Dependency-    │  │  DeviceRejected         │ │
//! │  │  InvalidRequest │  │   Unresolved    │  │  Timeout                │ │
//! │  │                 │  │  StorageError   │  │  ConnectionLost         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Batch        │  │   Transaction   │  │   Config / Codec        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Batch          │  │  Unknown-       │  │  InvalidConfig          │ │
//! │  │  BarrierFailed  │  │   Transaction   │  │  ConfigLoad/SaveFailed  │ │
//! │  │  Cancelled      │  │  XidInUse       │  │  Encode/DecodeFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Absorbed, never returned to a submitter:                              │
//! │  • "group already exists" on a dependency push (logged at debug)       │
//! │  • UnknownTransaction (logged by the connection)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use ofsb_core::{CoreError, DeviceId, GroupId, TableId, Xid};

use crate::batch::{BatchFailure, BatchStep};
use crate::protocol::ErrorMsg;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error type covering every way an operation can fail.
///
/// Errors are `Clone` because a single connection loss fails every
/// outstanding request with the same cause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    // =========================================================================
    // Precondition Errors
    // =========================================================================
    /// Path and payload disagree on the table id. Nothing was sent.
    #[error("Table id in path ({path}) does not match table id in payload ({payload})")]
    InvalidTableId { path: TableId, payload: TableId },

    /// Request rejected before it was queued.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Dependency Errors
    // =========================================================================
    /// A flow references a group the configuration store does not have.
    #[error("Group {group_id} is not configured for device {device}")]
    DependencyUnresolved { device: DeviceId, group_id: GroupId },

    /// Configuration store read or write failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// The device answered with an OpenFlow error message.
    #[error("Device rejected request: {0}")]
    DeviceRejected(ErrorMsg),

    /// No reply within the request deadline.
    #[error("No reply for transaction {xid} within deadline")]
    Timeout { xid: Xid },

    /// The device connection went away with the request outstanding.
    #[error("Connection to device {device} lost")]
    ConnectionLost { device: DeviceId },

    /// No channel is attached for the device.
    #[error("Device {device} is not connected")]
    NotConnected { device: DeviceId },

    /// The device answered with a message that does not fit the request.
    #[error("Unexpected reply for transaction {xid}: {kind}")]
    UnexpectedReply { xid: Xid, kind: String },

    // =========================================================================
    // Transaction Errors
    // =========================================================================
    /// A reply arrived for an xid with no pending request.
    #[error("No pending request for transaction {xid}")]
    UnknownTransaction { xid: Xid },

    /// An xid was registered while still outstanding.
    #[error("Transaction {xid} is already outstanding")]
    XidInUse { xid: Xid },

    /// The request was withdrawn before it reached the wire.
    #[error("Request was cancelled before dispatch")]
    Cancelled,

    // =========================================================================
    // Batch Errors
    // =========================================================================
    /// One or more members of a batch failed (or its barrier did).
    #[error("{} of {} batch steps failed", .failures.len(), .total)]
    Batch {
        total: usize,
        failures: Vec<BatchFailure>,
    },

    /// The barrier closing a batch failed.
    #[error("Barrier failed: {0}")]
    BarrierFailed(Box<PipelineError>),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A job panicked; later jobs on the device still run.
    #[error("Job for device {device} aborted: {reason}")]
    JobAborted { device: DeviceId, reason: String },

    /// Pipeline is shutting down.
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTableId { path, payload } => {
                PipelineError::InvalidTableId { path, payload }
            }
            other => PipelineError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for PipelineError {
    fn from(err: toml::ser::Error) -> Self {
        PipelineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl PipelineError {
    /// Returns true if resubmitting the same operation may succeed.
    ///
    /// The pipeline never retries on its own; this is for the submitter.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Timeout { .. }
            | PipelineError::ConnectionLost { .. }
            | PipelineError::NotConnected { .. }
            | PipelineError::StorageError(_)
            | PipelineError::ChannelError(_) => true,
            PipelineError::BarrierFailed(inner) => inner.is_retryable(),
            PipelineError::Batch { failures, .. } => {
                failures.iter().all(|f| f.error.is_retryable())
            }
            _ => false,
        }
    }

    /// Returns true if the device itself answered with an error.
    pub fn is_device_rejection(&self) -> bool {
        match self {
            PipelineError::DeviceRejected(_) => true,
            PipelineError::BarrierFailed(inner) => inner.is_device_rejection(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfig(_)
                | PipelineError::ConfigLoadFailed(_)
                | PipelineError::ConfigSaveFailed(_)
        )
    }

    /// Individual failures of a batch; empty for any other error.
    pub fn batch_failures(&self) -> &[BatchFailure] {
        match self {
            PipelineError::Batch { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Batch member indices that failed.
    pub fn failed_members(&self) -> Vec<usize> {
        self.batch_failures()
            .iter()
            .filter_map(|f| match f.step {
                BatchStep::Member(index) => Some(index),
                BatchStep::Barrier => None,
            })
            .collect()
    }
}
