//! # Error Types
//!
//! Domain errors raised by pure checks, before any device is contacted.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ofsb-core errors (this file)                                          │
//! │  └── CoreError        - Preconditions on flows and groups              │
//! │                                                                         │
//! │  ofsb-pipeline errors (separate crate)                                 │
//! │  └── PipelineError    - Device, transaction, storage failures          │
//! │                                                                         │
//! │  Flow: CoreError → PipelineError → caller's asynchronous result        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::TableId;

// =============================================================================
// Core Error
// =============================================================================

/// Precondition failures detected on the model itself.
///
/// Every variant is raised before a message is built, so nothing reaches the
/// wire or the transaction registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The table id in the flow's path differs from the one in its payload.
    ///
    /// ## When This Occurs
    /// ```text
    /// path:    /nodes/openflow:1/table/2/flow/f1
    /// payload: Flow { table_id: 3, .. }
    ///      │
    ///      ▼
    /// InvalidTableId { path: 2, payload: 3 }  (operation aborted)
    /// ```
    #[error("Table id in path ({path}) does not match table id in payload ({payload})")]
    InvalidTableId { path: TableId, payload: TableId },

    /// A batch operation was submitted without any members.
    #[error("Batch for {operation} has no entries")]
    EmptyBatch { operation: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
