//! # Validation
//!
//! Checks run before a job builds any message.
//!
//! ## Where Validation Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Pre-send checks                                    │
//! │                                                                         │
//! │  submit_add / submit_update / submit_remove                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  THIS MODULE: path table id == payload table id                        │
//! │           │        (mismatch → InvalidTableId, nothing enqueued)        │
//! │           ▼                                                             │
//! │  job serializer → resolver → channel → transaction registry            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ofsb_core::flow::Flow;
//! use ofsb_core::types::{FlowPath, TableId};
//! use ofsb_core::validation::validate_table_id;
//!
//! let path = FlowPath::new("openflow:1", TableId::new(2), "f1");
//! assert!(validate_table_id(&path, &Flow::new(TableId::new(2), 10)).is_ok());
//! assert!(validate_table_id(&path, &Flow::new(TableId::new(3), 10)).is_err());
//! ```

use crate::error::{CoreError, CoreResult};
use crate::flow::Flow;
use crate::types::FlowPath;

/// Validates that the table id in the flow's path matches its payload.
pub fn validate_table_id(path: &FlowPath, flow: &Flow) -> CoreResult<()> {
    if path.table_id != flow.table_id {
        return Err(CoreError::InvalidTableId {
            path: path.table_id,
            payload: flow.table_id,
        });
    }
    Ok(())
}

/// Validates that a batch operation carries at least one entry.
pub fn validate_non_empty<T>(operation: &str, entries: &[T]) -> CoreResult<()> {
    if entries.is_empty() {
        return Err(CoreError::EmptyBatch {
            operation: operation.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableId;

    #[test]
    fn test_table_id_mismatch() {
        let path = FlowPath::new("openflow:1", TableId::new(2), "f1");
        let err = validate_table_id(&path, &Flow::new(TableId::new(3), 10)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTableId {
                path: TableId::new(2),
                payload: TableId::new(3),
            }
        );
    }

    #[test]
    fn test_non_empty() {
        assert!(validate_non_empty("remove-groups", &[1]).is_ok());
        assert!(validate_non_empty::<u32>("remove-groups", &[]).is_err());
    }
}
