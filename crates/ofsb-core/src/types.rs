//! # Identifiers
//!
//! Newtypes for every identity the pipeline keys state by.
//!
//! ## Identity Scopes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Identifier Scopes                               │
//! │                                                                         │
//! │  DeviceId ─────┬──► Xid            (one connection, outstanding only)   │
//! │                ├──► GroupId        (device-wide)                        │
//! │                └──► TableId ──► FlowId   (one flow table)               │
//! │                                                                         │
//! │  FlowPath = DeviceId + TableId + FlowId  (where the flow lives in the   │
//! │             configuration store)                                       │
//! │  FlowDescriptor = TableId + FlowId       (identity on the device)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Device Identifier
// =============================================================================

/// Opaque identifier of a switch connection (e.g. `openflow:1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

// =============================================================================
// Transaction Identifier
// =============================================================================

/// OpenFlow transaction id pairing a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xid(u32);

impl Xid {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Xid(value)
    }

    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Group / Table / Flow Identifiers
// =============================================================================

/// Group id, unique per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u32);

impl GroupId {
    #[inline]
    pub const fn new(value: u32) -> Self {
        GroupId(value)
    }

    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flow table id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(u8);

impl TableId {
    #[inline]
    pub const fn new(value: u8) -> Self {
        TableId(value)
    }

    #[inline]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration-assigned flow id (the key of the flow in its table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        FlowId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        FlowId(s.to_string())
    }
}

impl From<String> for FlowId {
    fn from(s: String) -> Self {
        FlowId(s)
    }
}

// =============================================================================
// Flow Path
// =============================================================================

/// Location of a flow in the configuration store.
///
/// The table id here is the one encoded in the path; it must agree with the
/// table id in the flow payload (see [`crate::validation::validate_table_id`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowPath {
    pub device_id: DeviceId,
    pub table_id: TableId,
    pub flow_id: FlowId,
}

impl FlowPath {
    pub fn new(device_id: impl Into<DeviceId>, table_id: TableId, flow_id: impl Into<FlowId>) -> Self {
        FlowPath {
            device_id: device_id.into(),
            table_id,
            flow_id: flow_id.into(),
        }
    }
}

impl fmt::Display for FlowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/table/{}/flow/{}", self.device_id, self.table_id, self.flow_id)
    }
}

// =============================================================================
// Flow Descriptor
// =============================================================================

/// Durable identity of a flow once the device accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowDescriptor {
    pub table_id: TableId,
    pub flow_id: FlowId,
}

impl FlowDescriptor {
    pub fn new(table_id: TableId, flow_id: FlowId) -> Self {
        FlowDescriptor { table_id, flow_id }
    }
}
