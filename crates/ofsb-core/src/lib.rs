//! # ofsb-core: Pure OpenFlow Programming Model
//!
//! The data model the southbound pipeline moves around: flows, groups,
//! matches, instructions and the identities derived from them. Everything in
//! here is a pure value or a pure function.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Southbound Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Configuration store / change events (external)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ add / update / remove                  │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 ofsb-pipeline (async engine)                    │   │
//! │  │    job queues ──► resolver ──► channel ──► xid registry        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ofsb-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   flow    │  │   hash    │  │ validation│  │   │
//! │  │   │ DeviceId  │  │ Match     │  │ FlowHash  │  │ table ids │  │   │
//! │  │   │ Xid, ids  │  │ Actions   │  │ policy    │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO RUNTIME • NO DEVICE ACCESS                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifiers (`DeviceId`, `Xid`, `GroupId`, `TableId`, `FlowId`)
//! - [`flow`] - Flow, match, instruction and action model
//! - [`group`] - Group and bucket model
//! - [`hash`] - `FlowHash` derivation
//! - [`error`] - Domain error types
//! - [`validation`] - Preconditions checked before anything is sent
//!
//! ## Example Usage
//!
//! ```rust
//! use ofsb_core::flow::{Action, Flow, Instruction, Match};
//! use ofsb_core::types::{GroupId, TableId};
//!
//! let flow = Flow::new(TableId::new(0), 100)
//!     .with_match(Match::default().with_in_port(1))
//!     .with_instructions(vec![Instruction::ApplyActions {
//!         actions: vec![Action::Group { group_id: GroupId::new(7) }],
//!     }]);
//!
//! assert_eq!(flow.group_dependency(), Some(GroupId::new(7)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod flow;
pub mod group;
pub mod hash;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use flow::{
    can_modify_flow, Action, FieldValue, Flow, FlowModFlags, Instruction, Ipv4Prefix, Masked, Match,
};
pub use group::{Bucket, Group, GroupType};
pub use hash::{FlowHash, FlowHashPolicy};
pub use types::*;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Priority used when a flow does not carry one (OpenFlow `OFP_DEFAULT_PRIORITY`).
pub const DEFAULT_FLOW_PRIORITY: u16 = 0x8000;

/// Wildcard port for `out_port` filters (`OFPP_ANY`).
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Wildcard group for `out_group` filters (`OFPG_ANY`).
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Buffer id meaning "no buffered packet" (`OFP_NO_BUFFER`).
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
