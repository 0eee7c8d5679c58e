//! # Southbound Messages
//!
//! Structured messages exchanged with a device. Byte encoding is the
//! [`crate::codec::WireCodec`]'s job; nothing in the pipeline looks at bytes.
//!
//! ## Message Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Southbound Messages                                │
//! │                                                                         │
//! │  CONTROLLER ───► DEVICE                                                │
//! │  ───────────────────────                                               │
//! │  FlowMod { command, flow }        ADD / MODIFY[_STRICT] / DELETE[_STRICT]│
//! │  GroupMod { command, group }      ADD / MODIFY / DELETE                │
//! │  BarrierRequest                                                        │
//! │                                                                         │
//! │  DEVICE ───► CONTROLLER  (same xid as the request)                     │
//! │  ───────────────────────                                               │
//! │  Ack                              request processed                    │
//! │  BarrierReply                     everything before it is processed    │
//! │  Error { err_type, code, text }   request rejected                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format (JSON stand-in)
//! ```json
//! { "xid": 7, "message": { "type": "BarrierRequest" } }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use ofsb_core::{Flow, Group, GroupId, Xid, OFPG_ANY, OFPP_ANY, OFP_NO_BUFFER};

/// `OFPET_FLOW_MOD_FAILED`.
pub const OFPET_FLOW_MOD_FAILED: u16 = 5;

/// `OFPET_GROUP_MOD_FAILED`.
pub const OFPET_GROUP_MOD_FAILED: u16 = 6;

/// `OFPGMFC_GROUP_EXISTS`.
pub const OFPGMFC_GROUP_EXISTS: u16 = 0;

/// `OFPGMFC_UNKNOWN_GROUP`.
pub const OFPGMFC_UNKNOWN_GROUP: u16 = 8;

// =============================================================================
// Flow-Mod
// =============================================================================

/// `OFPFC_*` flow-mod command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowModCommand {
    Add,
    Modify,
    ModifyStrict,
    Delete,
    DeleteStrict,
}

impl FlowModCommand {
    pub fn is_strict(&self) -> bool {
        matches!(self, FlowModCommand::ModifyStrict | FlowModCommand::DeleteStrict)
    }
}

impl fmt::Display for FlowModCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowModCommand::Add => write!(f, "add"),
            FlowModCommand::Modify => write!(f, "modify"),
            FlowModCommand::ModifyStrict => write!(f, "modify_strict"),
            FlowModCommand::Delete => write!(f, "delete"),
            FlowModCommand::DeleteStrict => write!(f, "delete_strict"),
        }
    }
}

/// Flow table modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub flow: Flow,
    pub buffer_id: u32,
    /// Delete filter; `OFPP_ANY` when unset.
    pub out_port: u32,
    /// Delete filter; `OFPG_ANY` when unset.
    pub out_group: u32,
}

impl FlowMod {
    fn build(command: FlowModCommand, flow: Flow) -> Self {
        FlowMod {
            command,
            buffer_id: OFP_NO_BUFFER,
            out_port: flow.out_port.unwrap_or(OFPP_ANY),
            out_group: flow.out_group.unwrap_or(OFPG_ANY),
            flow,
        }
    }

    pub fn add(flow: Flow) -> Self {
        Self::build(FlowModCommand::Add, flow)
    }

    /// MODIFY, or MODIFY_STRICT when the flow carries the strict flag.
    pub fn modify(flow: Flow) -> Self {
        let command = if flow.strict {
            FlowModCommand::ModifyStrict
        } else {
            FlowModCommand::Modify
        };
        Self::build(command, flow)
    }

    /// DELETE, or DELETE_STRICT when the flow carries the strict flag.
    pub fn delete(flow: Flow) -> Self {
        let command = if flow.strict {
            FlowModCommand::DeleteStrict
        } else {
            FlowModCommand::Delete
        };
        Self::build(command, flow)
    }
}

// =============================================================================
// Group-Mod
// =============================================================================

/// `OFPGC_*` group-mod command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupModCommand {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for GroupModCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupModCommand::Add => write!(f, "add"),
            GroupModCommand::Modify => write!(f, "modify"),
            GroupModCommand::Delete => write!(f, "delete"),
        }
    }
}

/// Group table modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMod {
    pub command: GroupModCommand,
    pub group: Group,
}

impl GroupMod {
    pub fn add(group: Group) -> Self {
        GroupMod {
            command: GroupModCommand::Add,
            group,
        }
    }

    pub fn modify(group: Group) -> Self {
        GroupMod {
            command: GroupModCommand::Modify,
            group,
        }
    }

    pub fn delete(group: Group) -> Self {
        GroupMod {
            command: GroupModCommand::Delete,
            group,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group.group_id
    }
}

// =============================================================================
// Error Message
// =============================================================================

/// `OFPT_ERROR` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    /// Free-form text some devices attach (vendor specific).
    #[serde(default)]
    pub text: String,
}

impl ErrorMsg {
    pub fn new(err_type: u16, code: u16, text: impl Into<String>) -> Self {
        ErrorMsg {
            err_type,
            code,
            text: text.into(),
        }
    }

    /// Structured "group already exists" (`OFPET_GROUP_MOD_FAILED` /
    /// `OFPGMFC_GROUP_EXISTS`).
    pub fn is_group_exists(&self) -> bool {
        self.err_type == OFPET_GROUP_MOD_FAILED && self.code == OFPGMFC_GROUP_EXISTS
    }
}

impl fmt::Display for ErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={} code={}", self.err_type, self.code)?;
        if !self.text.is_empty() {
            write!(f, " ({})", self.text)?;
        }
        Ok(())
    }
}

// =============================================================================
// Message Envelope
// =============================================================================

/// Every message the pipeline sends or receives.
///
/// Adjacently tagged: `{ "type": "FlowMod", "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OfMessage {
    // =========================================================================
    // Requests
    // =========================================================================
    FlowMod(FlowMod),
    GroupMod(GroupMod),
    BarrierRequest,

    // =========================================================================
    // Replies
    // =========================================================================
    Ack,
    BarrierReply,
    Error(ErrorMsg),
}

impl OfMessage {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            OfMessage::FlowMod(_) => "flow_mod",
            OfMessage::GroupMod(_) => "group_mod",
            OfMessage::BarrierRequest => "barrier_request",
            OfMessage::Ack => "ack",
            OfMessage::BarrierReply => "barrier_reply",
            OfMessage::Error(_) => "error",
        }
    }
}

/// A message paired with its transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub xid: Xid,
    pub message: OfMessage,
}

impl Envelope {
    pub fn new(xid: Xid, message: OfMessage) -> Self {
        Envelope { xid, message }
    }
}
