//! # Flow Model
//!
//! Flows, matches, instructions and actions as the pipeline sees them.
//!
//! ## Flow Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Flow                                       │
//! │                                                                         │
//! │  identity:   table_id, priority, cookie, match   (→ FlowHash)          │
//! │  lifetime:   idle_timeout, hard_timeout, flags                         │
//! │  behaviour:  instructions                                              │
//! │                 ├── GotoTable                                          │
//! │                 ├── WriteMetadata                                      │
//! │                 ├── WriteActions ──┐                                   │
//! │                 ├── ApplyActions ──┼──► Action (Output, Group, ...)     │
//! │                 ├── ClearActions   │                                   │
//! │                 └── Meter          │                                   │
//! │                                    │                                   │
//! │  A Group action inside ApplyActions is a dependency: the group must    │
//! │  exist on the device before the flow is sent.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::types::{FlowId, GroupId, TableId};

// =============================================================================
// Match
// =============================================================================

/// A value with an optional mask (absent mask means exact match).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Masked<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<T>,
}

impl<T> Masked<T> {
    pub fn exact(value: T) -> Self {
        Masked { value, mask: None }
    }

    pub fn with_mask(value: T, mask: T) -> Self {
        Masked {
            value,
            mask: Some(mask),
        }
    }
}

/// IPv4 prefix (`10.0.0.0/8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Ipv4Prefix { addr, prefix_len }
    }

    pub fn host(addr: Ipv4Addr) -> Self {
        Ipv4Prefix {
            addr,
            prefix_len: 32,
        }
    }
}

/// Match fields. `None` means wildcarded.
///
/// Two matches built independently from the same field values compare and
/// hash identically; the field set is fixed, so there is no ordering to get
/// wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Match {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Masked<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<Masked<[u8; 6]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<Masked<[u8; 6]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_pcp: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_dscp: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Prefix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Prefix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_src: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_src: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_dst: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<u64>,
}

impl Match {
    /// Match-all (every field wildcarded).
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_in_port(mut self, port: u32) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn with_metadata(mut self, metadata: Masked<u64>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_eth_src(mut self, mac: [u8; 6]) -> Self {
        self.eth_src = Some(Masked::exact(mac));
        self
    }

    pub fn with_eth_dst(mut self, mac: [u8; 6]) -> Self {
        self.eth_dst = Some(Masked::exact(mac));
        self
    }

    pub fn with_eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    pub fn with_vlan_vid(mut self, vid: u16) -> Self {
        self.vlan_vid = Some(vid);
        self
    }

    pub fn with_ip_proto(mut self, proto: u8) -> Self {
        self.ip_proto = Some(proto);
        self
    }

    pub fn with_ipv4_src(mut self, prefix: Ipv4Prefix) -> Self {
        self.ipv4_src = Some(prefix);
        self
    }

    pub fn with_ipv4_dst(mut self, prefix: Ipv4Prefix) -> Self {
        self.ipv4_dst = Some(prefix);
        self
    }

    pub fn with_tcp_dst(mut self, port: u16) -> Self {
        self.tcp_dst = Some(port);
        self
    }

    pub fn with_udp_dst(mut self, port: u16) -> Self {
        self.udp_dst = Some(port);
        self
    }

    pub fn with_tunnel_id(mut self, tunnel_id: u64) -> Self {
        self.tunnel_id = Some(tunnel_id);
        self
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Header field rewritten by a `SetField` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Metadata(u64),
    EthSrc([u8; 6]),
    EthDst([u8; 6]),
    VlanVid(u16),
    VlanPcp(u8),
    IpDscp(u8),
    Ipv4Src(Ipv4Addr),
    Ipv4Dst(Ipv4Addr),
    TcpSrc(u16),
    TcpDst(u16),
    UdpSrc(u16),
    UdpDst(u16),
    TunnelId(u64),
}

/// Action applied to a packet (OpenFlow 1.3 action set).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Output { port: u32, max_len: u16 },
    Group { group_id: GroupId },
    SetField { field: FieldValue },
    PushVlan { ethertype: u16 },
    PopVlan,
    SetQueue { queue_id: u32 },
    DecNwTtl,
    SetNwTtl { ttl: u8 },
    CopyTtlIn,
    CopyTtlOut,
    Drop,
}

impl Action {
    /// Output to `port`; packets sent to the controller are not truncated.
    pub fn output(port: u32) -> Self {
        Action::Output {
            port,
            max_len: 0xffff,
        }
    }

    /// The group this action forwards to, if any.
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Action::Group { group_id } => Some(*group_id),
            Action::Output { .. }
            | Action::SetField { .. }
            | Action::PushVlan { .. }
            | Action::PopVlan
            | Action::SetQueue { .. }
            | Action::DecNwTtl
            | Action::SetNwTtl { .. }
            | Action::CopyTtlIn
            | Action::CopyTtlOut
            | Action::Drop => None,
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Flow instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    GotoTable { table_id: TableId },
    WriteMetadata { metadata: u64, mask: u64 },
    WriteActions { actions: Vec<Action> },
    ApplyActions { actions: Vec<Action> },
    ClearActions,
    Meter { meter_id: u32 },
}

impl Instruction {
    /// Actions executed immediately, or `None` for anything but `ApplyActions`.
    pub fn applied_actions(&self) -> Option<&[Action]> {
        match self {
            Instruction::ApplyActions { actions } => Some(actions),
            Instruction::GotoTable { .. }
            | Instruction::WriteMetadata { .. }
            | Instruction::WriteActions { .. }
            | Instruction::ClearActions
            | Instruction::Meter { .. } => None,
        }
    }
}

// =============================================================================
// Flow-Mod Flags
// =============================================================================

/// `OFPFF_*` flags carried by a flow-mod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowModFlags {
    pub send_flow_rem: bool,
    pub check_overlap: bool,
    pub reset_counts: bool,
    pub no_pkt_counts: bool,
    pub no_byt_counts: bool,
}

impl FlowModFlags {
    /// Wire bitmap (OpenFlow 1.3 bit positions).
    pub fn bits(&self) -> u16 {
        let mut bits = 0u16;
        if self.send_flow_rem {
            bits |= 1 << 0;
        }
        if self.check_overlap {
            bits |= 1 << 1;
        }
        if self.reset_counts {
            bits |= 1 << 2;
        }
        if self.no_pkt_counts {
            bits |= 1 << 3;
        }
        if self.no_byt_counts {
            bits |= 1 << 4;
        }
        bits
    }

    pub fn from_bits(bits: u16) -> Self {
        FlowModFlags {
            send_flow_rem: bits & (1 << 0) != 0,
            check_overlap: bits & (1 << 1) != 0,
            reset_counts: bits & (1 << 2) != 0,
            no_pkt_counts: bits & (1 << 3) != 0,
            no_byt_counts: bits & (1 << 4) != 0,
        }
    }
}

// =============================================================================
// Flow
// =============================================================================

/// A flow entry as configured for one table of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Configuration id; absent for flows observed on the device only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FlowId>,
    pub table_id: TableId,
    #[serde(default = "default_priority")]
    pub priority: u16,
    #[serde(default)]
    pub cookie: u64,
    #[serde(default)]
    pub cookie_mask: u64,
    #[serde(default)]
    pub idle_timeout: u16,
    #[serde(default)]
    pub hard_timeout: u16,
    #[serde(default)]
    pub flags: FlowModFlags,
    #[serde(rename = "match", default)]
    pub match_fields: Match,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// Restrict modify/delete to the exact match + priority entry.
    #[serde(default)]
    pub strict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_group: Option<u32>,
    /// Request a barrier after this flow-mod.
    #[serde(default)]
    pub barrier: bool,
}

fn default_priority() -> u16 {
    crate::DEFAULT_FLOW_PRIORITY
}

impl Flow {
    pub fn new(table_id: TableId, priority: u16) -> Self {
        Flow {
            id: None,
            table_id,
            priority,
            cookie: 0,
            cookie_mask: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            flags: FlowModFlags::default(),
            match_fields: Match::default(),
            instructions: Vec::new(),
            strict: false,
            out_port: None,
            out_group: None,
            barrier: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<FlowId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_match(mut self, match_fields: Match) -> Self {
        self.match_fields = match_fields;
        self
    }

    pub fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_timeouts(mut self, idle_timeout: u16, hard_timeout: u16) -> Self {
        self.idle_timeout = idle_timeout;
        self.hard_timeout = hard_timeout;
        self
    }

    pub fn with_flags(mut self, flags: FlowModFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_barrier(mut self, barrier: bool) -> Self {
        self.barrier = barrier;
        self
    }

    /// Copy of this flow with the strict-match flag set.
    pub fn to_strict(&self) -> Flow {
        Flow {
            strict: true,
            ..self.clone()
        }
    }

    /// First group referenced by an apply-actions instruction.
    ///
    /// Groups reached through write-actions are not dependencies: the action
    /// set only executes at the end of the pipeline, and the device resolves
    /// those lazily.
    pub fn group_dependency(&self) -> Option<GroupId> {
        self.instructions
            .iter()
            .filter_map(Instruction::applied_actions)
            .flatten()
            .find_map(Action::group_id)
    }
}

// =============================================================================
// Modify Rules
// =============================================================================

/// Whether `updated` can be applied to the device as an in-place modify.
///
/// A flow-mod MODIFY cannot change the entry's identity (match, priority,
/// table) nor its timeouts, flags or cookie; any such change needs a
/// delete of `original` followed by an add of `updated`.
pub fn can_modify_flow(original: &Flow, updated: &Flow) -> bool {
    original.table_id == updated.table_id
        && original.priority == updated.priority
        && original.match_fields == updated.match_fields
        && original.idle_timeout == updated.idle_timeout
        && original.hard_timeout == updated.hard_timeout
        && original.flags == updated.flags
        && original.cookie == updated.cookie
}
