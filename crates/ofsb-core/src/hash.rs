//! # Flow Hash
//!
//! Content key under which the flow registry stores a flow's descriptor.
//!
//! ## What Goes In
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FlowHash inputs                                 │
//! │                                                                         │
//! │   ✅ priority            ❌ table_id (lives in the descriptor)          │
//! │   ✅ cookie              ❌ flow id, timeouts, instructions             │
//! │   ✅ match               ❌ strict / barrier / out_port / out_group     │
//! │   ⚙  flags  (only when FlowHashPolicy::include_flags)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A flow built from configuration and the same flow rebuilt from a device
//! notification produce equal hashes.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::flow::{Flow, FlowModFlags, Match};

/// Which optional fields participate in [`FlowHash`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowHashPolicy {
    /// Treat flows differing only in flow-mod flags as distinct.
    #[serde(default)]
    pub include_flags: bool,
}

/// Deterministic identity of a flow's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowHash {
    priority: u16,
    cookie: u64,
    match_fields: Match,
    flags: Option<FlowModFlags>,
}

impl FlowHash {
    pub fn new(flow: &Flow, policy: FlowHashPolicy) -> Self {
        FlowHash {
            priority: flow.priority,
            cookie: flow.cookie,
            match_fields: flow.match_fields.clone(),
            flags: policy.include_flags.then_some(flow.flags),
        }
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Stable 64-bit digest, used in log lines.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for FlowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Action, Instruction};
    use crate::types::TableId;

    fn configured() -> Flow {
        Flow::new(TableId::new(0), 200)
            .with_id("from-config")
            .with_cookie(0x10)
            .with_match(Match::default().with_in_port(4).with_eth_type(0x0800))
            .with_timeouts(60, 0)
            .with_instructions(vec![Instruction::ApplyActions {
                actions: vec![Action::output(1)],
            }])
    }

    #[test]
    fn test_independently_built_flows_hash_equal() {
        // As reconstructed from a flow-removed notification: different table,
        // no id, no instructions, different timeouts.
        let observed = Flow::new(TableId::new(3), 200)
            .with_cookie(0x10)
            .with_match(Match::default().with_eth_type(0x0800).with_in_port(4));

        let policy = FlowHashPolicy::default();
        let a = FlowHash::new(&configured(), policy);
        let b = FlowHash::new(&observed, policy);

        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_identity_fields_change_hash() {
        let policy = FlowHashPolicy::default();
        let base = FlowHash::new(&configured(), policy);

        let mut other = configured();
        other.priority = 201;
        assert_ne!(base, FlowHash::new(&other, policy));

        let other = configured().with_cookie(0x11);
        assert_ne!(base, FlowHash::new(&other, policy));

        let other = configured().with_match(Match::default().with_in_port(5));
        assert_ne!(base, FlowHash::new(&other, policy));
    }

    #[test]
    fn test_flags_policy() {
        let plain = configured();
        let mut flagged = configured();
        flagged.flags.send_flow_rem = true;

        let default_policy = FlowHashPolicy::default();
        assert_eq!(
            FlowHash::new(&plain, default_policy),
            FlowHash::new(&flagged, default_policy)
        );

        let strict_policy = FlowHashPolicy { include_flags: true };
        assert_ne!(
            FlowHash::new(&plain, strict_policy),
            FlowHash::new(&flagged, strict_policy)
        );
    }
}
