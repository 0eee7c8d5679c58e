//! # Group Model

use serde::{Deserialize, Serialize};

use crate::flow::Action;
use crate::types::GroupId;

/// `OFPGT_*` group type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    #[default]
    All,
    Select,
    Indirect,
    FastFailover,
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupType::All => write!(f, "all"),
            GroupType::Select => write!(f, "select"),
            GroupType::Indirect => write!(f, "indirect"),
            GroupType::FastFailover => write!(f, "fast_failover"),
        }
    }
}

/// One action bucket of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// Relative weight, only meaningful for `select` groups.
    #[serde(default)]
    pub weight: u16,
    /// Liveness port, only meaningful for `fast_failover` groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_group: Option<u32>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Bucket {
    pub fn new(actions: Vec<Action>) -> Self {
        Bucket {
            actions,
            ..Default::default()
        }
    }
}

/// A group entry as configured for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    #[serde(default)]
    pub group_type: GroupType,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    /// Request a barrier after this group-mod.
    #[serde(default)]
    pub barrier: bool,
}

impl Group {
    pub fn new(group_id: GroupId, group_type: GroupType) -> Self {
        Group {
            group_id,
            group_type,
            buckets: Vec::new(),
            barrier: false,
        }
    }

    pub fn with_buckets(mut self, buckets: Vec<Bucket>) -> Self {
        self.buckets = buckets;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_serde() {
        let group = Group::new(GroupId::new(10), GroupType::FastFailover)
            .with_buckets(vec![Bucket::new(vec![Action::output(3)])]);

        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["group_type"], "fast_failover");
        assert_eq!(json["buckets"][0]["actions"][0]["type"], "output");

        let back: Group = serde_json::from_value(json).unwrap();
        assert_eq!(back, group);
    }
}
