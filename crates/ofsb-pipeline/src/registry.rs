//! # Device State Registries
//!
//! What the controller believes is installed on each device.
//!
//! ## Registry Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Device State Registries                            │
//! │                                                                         │
//! │  DeviceGroupRegistry                                                   │
//! │  └── DeviceId ──► { GroupId, ... }        confirmed present             │
//! │                                                                         │
//! │  DeviceFlowRegistry                                                    │
//! │  └── DeviceId ──► FlowHash ──► FlowDescriptor { table_id, flow_id }    │
//! │                                                                         │
//! │  Both maps are keyed by device first. Entries for a device are only    │
//! │  written from inside that device's serialized jobs.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use ofsb_core::{DeviceId, Flow, FlowDescriptor, FlowHash, FlowHashPolicy, FlowId, GroupId, TableId};

// =============================================================================
// Group Registry
// =============================================================================

/// Group ids confirmed to exist, per device.
#[derive(Default)]
pub struct DeviceGroupRegistry {
    groups: RwLock<HashMap<DeviceId, HashSet<GroupId>>>,
}

impl DeviceGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, device: &DeviceId, group_id: GroupId) -> bool {
        self.groups
            .read()
            .await
            .get(device)
            .is_some_and(|set| set.contains(&group_id))
    }

    /// Records `group_id` as present. Returns false if it already was.
    pub async fn store(&self, device: &DeviceId, group_id: GroupId) -> bool {
        let inserted = self
            .groups
            .write()
            .await
            .entry(device.clone())
            .or_default()
            .insert(group_id);
        if inserted {
            trace!(device = %device, group_id = %group_id, "Group recorded present");
        }
        inserted
    }

    pub async fn remove(&self, device: &DeviceId, group_id: GroupId) -> bool {
        let mut groups = self.groups.write().await;
        let Some(set) = groups.get_mut(device) else {
            return false;
        };
        let removed = set.remove(&group_id);
        if set.is_empty() {
            groups.remove(device);
        }
        removed
    }

    /// Present groups of a device, ascending.
    pub async fn groups(&self, device: &DeviceId) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self
            .groups
            .read()
            .await
            .get(device)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub async fn clear_device(&self, device: &DeviceId) {
        if let Some(set) = self.groups.write().await.remove(device) {
            debug!(device = %device, groups = set.len(), "Group registry cleared");
        }
    }
}

// =============================================================================
// Flow Registry
// =============================================================================

/// Prefix of ids minted for flows that carry none.
pub const ALIEN_FLOW_ID_PREFIX: &str = "#UF$TABLE*";

/// Id for a flow seen without a configured id: `#UF$TABLE*<table>*<n>`.
pub fn alien_flow_id(table_id: TableId, n: u64) -> FlowId {
    FlowId::new(format!("{}{}*{}", ALIEN_FLOW_ID_PREFIX, table_id, n))
}

#[derive(Default)]
struct DeviceFlows {
    by_hash: HashMap<FlowHash, FlowDescriptor>,
    alien_counter: u64,
}

/// Flow descriptors keyed by content hash, per device.
pub struct DeviceFlowRegistry {
    policy: FlowHashPolicy,
    flows: RwLock<HashMap<DeviceId, DeviceFlows>>,
}

impl DeviceFlowRegistry {
    pub fn new(policy: FlowHashPolicy) -> Self {
        DeviceFlowRegistry {
            policy,
            flows: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> FlowHashPolicy {
        self.policy
    }

    pub fn hash(&self, flow: &Flow) -> FlowHash {
        FlowHash::new(flow, self.policy)
    }

    /// Stores (or replaces) the descriptor for `flow`.
    pub async fn store(&self, device: &DeviceId, flow: &Flow, descriptor: FlowDescriptor) {
        let hash = self.hash(flow);
        trace!(device = %device, hash = %hash, flow_id = %descriptor.flow_id, "Flow stored");
        self.flows
            .write()
            .await
            .entry(device.clone())
            .or_default()
            .by_hash
            .insert(hash, descriptor);
    }

    /// Returns the known descriptor for `flow`, storing one first if needed.
    ///
    /// A flow without a configured id gets a minted alien id.
    pub async fn store_if_necessary(&self, device: &DeviceId, flow: &Flow) -> FlowDescriptor {
        let hash = self.hash(flow);
        let mut flows = self.flows.write().await;
        let entry = flows.entry(device.clone()).or_default();

        if let Some(existing) = entry.by_hash.get(&hash) {
            return existing.clone();
        }

        let flow_id = match &flow.id {
            Some(id) => id.clone(),
            None => {
                let id = alien_flow_id(flow.table_id, entry.alien_counter);
                entry.alien_counter += 1;
                debug!(device = %device, flow_id = %id, "Minted id for unconfigured flow");
                id
            }
        };
        let descriptor = FlowDescriptor::new(flow.table_id, flow_id);
        entry.by_hash.insert(hash, descriptor.clone());
        descriptor
    }

    pub async fn retrieve(&self, device: &DeviceId, flow: &Flow) -> Option<FlowDescriptor> {
        let hash = self.hash(flow);
        self.flows
            .read()
            .await
            .get(device)
            .and_then(|entry| entry.by_hash.get(&hash).cloned())
    }

    pub async fn remove(&self, device: &DeviceId, flow: &Flow) -> Option<FlowDescriptor> {
        let hash = self.hash(flow);
        self.flows
            .write()
            .await
            .get_mut(device)
            .and_then(|entry| entry.by_hash.remove(&hash))
    }

    pub async fn len(&self, device: &DeviceId) -> usize {
        self.flows
            .read()
            .await
            .get(device)
            .map_or(0, |entry| entry.by_hash.len())
    }

    pub async fn clear_device(&self, device: &DeviceId) {
        if let Some(entry) = self.flows.write().await.remove(device) {
            debug!(device = %device, flows = entry.by_hash.len(), "Flow registry cleared");
        }
    }
}
