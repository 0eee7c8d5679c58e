//! # Configuration Store Boundary
//!
//! The pipeline reads configured groups from, and writes stale-flow markers
//! to, an external configuration store. [`InMemoryConfigStore`] is the
//! in-process implementation used by tests and embedders without a store.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use ofsb_core::{DeviceId, Flow, FlowId, FlowPath, Group, GroupId, TableId};

use crate::error::{PipelineError, PipelineResult};

// =============================================================================
// Stale Flow Marker
// =============================================================================

/// Record that a configured flow is about to be removed from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleFlowMarker {
    pub device_id: DeviceId,
    pub table_id: TableId,
    pub flow_id: FlowId,
    pub flow: Flow,
    pub recorded_at: DateTime<Utc>,
}

impl StaleFlowMarker {
    pub fn new(path: &FlowPath, flow: &Flow) -> Self {
        StaleFlowMarker {
            device_id: path.device_id.clone(),
            table_id: path.table_id,
            flow_id: path.flow_id.clone(),
            flow: flow.clone(),
            recorded_at: Utc::now(),
        }
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Access to the configured state of devices.
pub trait ConfigStore: Send + Sync {
    /// Reads a configured group. `Ok(None)` means it is not configured.
    fn read_group<'a>(
        &'a self,
        device: &'a DeviceId,
        group_id: GroupId,
    ) -> BoxFuture<'a, PipelineResult<Option<Group>>>;

    /// Persists a stale-flow marker.
    fn put_stale_flow(&self, marker: StaleFlowMarker) -> BoxFuture<'_, PipelineResult<()>>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Map-backed [`ConfigStore`] with switchable failure injection.
#[derive(Default)]
pub struct InMemoryConfigStore {
    groups: RwLock<HashMap<DeviceId, HashMap<GroupId, Group>>>,
    stale: RwLock<Vec<StaleFlowMarker>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_group(&self, device: &DeviceId, group: Group) {
        self.groups
            .write()
            .await
            .entry(device.clone())
            .or_default()
            .insert(group.group_id, group);
    }

    pub async fn remove_group(&self, device: &DeviceId, group_id: GroupId) -> Option<Group> {
        self.groups
            .write()
            .await
            .get_mut(device)
            .and_then(|groups| groups.remove(&group_id))
    }

    pub async fn stale_markers(&self) -> Vec<StaleFlowMarker> {
        self.stale.read().await.clone()
    }

    /// Makes every subsequent read fail with a storage error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn read_group<'a>(
        &'a self,
        device: &'a DeviceId,
        group_id: GroupId,
    ) -> BoxFuture<'a, PipelineResult<Option<Group>>> {
        Box::pin(async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PipelineError::StorageError(format!(
                    "Read of group {} on {} failed",
                    group_id, device
                )));
            }
            Ok(self
                .groups
                .read()
                .await
                .get(device)
                .and_then(|groups| groups.get(&group_id).cloned()))
        })
    }

    fn put_stale_flow(&self, marker: StaleFlowMarker) -> BoxFuture<'_, PipelineResult<()>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PipelineError::StorageError(format!(
                    "Write of stale marker for {} failed",
                    marker.flow_id
                )));
            }
            debug!(device = %marker.device_id, flow_id = %marker.flow_id, "Stale marker stored");
            self.stale.write().await.push(marker);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofsb_core::GroupType;

    #[tokio::test]
    async fn test_read_group_per_device() {
        let store = InMemoryConfigStore::new();
        let device = DeviceId::new("openflow:1");
        store
            .put_group(&device, Group::new(GroupId::new(7), GroupType::All))
            .await;

        let found = store.read_group(&device, GroupId::new(7)).await.unwrap();
        assert_eq!(found.map(|g| g.group_id), Some(GroupId::new(7)));

        let other = DeviceId::new("openflow:2");
        assert_eq!(store.read_group(&other, GroupId::new(7)).await, Ok(None));

        store.remove_group(&device, GroupId::new(7)).await;
        assert_eq!(store.read_group(&device, GroupId::new(7)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryConfigStore::new();
        let device = DeviceId::new("openflow:1");

        store.fail_reads(true);
        assert!(matches!(
            store.read_group(&device, GroupId::new(1)).await,
            Err(PipelineError::StorageError(_))
        ));

        store.fail_writes(true);
        let path = FlowPath::new("openflow:1", TableId::new(0), "f1");
        let marker = StaleFlowMarker::new(&path, &Flow::new(TableId::new(0), 1));
        assert!(store.put_stale_flow(marker).await.is_err());
        assert!(store.stale_markers().await.is_empty());
    }

    #[test]
    fn test_marker_serializes_with_timestamp() {
        let path = FlowPath::new("openflow:1", TableId::new(2), "f9");
        let marker = StaleFlowMarker::new(&path, &Flow::new(TableId::new(2), 5));
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["flow_id"], "f9");
        assert!(json["recorded_at"].is_string());
    }
}
