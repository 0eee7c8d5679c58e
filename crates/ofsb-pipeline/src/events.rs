//! Configuration change notifications fed to [`crate::SouthboundPipeline::handle_event`].

use serde::{Deserialize, Serialize};

use ofsb_core::{DeviceId, Flow, FlowPath, Group};

/// One change in the configured state of a device.
///
/// Each event results in at most one submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    FlowAdded {
        path: FlowPath,
        flow: Flow,
    },
    FlowUpdated {
        path: FlowPath,
        original: Flow,
        updated: Flow,
    },
    FlowRemoved {
        path: FlowPath,
        flow: Flow,
    },
    GroupAdded {
        device: DeviceId,
        group: Group,
    },
    GroupUpdated {
        device: DeviceId,
        original: Group,
        updated: Group,
    },
    GroupRemoved {
        device: DeviceId,
        group: Group,
    },
}

impl ChangeEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            ChangeEvent::FlowAdded { path, .. }
            | ChangeEvent::FlowUpdated { path, .. }
            | ChangeEvent::FlowRemoved { path, .. } => &path.device_id,
            ChangeEvent::GroupAdded { device, .. }
            | ChangeEvent::GroupUpdated { device, .. }
            | ChangeEvent::GroupRemoved { device, .. } => device,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::FlowAdded { .. } => "flow_added",
            ChangeEvent::FlowUpdated { .. } => "flow_updated",
            ChangeEvent::FlowRemoved { .. } => "flow_removed",
            ChangeEvent::GroupAdded { .. } => "group_added",
            ChangeEvent::GroupUpdated { .. } => "group_updated",
            ChangeEvent::GroupRemoved { .. } => "group_removed",
        }
    }
}
