//! # Dependency Resolver
//!
//! Makes sure the group a flow forwards to exists on the device before the
//! flow is sent.
//!
//! ## Resolution Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Group Dependency Resolution                        │
//! │                                                                         │
//! │  flow ──► group action in apply-actions? ── no ──► NoDependency         │
//! │                     │ yes                                               │
//! │                     ▼                                                   │
//! │           known present on device? ──── yes ──► Present                 │
//! │                     │ no                                                │
//! │                     ▼                                                   │
//! │           read from config store                                        │
//! │            ├── Err ──────────────────────────► StorageError             │
//! │            ├── None ─────────────────────────► DependencyUnresolved     │
//! │            └── Some(group) ──► push GROUP_MOD ADD                       │
//! │                                 ├── ack ─────────► Pushed               │
//! │                                 ├── "exists" ────► AlreadyPresent       │
//! │                                 └── other error ─► that error           │
//! │                                                                         │
//! │  Pushed and AlreadyPresent both record the group as present.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, warn};

use ofsb_core::{DeviceId, Flow, Group, GroupId};

use crate::channel::OutboundChannel;
use crate::config::DeviceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::protocol::{ErrorMsg, GroupMod, OfMessage};
use crate::registry::DeviceGroupRegistry;
use crate::store::ConfigStore;

/// How a flow's group dependency was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The flow references no group.
    NoDependency,
    /// The group was already known to be on the device.
    Present(GroupId),
    /// The group was pushed and acknowledged.
    Pushed(GroupId),
    /// The device reported the group as already existing.
    AlreadyPresent(GroupId),
}

impl ResolveOutcome {
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            ResolveOutcome::NoDependency => None,
            ResolveOutcome::Present(id)
            | ResolveOutcome::Pushed(id)
            | ResolveOutcome::AlreadyPresent(id) => Some(*id),
        }
    }
}

// =============================================================================
// Group Exists Detection
// =============================================================================

/// Decides whether a group-mod rejection means "group already exists".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupExistsRule {
    signal: String,
    text_fallback: bool,
}

impl GroupExistsRule {
    pub fn new(signal: impl Into<String>, text_fallback: bool) -> Self {
        GroupExistsRule {
            signal: signal.into(),
            text_fallback,
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(settings.group_exists_signal.clone(), settings.group_exists_text_fallback)
    }

    pub fn matches(&self, err: &ErrorMsg) -> bool {
        if err.is_group_exists() {
            return true;
        }
        self.text_fallback && !self.signal.is_empty() && err.text.contains(&self.signal)
    }
}

impl Default for GroupExistsRule {
    fn default() -> Self {
        Self::from_settings(&DeviceSettings::default())
    }
}

// =============================================================================
// Resolver
// =============================================================================

pub struct DependencyResolver {
    groups: Arc<DeviceGroupRegistry>,
    store: Arc<dyn ConfigStore>,
    rule: GroupExistsRule,
}

impl DependencyResolver {
    pub fn new(
        groups: Arc<DeviceGroupRegistry>,
        store: Arc<dyn ConfigStore>,
        rule: GroupExistsRule,
    ) -> Self {
        DependencyResolver { groups, store, rule }
    }

    pub fn groups(&self) -> &Arc<DeviceGroupRegistry> {
        &self.groups
    }

    pub fn rule(&self) -> &GroupExistsRule {
        &self.rule
    }

    /// Ensures the group `flow` depends on is present on the channel's device.
    ///
    /// On error the flow must not be sent.
    pub async fn ensure_group(
        &self,
        channel: &dyn OutboundChannel,
        flow: &Flow,
    ) -> PipelineResult<ResolveOutcome> {
        let Some(group_id) = flow.group_dependency() else {
            return Ok(ResolveOutcome::NoDependency);
        };
        let device = channel.device_id();

        if self.groups.contains(device, group_id).await {
            return Ok(ResolveOutcome::Present(group_id));
        }

        let group = match self.store.read_group(device, group_id).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                warn!(device = %device, group_id = %group_id, "Flow depends on unconfigured group");
                return Err(PipelineError::DependencyUnresolved {
                    device: device.clone(),
                    group_id,
                });
            }
            Err(e @ PipelineError::StorageError(_)) => return Err(e),
            Err(other) => return Err(PipelineError::StorageError(other.to_string())),
        };

        debug!(device = %device, group_id = %group_id, "Pushing group ahead of dependent flow");
        if self.push_group(channel, group).await? {
            Ok(ResolveOutcome::AlreadyPresent(group_id))
        } else {
            Ok(ResolveOutcome::Pushed(group_id))
        }
    }

    /// Sends GROUP_MOD ADD and records the group as present.
    ///
    /// Returns true when the device reported the group as already existing.
    pub async fn push_group(&self, channel: &dyn OutboundChannel, group: Group) -> PipelineResult<bool> {
        let device = channel.device_id();
        let group_id = group.group_id;
        let xid = channel.allocate_xid();

        let existed = match channel.send(xid, OfMessage::GroupMod(GroupMod::add(group))).await {
            Ok(_) => false,
            Err(PipelineError::DeviceRejected(err)) if self.rule.matches(&err) => {
                debug!(
                    device = %device,
                    group_id = %group_id,
                    error = %err,
                    "Group already exists on device"
                );
                true
            }
            Err(e) => {
                warn!(device = %device, group_id = %group_id, error = %e, "Group push failed");
                return Err(e);
            }
        };

        self.record_present(device, group_id).await;
        Ok(existed)
    }

    async fn record_present(&self, device: &DeviceId, group_id: GroupId) {
        self.groups.store(device, group_id).await;
    }
}
