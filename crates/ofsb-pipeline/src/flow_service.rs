//! # Flow Service
//!
//! The bodies of flow add, update and remove jobs. Each method assumes it
//! runs inside the device's serialized job and that the path was validated.
//!
//! ## Message Plans
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Flow Operations                                 │
//! │                                                                         │
//! │  add     [GROUP_MOD ADD]? ──► FLOW_MOD ADD            [──► BARRIER]?    │
//! │                                                                         │
//! │  update  [GROUP_MOD ADD]? ──► FLOW_MOD MODIFY_STRICT  [──► BARRIER]?    │
//! │          (when modifiable)                                              │
//! │                                                                         │
//! │  update  [GROUP_MOD ADD]? ──► FLOW_MOD DELETE_STRICT (original)         │
//! │          (otherwise)          FLOW_MOD ADD (updated)  [──► BARRIER]?    │
//! │                                                                         │
//! │  remove  [stale marker] ──► FLOW_MOD DELETE_STRICT    [──► BARRIER]?    │
//! │                                                                         │
//! │  The bracketed group push only happens for an unknown group.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ofsb_core::{can_modify_flow, Flow, FlowDescriptor, FlowPath};

use crate::batch::compose_with_barrier;
use crate::channel::OutboundChannel;
use crate::error::PipelineResult;
use crate::protocol::{FlowMod, OfMessage};
use crate::registry::DeviceFlowRegistry;
use crate::resolver::{DependencyResolver, ResolveOutcome};
use crate::store::{ConfigStore, StaleFlowMarker};

/// Result of a completed flow operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    /// Correlates the operation's log lines.
    pub operation_id: Uuid,
    pub descriptor: FlowDescriptor,
    pub dependency: ResolveOutcome,
}

/// Copies of an update's flows with the strict-match flag set on both.
pub fn strict_pair(original: &Flow, updated: &Flow) -> (Flow, Flow) {
    (original.to_strict(), updated.to_strict())
}

/// Flow-mods that carry an update to the device, in send order.
pub fn update_plan(original: &Flow, updated: &Flow) -> Vec<FlowMod> {
    if can_modify_flow(original, updated) {
        vec![FlowMod::modify(updated.clone())]
    } else {
        vec![FlowMod::delete(original.clone()), FlowMod::add(updated.clone())]
    }
}

pub struct FlowService {
    flows: Arc<DeviceFlowRegistry>,
    resolver: Arc<DependencyResolver>,
    store: Arc<dyn ConfigStore>,
    stale_marking: bool,
}

impl FlowService {
    pub fn new(
        flows: Arc<DeviceFlowRegistry>,
        resolver: Arc<DependencyResolver>,
        store: Arc<dyn ConfigStore>,
        stale_marking: bool,
    ) -> Self {
        FlowService {
            flows,
            resolver,
            store,
            stale_marking,
        }
    }

    pub fn flows(&self) -> &Arc<DeviceFlowRegistry> {
        &self.flows
    }

    pub async fn add(
        &self,
        channel: &dyn OutboundChannel,
        path: &FlowPath,
        flow: Flow,
        operation_id: Uuid,
    ) -> PipelineResult<FlowOutcome> {
        let dependency = self.resolver.ensure_group(channel, &flow).await?;

        let barrier = flow.barrier;
        send_flow_mods(channel, vec![FlowMod::add(flow.clone())], barrier).await?;

        let descriptor = FlowDescriptor::new(path.table_id, path.flow_id.clone());
        self.flows
            .store(&path.device_id, &flow, descriptor.clone())
            .await;

        info!(operation = %operation_id, path = %path, "Flow added");
        Ok(FlowOutcome {
            operation_id,
            descriptor,
            dependency,
        })
    }

    pub async fn update(
        &self,
        channel: &dyn OutboundChannel,
        path: &FlowPath,
        original: Flow,
        updated: Flow,
        operation_id: Uuid,
    ) -> PipelineResult<FlowOutcome> {
        let (original, updated) = strict_pair(&original, &updated);
        let dependency = self.resolver.ensure_group(channel, &updated).await?;

        let plan = update_plan(&original, &updated);
        if plan.len() > 1 {
            debug!(operation = %operation_id, path = %path, "Update needs remove then add");
        }
        send_flow_mods(channel, plan, updated.barrier).await?;

        let descriptor = FlowDescriptor::new(path.table_id, path.flow_id.clone());
        self.flows.remove(&path.device_id, &original).await;
        self.flows
            .store(&path.device_id, &updated, descriptor.clone())
            .await;

        info!(operation = %operation_id, path = %path, "Flow updated");
        Ok(FlowOutcome {
            operation_id,
            descriptor,
            dependency,
        })
    }

    pub async fn remove(
        &self,
        channel: &dyn OutboundChannel,
        path: &FlowPath,
        flow: Flow,
        operation_id: Uuid,
    ) -> PipelineResult<FlowOutcome> {
        let flow = flow.to_strict();

        if self.stale_marking {
            self.mark_stale(path, &flow).await;
        }

        let barrier = flow.barrier;
        send_flow_mods(channel, vec![FlowMod::delete(flow.clone())], barrier).await?;
        self.flows.remove(&path.device_id, &flow).await;

        info!(operation = %operation_id, path = %path, "Flow removed");
        Ok(FlowOutcome {
            operation_id,
            descriptor: FlowDescriptor::new(path.table_id, path.flow_id.clone()),
            dependency: ResolveOutcome::NoDependency,
        })
    }

    /// Writes a stale marker. Failures are logged, never returned.
    pub async fn mark_stale(&self, path: &FlowPath, flow: &Flow) {
        if let Err(e) = self.create_stale_marker(path, flow).await {
            warn!(path = %path, error = %e, "Could not record stale flow");
        }
    }

    pub async fn create_stale_marker(&self, path: &FlowPath, flow: &Flow) -> PipelineResult<()> {
        self.store
            .put_stale_flow(StaleFlowMarker::new(path, flow))
            .await
    }
}

/// Sends `mods` in order and waits for all of them.
///
/// A single flow-mod without a barrier returns its own error unwrapped.
async fn send_flow_mods(
    channel: &dyn OutboundChannel,
    mods: Vec<FlowMod>,
    barrier: bool,
) -> PipelineResult<()> {
    let mut replies: Vec<_> = mods
        .into_iter()
        .map(|fm| channel.send(channel.allocate_xid(), OfMessage::FlowMod(fm)))
        .collect();

    if replies.len() == 1 && !barrier {
        if let Some(reply) = replies.pop() {
            reply.await?;
        }
        return Ok(());
    }
    compose_with_barrier(channel, replies, barrier).await
}
