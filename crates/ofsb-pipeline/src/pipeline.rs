//! # Southbound Pipeline
//!
//! Entry point for everything the controller wants done on a device.
//!
//! ## Submission Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SouthboundPipeline                                 │
//! │                                                                         │
//! │  submit_*(...) / handle_event(...)                                     │
//! │        │                                                                │
//! │        ├── validate (table id, non-empty batch)  ── fail fast           │
//! │        ├── look up the device's channel          ── NotConnected        │
//! │        ▼                                                                │
//! │  JobSerializer::enqueue(device, job) ──► one job at a time per device   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────┐           │
//! │  │ FlowService  │   │ GroupService │   │ batch::barrier    │           │
//! │  └──────┬───────┘   └──────┬───────┘   └─────────┬─────────┘           │
//! │         └──────────────────┼─────────────────────┘                     │
//! │                            ▼                                            │
//! │                  OutboundChannel (per device)                          │
//! │                                                                         │
//! │  DEVICE LIFECYCLE:                                                     │
//! │  attach_device(channel)  - routes submissions for that device          │
//! │  detach_device(device)   - fails in-flight requests, drops the queue,  │
//! │                            forgets the device's groups and flows       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ofsb_core::validation::validate_table_id;
use ofsb_core::{DeviceId, Flow, FlowDescriptor, FlowPath, Group};

use crate::batch;
use crate::channel::OutboundChannel;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::events::ChangeEvent;
use crate::flow_service::{FlowOutcome, FlowService};
use crate::group_service::GroupService;
use crate::registry::{DeviceFlowRegistry, DeviceGroupRegistry};
use crate::resolver::{DependencyResolver, GroupExistsRule};
use crate::serializer::JobSerializer;
use crate::store::ConfigStore;

/// Serialized, dependency-aware programming of attached devices.
pub struct SouthboundPipeline {
    config: Arc<PipelineConfig>,
    channels: RwLock<HashMap<DeviceId, Arc<dyn OutboundChannel>>>,
    serializer: JobSerializer,
    groups: Arc<DeviceGroupRegistry>,
    flows: Arc<DeviceFlowRegistry>,
    flow_service: Arc<FlowService>,
    group_service: Arc<GroupService>,
    shutting_down: AtomicBool,
}

impl SouthboundPipeline {
    /// Creates a pipeline with no devices attached.
    pub fn new(config: PipelineConfig, store: Arc<dyn ConfigStore>) -> PipelineResult<Self> {
        config.validate()?;

        let groups = Arc::new(DeviceGroupRegistry::new());
        let flows = Arc::new(DeviceFlowRegistry::new(config.flow_hash));
        let resolver = Arc::new(DependencyResolver::new(
            groups.clone(),
            store.clone(),
            GroupExistsRule::from_settings(&config.device),
        ));
        let flow_service = Arc::new(FlowService::new(
            flows.clone(),
            resolver.clone(),
            store,
            config.device.stale_marking,
        ));
        let group_service = Arc::new(GroupService::new(groups.clone(), resolver));

        Ok(SouthboundPipeline {
            config: Arc::new(config),
            channels: RwLock::new(HashMap::new()),
            serializer: JobSerializer::new(),
            groups,
            flows,
            flow_service,
            group_service,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn groups(&self) -> &Arc<DeviceGroupRegistry> {
        &self.groups
    }

    pub fn flows(&self) -> &Arc<DeviceFlowRegistry> {
        &self.flows
    }

    // =========================================================================
    // Device Lifecycle
    // =========================================================================

    /// Routes submissions for the channel's device through `channel`.
    ///
    /// A channel already attached for the same device is closed.
    pub async fn attach_device(&self, channel: Arc<dyn OutboundChannel>) -> PipelineResult<()> {
        self.ensure_running()?;
        let device = channel.device_id().clone();
        let previous = self.channels.write().await.insert(device.clone(), channel);
        if let Some(previous) = previous {
            warn!(device = %device, "Replacing attached channel");
            previous.close();
        }
        info!(device = %device, "Device attached");
        Ok(())
    }

    /// Detaches a device. Returns false if it was not attached.
    ///
    /// Outstanding requests fail with `ConnectionLost`; jobs still queued run
    /// against the closed channel and fail the same way.
    pub async fn detach_device(&self, device: &DeviceId) -> bool {
        let Some(channel) = self.channels.write().await.remove(device) else {
            return false;
        };
        channel.close();

        // Queued behind every pending job so nothing re-records state afterwards
        let groups = self.groups.clone();
        let flows = self.flows.clone();
        let owner = device.clone();
        let cleared = self.serializer.enqueue(device, move || async move {
            groups.clear_device(&owner).await;
            flows.clear_device(&owner).await;
            Ok(())
        });
        self.serializer.remove_device(device);

        if let Err(e) = cleared.await {
            warn!(device = %device, error = %e, "Clearing device state failed");
        }
        info!(device = %device, "Device detached");
        true
    }

    /// Devices currently attached, sorted.
    pub async fn attached_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.channels.read().await.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Detaches every device and rejects further submissions.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down southbound pipeline");
        for device in self.attached_devices().await {
            self.detach_device(&device).await;
        }
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PipelineError::ShuttingDown);
        }
        Ok(())
    }

    async fn channel(&self, device: &DeviceId) -> PipelineResult<Arc<dyn OutboundChannel>> {
        self.ensure_running()?;
        self.channels
            .read()
            .await
            .get(device)
            .cloned()
            .ok_or_else(|| PipelineError::NotConnected {
                device: device.clone(),
            })
    }

    // =========================================================================
    // Flow Operations
    // =========================================================================

    /// Installs `flow` at `path`, pushing its group first when needed.
    pub async fn submit_add(&self, path: FlowPath, flow: Flow) -> PipelineResult<FlowOutcome> {
        validate_table_id(&path, &flow)?;
        let channel = self.channel(&path.device_id).await?;
        let operation_id = Uuid::new_v4();
        debug!(operation = %operation_id, path = %path, "Flow add submitted");

        let service = self.flow_service.clone();
        let device = path.device_id.clone();
        self.serializer
            .enqueue(&device, move || async move {
                service.add(channel.as_ref(), &path, flow, operation_id).await
            })
            .await
    }

    /// Replaces `original` with `updated` at `path`.
    ///
    /// Only `updated` has to live in the path's table; an original in another
    /// table is deleted and the updated flow added.
    pub async fn submit_update(
        &self,
        path: FlowPath,
        original: Flow,
        updated: Flow,
    ) -> PipelineResult<FlowOutcome> {
        validate_table_id(&path, &updated)?;
        let channel = self.channel(&path.device_id).await?;
        let operation_id = Uuid::new_v4();
        debug!(operation = %operation_id, path = %path, "Flow update submitted");

        let service = self.flow_service.clone();
        let device = path.device_id.clone();
        self.serializer
            .enqueue(&device, move || async move {
                service
                    .update(channel.as_ref(), &path, original, updated, operation_id)
                    .await
            })
            .await
    }

    /// Removes `flow` from `path` with a strict delete.
    pub async fn submit_remove(&self, path: FlowPath, flow: Flow) -> PipelineResult<FlowOutcome> {
        validate_table_id(&path, &flow)?;
        let channel = self.channel(&path.device_id).await?;
        let operation_id = Uuid::new_v4();
        debug!(operation = %operation_id, path = %path, "Flow remove submitted");

        let service = self.flow_service.clone();
        let device = path.device_id.clone();
        self.serializer
            .enqueue(&device, move || async move {
                service.remove(channel.as_ref(), &path, flow, operation_id).await
            })
            .await
    }

    /// Records that a configured flow is going away, without touching the device.
    pub async fn create_stale_marker(&self, path: &FlowPath, flow: &Flow) -> PipelineResult<()> {
        validate_table_id(path, flow)?;
        self.flow_service.create_stale_marker(path, flow).await
    }

    /// Returns the descriptor for a flow reported by the device, minting an
    /// id when the flow is not configured.
    ///
    /// Fails with `NotConnected` for a device that is not attached.
    pub async fn observe_flow(&self, device: &DeviceId, flow: Flow) -> PipelineResult<FlowDescriptor> {
        self.ensure_running()?;
        // Held while enqueueing so a concurrent detach queues its clearing job after this one
        let channels = self.channels.read().await;
        if !channels.contains_key(device) {
            debug!(device = %device, "Ignoring flow report from detached device");
            return Err(PipelineError::NotConnected {
                device: device.clone(),
            });
        }

        let flows = self.flows.clone();
        let owner = device.clone();
        let observed = self.serializer.enqueue(device, move || async move {
            Ok(flows.store_if_necessary(&owner, &flow).await)
        });
        drop(channels);
        observed.await
    }

    // =========================================================================
    // Group Operations
    // =========================================================================

    pub async fn submit_group_add(&self, device: &DeviceId, group: Group) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        let service = self.group_service.clone();
        self.serializer
            .enqueue(device, move || async move { service.add(channel.as_ref(), group).await })
            .await
    }

    pub async fn submit_group_update(&self, device: &DeviceId, group: Group) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        let service = self.group_service.clone();
        self.serializer
            .enqueue(device, move || async move { service.update(channel.as_ref(), group).await })
            .await
    }

    pub async fn submit_group_remove(&self, device: &DeviceId, group: Group) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        let service = self.group_service.clone();
        self.serializer
            .enqueue(device, move || async move { service.remove(channel.as_ref(), group).await })
            .await
    }

    /// Adds `groups` in one batch, optionally closed by a barrier.
    pub async fn submit_group_add_batch(
        &self,
        device: &DeviceId,
        groups: Vec<Group>,
        barrier_after: bool,
    ) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        let service = self.group_service.clone();
        self.serializer
            .enqueue(device, move || async move {
                service.add_batch(channel.as_ref(), groups, barrier_after).await
            })
            .await
    }

    /// Removes `groups` in one batch, optionally closed by a barrier.
    pub async fn submit_group_remove_batch(
        &self,
        device: &DeviceId,
        groups: Vec<Group>,
        barrier_after: bool,
    ) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        let service = self.group_service.clone();
        self.serializer
            .enqueue(device, move || async move {
                service.remove_batch(channel.as_ref(), groups, barrier_after).await
            })
            .await
    }

    /// Waits until the device has processed everything sent before.
    pub async fn send_barrier(&self, device: &DeviceId) -> PipelineResult<()> {
        let channel = self.channel(device).await?;
        self.serializer
            .enqueue(device, move || async move { batch::barrier(channel.as_ref()).await })
            .await
    }

    // =========================================================================
    // Change Events
    // =========================================================================

    /// Submits the one operation `event` calls for.
    pub async fn handle_event(&self, event: ChangeEvent) -> PipelineResult<()> {
        debug!(device = %event.device_id(), kind = event.kind(), "Change event");
        match event {
            ChangeEvent::FlowAdded { path, flow } => self.submit_add(path, flow).await.map(|_| ()),
            ChangeEvent::FlowUpdated {
                path,
                original,
                updated,
            } => self.submit_update(path, original, updated).await.map(|_| ()),
            ChangeEvent::FlowRemoved { path, flow } => {
                self.submit_remove(path, flow).await.map(|_| ())
            }
            ChangeEvent::GroupAdded { device, group } => self.submit_group_add(&device, group).await,
            ChangeEvent::GroupUpdated {
                device, updated, ..
            } => self.submit_group_update(&device, updated).await,
            ChangeEvent::GroupRemoved { device, group } => {
                self.submit_group_remove(&device, group).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStep;
    use crate::channel::DeviceConnection;
    use crate::protocol::{ErrorMsg, FlowModCommand, OfMessage};
    use crate::resolver::ResolveOutcome;
    use crate::store::InMemoryConfigStore;
    use crate::testing::{ack_all, SimulatedSwitch};
    use ofsb_core::{Action, GroupId, GroupType, Instruction, Match, TableId};
    use std::time::Duration;

    const DEVICE: &str = "openflow:1";

    struct Harness {
        pipeline: Arc<SouthboundPipeline>,
        store: Arc<InMemoryConfigStore>,
        conn: DeviceConnection,
        switch: SimulatedSwitch,
    }

    async fn harness<F>(responder: F) -> Harness
    where
        F: Fn(&crate::protocol::Envelope) -> Option<OfMessage> + Send + 'static,
    {
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .put_group(&device(), Group::new(GroupId::new(7), GroupType::All))
            .await;
        let pipeline =
            Arc::new(SouthboundPipeline::new(PipelineConfig::default(), store.clone()).unwrap());
        let (conn, switch) = SimulatedSwitch::start(DEVICE, responder);
        pipeline.attach_device(Arc::new(conn.clone())).await.unwrap();
        Harness {
            pipeline,
            store,
            conn,
            switch,
        }
    }

    fn device() -> DeviceId {
        DeviceId::new(DEVICE)
    }

    fn path(table: u8, id: &str) -> FlowPath {
        FlowPath::new(DEVICE, TableId::new(table), id)
    }

    fn flow(priority: u16) -> Flow {
        Flow::new(TableId::new(0), priority).with_match(Match::default().with_in_port(priority as u32))
    }

    fn flow_to_group(priority: u16, group: u32) -> Flow {
        flow(priority).with_instructions(vec![Instruction::ApplyActions {
            actions: vec![Action::Group {
                group_id: GroupId::new(group),
            }],
        }])
    }

    #[tokio::test]
    async fn test_table_id_mismatch_sends_nothing() {
        let h = harness(ack_all).await;

        let err = h
            .pipeline
            .submit_add(path(3, "f1"), flow(1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::InvalidTableId {
                path: TableId::new(3),
                payload: TableId::new(0),
            }
        );
        assert!(h.switch.received().is_empty());
        assert_eq!(h.conn.pending_count(), 0);
        assert_eq!(h.pipeline.flows().len(&device()).await, 0);
    }

    #[tokio::test]
    async fn test_unattached_device_is_not_connected() {
        let h = harness(ack_all).await;
        let other = FlowPath::new("openflow:9", TableId::new(0), "f1");

        assert_eq!(
            h.pipeline.submit_add(other, flow(1)).await.unwrap_err(),
            PipelineError::NotConnected {
                device: DeviceId::new("openflow:9")
            }
        );
    }

    #[tokio::test]
    async fn test_group_is_pushed_once_ahead_of_flows() {
        let h = harness(ack_all).await;

        let first = h
            .pipeline
            .submit_add(path(0, "f1"), flow_to_group(1, 7))
            .await
            .unwrap();
        let second = h
            .pipeline
            .submit_add(path(0, "f2"), flow_to_group(2, 7))
            .await
            .unwrap();

        assert_eq!(first.dependency, ResolveOutcome::Pushed(GroupId::new(7)));
        assert_eq!(second.dependency, ResolveOutcome::Present(GroupId::new(7)));
        assert_eq!(h.switch.kinds(), vec!["group_mod", "flow_mod", "flow_mod"]);
        assert_ne!(first.operation_id, second.operation_id);
    }

    #[tokio::test]
    async fn test_submissions_reach_the_wire_in_order() {
        let h = harness(ack_all).await;
        let p = &h.pipeline;

        let (a, b, c) = tokio::join!(
            p.submit_add(path(0, "a"), flow(1)),
            p.submit_add(path(0, "b"), flow(2)),
            p.submit_remove(path(0, "a"), flow(1)),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let order: Vec<(FlowModCommand, u16)> = h
            .switch
            .flow_mods()
            .iter()
            .map(|fm| (fm.command, fm.flow.priority))
            .collect();
        assert_eq!(
            order,
            vec![
                (FlowModCommand::Add, 1),
                (FlowModCommand::Add, 2),
                (FlowModCommand::DeleteStrict, 1),
            ]
        );
        assert_eq!(h.pipeline.flows().len(&device()).await, 1);
    }

    #[tokio::test]
    async fn test_update_and_remove_are_strict() {
        let h = harness(ack_all).await;

        h.pipeline
            .submit_update(path(0, "f1"), flow(1), flow(2))
            .await
            .unwrap();
        h.pipeline.submit_remove(path(0, "f1"), flow(2)).await.unwrap();

        let mods = h.switch.flow_mods();
        assert_eq!(mods.len(), 3);
        assert!(mods.iter().all(|fm| fm.flow.strict));
        assert_eq!(mods[2].command, FlowModCommand::DeleteStrict);
        assert_eq!(h.store.stale_markers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_from_other_table_removes_then_adds() {
        let h = harness(ack_all).await;
        let original = Flow::new(TableId::new(1), 10);
        let updated = Flow::new(TableId::new(0), 10);

        h.pipeline
            .submit_update(path(0, "f1"), original, updated)
            .await
            .unwrap();

        let mods = h.switch.flow_mods();
        let sent: Vec<(FlowModCommand, TableId)> =
            mods.iter().map(|fm| (fm.command, fm.flow.table_id)).collect();
        assert_eq!(
            sent,
            vec![
                (FlowModCommand::DeleteStrict, TableId::new(1)),
                (FlowModCommand::Add, TableId::new(0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_rejects_updated_flow_in_other_table() {
        let h = harness(ack_all).await;

        let err = h
            .pipeline
            .submit_update(path(0, "f1"), flow(1), Flow::new(TableId::new(2), 1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::InvalidTableId {
                path: TableId::new(0),
                payload: TableId::new(2),
            }
        );
        assert!(h.switch.received().is_empty());
    }

    #[tokio::test]
    async fn test_update_pushes_absent_group_first() {
        let h = harness(ack_all).await;

        let outcome = h
            .pipeline
            .submit_update(path(0, "f1"), flow(1), flow_to_group(1, 7))
            .await
            .unwrap();

        assert_eq!(outcome.dependency, ResolveOutcome::Pushed(GroupId::new(7)));
        assert_eq!(h.switch.kinds(), vec!["group_mod", "flow_mod"]);
        assert!(h.pipeline.groups().contains(&device(), GroupId::new(7)).await);
    }

    #[tokio::test]
    async fn test_update_group_rejection_sends_no_flow_mod() {
        let h = harness(|envelope| match envelope.message {
            OfMessage::GroupMod(_) => Some(OfMessage::Error(ErrorMsg::new(
                crate::protocol::OFPET_GROUP_MOD_FAILED,
                6,
                "bad bucket",
            ))),
            _ => Some(OfMessage::Ack),
        })
        .await;

        let err = h
            .pipeline
            .submit_update(path(0, "f1"), flow(1), flow_to_group(1, 7))
            .await
            .unwrap_err();

        assert!(err.is_device_rejection());
        assert_eq!(h.switch.kinds(), vec!["group_mod"]);
        assert!(!h.pipeline.groups().contains(&device(), GroupId::new(7)).await);
        assert_eq!(h.pipeline.flows().len(&device()).await, 0);
    }

    #[tokio::test]
    async fn test_group_remove_batch_barrier_failure() {
        let h = harness(|envelope| match envelope.message {
            OfMessage::BarrierRequest => Some(OfMessage::Error(ErrorMsg::new(1, 1, "barrier"))),
            _ => Some(OfMessage::Ack),
        })
        .await;
        let groups: Vec<Group> = (1..=3)
            .map(|id| Group::new(GroupId::new(id), GroupType::All))
            .collect();

        let err = h
            .pipeline
            .submit_group_remove_batch(&device(), groups, true)
            .await
            .unwrap_err();

        let failures = err.batch_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, BatchStep::Barrier);
        assert_eq!(
            h.switch.kinds(),
            vec!["group_mod", "group_mod", "group_mod", "barrier_request"]
        );
    }

    #[tokio::test]
    async fn test_handle_event_routes_to_one_operation() {
        let h = harness(ack_all).await;

        h.pipeline
            .handle_event(ChangeEvent::GroupAdded {
                device: device(),
                group: Group::new(GroupId::new(3), GroupType::Indirect),
            })
            .await
            .unwrap();
        h.pipeline
            .handle_event(ChangeEvent::FlowAdded {
                path: path(0, "f1"),
                flow: flow_to_group(1, 3),
            })
            .await
            .unwrap();

        // Group 3 was recorded by the group event, so the flow went alone
        assert_eq!(h.switch.kinds(), vec!["group_mod", "flow_mod"]);
        assert!(h.pipeline.groups().contains(&device(), GroupId::new(3)).await);
    }

    #[tokio::test]
    async fn test_detach_fails_in_flight_and_forgets_device() {
        let h = harness(|_| None).await;
        h.pipeline.groups().store(&device(), GroupId::new(1)).await;

        let pipeline = h.pipeline.clone();
        let in_flight =
            tokio::spawn(async move { pipeline.submit_add(path(0, "f1"), flow(1)).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.switch.received().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(h.pipeline.detach_device(&device()).await);
        assert_eq!(
            in_flight.await.unwrap().unwrap_err(),
            PipelineError::ConnectionLost { device: device() }
        );
        assert!(h.pipeline.groups().groups(&device()).await.is_empty());
        assert!(h.pipeline.attached_devices().await.is_empty());
        assert!(matches!(
            h.pipeline.send_barrier(&device()).await,
            Err(PipelineError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_submissions() {
        let h = harness(ack_all).await;
        h.pipeline.shutdown().await;

        assert_eq!(
            h.pipeline.submit_add(path(0, "f1"), flow(1)).await,
            Err(PipelineError::ShuttingDown)
        );
        assert!(!h.conn.is_connected());
    }

    #[tokio::test]
    async fn test_observe_flow_refuses_unattached_device() {
        let h = harness(ack_all).await;
        let other = DeviceId::new("openflow:9");

        assert_eq!(
            h.pipeline.observe_flow(&other, flow(5)).await,
            Err(PipelineError::NotConnected {
                device: other.clone()
            })
        );
        assert_eq!(h.pipeline.flows().len(&other).await, 0);

        assert!(h.pipeline.detach_device(&device()).await);
        assert!(h.pipeline.observe_flow(&device(), flow(5)).await.is_err());
        assert_eq!(h.pipeline.flows().len(&device()).await, 0);
    }

    #[tokio::test]
    async fn test_observe_flow_and_barrier() {
        let h = harness(ack_all).await;

        let unnamed = h.pipeline.observe_flow(&device(), flow(5)).await.unwrap();
        assert!(unnamed.flow_id.as_str().starts_with(crate::registry::ALIEN_FLOW_ID_PREFIX));

        h.pipeline.send_barrier(&device()).await.unwrap();
        assert_eq!(h.switch.kinds(), vec!["barrier_request"]);

        h.pipeline
            .create_stale_marker(&path(0, "f5"), &flow(5))
            .await
            .unwrap();
        assert_eq!(h.store.stale_markers().await.len(), 1);
    }
}
