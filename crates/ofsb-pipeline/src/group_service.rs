//! # Group Service
//!
//! Bodies of group jobs: single add/update/remove and barrier-closed batches.
//! The device's presence set follows every group-mod the device accepted.

use std::sync::Arc;
use tracing::info;

use ofsb_core::validation::validate_non_empty;
use ofsb_core::{Group, GroupId};

use crate::batch::{compose_with_barrier, BatchFailure, BatchStep};
use crate::channel::OutboundChannel;
use crate::error::{PipelineError, PipelineResult};
use crate::protocol::{GroupMod, OfMessage};
use crate::registry::DeviceGroupRegistry;
use crate::resolver::DependencyResolver;

pub struct GroupService {
    groups: Arc<DeviceGroupRegistry>,
    resolver: Arc<DependencyResolver>,
}

impl GroupService {
    pub fn new(groups: Arc<DeviceGroupRegistry>, resolver: Arc<DependencyResolver>) -> Self {
        GroupService { groups, resolver }
    }

    /// Adds a group. "Already exists" counts as success.
    pub async fn add(&self, channel: &dyn OutboundChannel, group: Group) -> PipelineResult<()> {
        let group_id = group.group_id;
        let existed = self.resolver.push_group(channel, group).await?;
        info!(device = %channel.device_id(), group_id = %group_id, existed, "Group added");
        Ok(())
    }

    pub async fn update(&self, channel: &dyn OutboundChannel, group: Group) -> PipelineResult<()> {
        let device = channel.device_id();
        let group_id = group.group_id;
        channel
            .send(channel.allocate_xid(), OfMessage::GroupMod(GroupMod::modify(group)))
            .await?;
        self.groups.store(device, group_id).await;
        info!(device = %device, group_id = %group_id, "Group updated");
        Ok(())
    }

    pub async fn remove(&self, channel: &dyn OutboundChannel, group: Group) -> PipelineResult<()> {
        let device = channel.device_id();
        let group_id = group.group_id;
        channel
            .send(channel.allocate_xid(), OfMessage::GroupMod(GroupMod::delete(group)))
            .await?;
        self.groups.remove(device, group_id).await;
        info!(device = %device, group_id = %group_id, "Group removed");
        Ok(())
    }

    /// Adds every group, optionally closed by a barrier.
    ///
    /// Groups the device accepted (or already had) are recorded present even
    /// when other members fail.
    pub async fn add_batch(
        &self,
        channel: &dyn OutboundChannel,
        groups: Vec<Group>,
        barrier_after: bool,
    ) -> PipelineResult<()> {
        validate_non_empty("add-groups-batch", &groups)?;
        let ids: Vec<GroupId> = groups.iter().map(|g| g.group_id).collect();
        let replies = groups
            .into_iter()
            .map(|g| channel.send(channel.allocate_xid(), OfMessage::GroupMod(GroupMod::add(g))))
            .collect();

        let result = self.absorb_exists(compose_with_barrier(channel, replies, barrier_after).await);

        let device = channel.device_id();
        for id in accepted(&ids, &result) {
            self.groups.store(device, id).await;
        }
        info!(device = %device, groups = ids.len(), ok = result.is_ok(), "Group add batch settled");
        result
    }

    /// Removes every group, optionally closed by a barrier.
    pub async fn remove_batch(
        &self,
        channel: &dyn OutboundChannel,
        groups: Vec<Group>,
        barrier_after: bool,
    ) -> PipelineResult<()> {
        validate_non_empty("remove-groups-batch", &groups)?;
        let ids: Vec<GroupId> = groups.iter().map(|g| g.group_id).collect();
        let replies = groups
            .into_iter()
            .map(|g| channel.send(channel.allocate_xid(), OfMessage::GroupMod(GroupMod::delete(g))))
            .collect();

        let result = compose_with_barrier(channel, replies, barrier_after).await;

        let device = channel.device_id();
        for id in accepted(&ids, &result) {
            self.groups.remove(device, id).await;
        }
        info!(device = %device, groups = ids.len(), ok = result.is_ok(), "Group remove batch settled");
        result
    }

    /// Drops "already exists" rejections of batch members from a batch error.
    fn absorb_exists(&self, result: PipelineResult<()>) -> PipelineResult<()> {
        match result {
            Err(PipelineError::Batch { total, failures }) => {
                let failures: Vec<BatchFailure> = failures
                    .into_iter()
                    .filter(|f| !self.is_exists(f))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(PipelineError::Batch { total, failures })
                }
            }
            other => other,
        }
    }

    fn is_exists(&self, failure: &BatchFailure) -> bool {
        match (&failure.step, &failure.error) {
            (BatchStep::Member(_), PipelineError::DeviceRejected(err)) => {
                self.resolver.rule().matches(err)
            }
            _ => false,
        }
    }
}

/// Ids of the batch members that did not fail.
fn accepted(ids: &[GroupId], result: &PipelineResult<()>) -> Vec<GroupId> {
    let failed = match result {
        Ok(()) => Vec::new(),
        Err(e) => e.failed_members(),
    };
    ids.iter()
        .enumerate()
        .filter(|(index, _)| !failed.contains(index))
        .map(|(_, id)| *id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorMsg, GroupModCommand, OFPET_GROUP_MOD_FAILED, OFPGMFC_GROUP_EXISTS};
    use crate::resolver::GroupExistsRule;
    use crate::store::InMemoryConfigStore;
    use crate::testing::{ack_all, SimulatedSwitch};
    use ofsb_core::{DeviceId, GroupType};

    fn service() -> GroupService {
        let groups = Arc::new(DeviceGroupRegistry::new());
        let resolver = Arc::new(DependencyResolver::new(
            groups.clone(),
            Arc::new(InMemoryConfigStore::new()),
            GroupExistsRule::default(),
        ));
        GroupService::new(groups, resolver)
    }

    fn group(id: u32) -> Group {
        Group::new(GroupId::new(id), GroupType::Select)
    }

    fn device() -> DeviceId {
        DeviceId::new("openflow:1")
    }

    #[tokio::test]
    async fn test_single_group_lifecycle() {
        let service = service();
        let (conn, switch) = SimulatedSwitch::start("openflow:1", ack_all);

        service.add(&conn, group(1)).await.unwrap();
        assert!(service.groups.contains(&device(), GroupId::new(1)).await);

        service.update(&conn, group(1)).await.unwrap();
        service.remove(&conn, group(1)).await.unwrap();
        assert!(!service.groups.contains(&device(), GroupId::new(1)).await);

        let commands: Vec<_> = switch.group_mods().iter().map(|gm| gm.command).collect();
        assert_eq!(
            commands,
            vec![GroupModCommand::Add, GroupModCommand::Modify, GroupModCommand::Delete]
        );
    }

    #[tokio::test]
    async fn test_remove_batch_with_barrier() {
        let service = service();
        let (conn, switch) = SimulatedSwitch::start("openflow:1", ack_all);
        for id in 1..=3 {
            service.groups.store(&device(), GroupId::new(id)).await;
        }

        service
            .remove_batch(&conn, vec![group(1), group(2), group(3)], true)
            .await
            .unwrap();

        assert_eq!(
            switch.kinds(),
            vec!["group_mod", "group_mod", "group_mod", "barrier_request"]
        );
        assert!(service.groups.groups(&device()).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected_without_traffic() {
        let service = service();
        let (conn, switch) = SimulatedSwitch::start("openflow:1", ack_all);

        let err = service.remove_batch(&conn, Vec::new(), true).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert!(switch.received().is_empty());
    }

    #[tokio::test]
    async fn test_add_batch_partial_failure_records_accepted() {
        let service = service();
        let (conn, _switch) = SimulatedSwitch::start("openflow:1", |envelope| {
            match &envelope.message {
                OfMessage::GroupMod(gm) if gm.group_id() == GroupId::new(2) => {
                    Some(OfMessage::Error(ErrorMsg::new(OFPET_GROUP_MOD_FAILED, 1, "no space")))
                }
                OfMessage::BarrierRequest => Some(OfMessage::BarrierReply),
                _ => Some(OfMessage::Ack),
            }
        });

        let err = service
            .add_batch(&conn, vec![group(1), group(2), group(3)], false)
            .await
            .unwrap_err();

        assert_eq!(err.failed_members(), vec![1]);
        assert_eq!(
            service.groups.groups(&device()).await,
            vec![GroupId::new(1), GroupId::new(3)]
        );
    }

    #[tokio::test]
    async fn test_add_batch_absorbs_existing_groups() {
        let service = service();
        let (conn, _switch) = SimulatedSwitch::start("openflow:1", |envelope| {
            match &envelope.message {
                OfMessage::GroupMod(_) => Some(OfMessage::Error(ErrorMsg::new(
                    OFPET_GROUP_MOD_FAILED,
                    OFPGMFC_GROUP_EXISTS,
                    "",
                ))),
                _ => Some(OfMessage::BarrierReply),
            }
        });

        service
            .add_batch(&conn, vec![group(4), group(5)], true)
            .await
            .unwrap();
        assert_eq!(service.groups.groups(&device()).await.len(), 2);
    }
}
