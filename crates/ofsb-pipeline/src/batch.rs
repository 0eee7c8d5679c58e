//! # Batch/Barrier Composer
//!
//! Folds the replies of several requests into one outcome.
//!
//! ## Settlement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Batch Settlement                                 │
//! │                                                                         │
//! │   member 0 ──┐                                                         │
//! │   member 1 ──┼──► join_all ──┐                                         │
//! │   member 2 ──┘               ├──► Ok(())      every step succeeded      │
//! │   barrier  ─────────────────┘    Err(Batch)  one record per failure    │
//! │                                                                         │
//! │  • Every step is awaited; one failure never abandons the others        │
//! │  • Cancelled members add no failure record                             │
//! │  • A barrier is queued right after the members, so the device has      │
//! │    processed all of them before it answers                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::{join, join_all};
use tracing::{debug, warn};

use ofsb_core::{DeviceId, Xid};

use crate::channel::{OutboundChannel, PendingReply};
use crate::error::{PipelineError, PipelineResult};
use crate::protocol::OfMessage;

/// Position of a failed step inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStep {
    /// Index into the submitted members.
    Member(usize),
    /// The closing barrier.
    Barrier,
}

/// One failed step of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub step: BatchStep,
    pub xid: Option<Xid>,
    pub error: PipelineError,
}

/// Waits for every member and succeeds only if all of them did.
pub async fn compose(device: &DeviceId, members: Vec<PendingReply>) -> PipelineResult<()> {
    settle(device, members, None).await
}

/// Like [`compose`], optionally closing the batch with a barrier.
///
/// The members must already have been sent on `channel`.
pub async fn compose_with_barrier(
    channel: &dyn OutboundChannel,
    members: Vec<PendingReply>,
    barrier_after: bool,
) -> PipelineResult<()> {
    let barrier = barrier_after
        .then(|| channel.send(channel.allocate_xid(), OfMessage::BarrierRequest));
    settle(channel.device_id(), members, barrier).await
}

/// Sends a lone barrier and waits for its reply.
pub async fn barrier(channel: &dyn OutboundChannel) -> PipelineResult<()> {
    let xid = channel.allocate_xid();
    let reply = channel.send(xid, OfMessage::BarrierRequest).await?;
    expect_barrier_reply(xid, reply)
}

fn expect_barrier_reply(xid: Xid, reply: OfMessage) -> PipelineResult<()> {
    match reply {
        OfMessage::BarrierReply => Ok(()),
        other => Err(PipelineError::UnexpectedReply {
            xid,
            kind: other.kind().to_string(),
        }),
    }
}

async fn settle(
    device: &DeviceId,
    members: Vec<PendingReply>,
    barrier: Option<PendingReply>,
) -> PipelineResult<()> {
    let xids: Vec<Xid> = members.iter().map(PendingReply::xid).collect();
    let total = members.len() + usize::from(barrier.is_some());

    let (results, barrier_result) = match barrier {
        Some(barrier) => {
            let xid = barrier.xid();
            let (results, reply) = join(join_all(members), barrier).await;
            (results, Some((xid, reply)))
        }
        None => (join_all(members).await, None),
    };

    let mut failures: Vec<BatchFailure> = results
        .into_iter()
        .zip(xids)
        .enumerate()
        .filter_map(|(index, (result, xid))| match result {
            Ok(_) | Err(PipelineError::Cancelled) => None,
            Err(error) => Some(BatchFailure {
                step: BatchStep::Member(index),
                xid: Some(xid),
                error,
            }),
        })
        .collect();

    if let Some((xid, reply)) = barrier_result {
        match reply.and_then(|reply| expect_barrier_reply(xid, reply)) {
            Ok(()) | Err(PipelineError::Cancelled) => {}
            Err(cause) => failures.push(BatchFailure {
                step: BatchStep::Barrier,
                xid: Some(xid),
                error: PipelineError::BarrierFailed(Box::new(cause)),
            }),
        }
    }

    if failures.is_empty() {
        debug!(device = %device, steps = total, "Batch settled");
        Ok(())
    } else {
        warn!(device = %device, steps = total, failed = failures.len(), "Batch failed");
        Err(PipelineError::Batch { total, failures })
    }
}
