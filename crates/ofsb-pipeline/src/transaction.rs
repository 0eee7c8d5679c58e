//! # Transaction Registry
//!
//! Outstanding requests of one device connection, keyed by xid.
//!
//! ## Request Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Pending Request Lifecycle                           │
//! │                                                                         │
//! │  allocate() ──► register(xid, deadline) ──► [queued]                   │
//! │                                                │                        │
//! │                       cancel() ◄───────────────┤  (Cancelled)           │
//! │                                                ▼                        │
//! │                                  mark_dispatched() ──► [on the wire]    │
//! │                                                │                        │
//! │               ┌──────────────┬────────────────┼──────────────┐          │
//! │               ▼              ▼                ▼              ▼          │
//! │           resolve()       fail()          expire()       fail_all()     │
//! │           Ok(reply)    Err(cause)     Err(Timeout)  Err(ConnectionLost) │
//! │                                                                         │
//! │  Every xid is consumed exactly once; a second resolution reports       │
//! │  UnknownTransaction and touches nothing else.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use ofsb_core::{DeviceId, Xid};

use crate::error::{PipelineError, PipelineResult};
use crate::protocol::OfMessage;

/// Number of distinct xids.
const XID_SPACE: u64 = 1 << 32;

/// Receiving half of a pending request's result slot.
pub type ReplySlot = oneshot::Receiver<PipelineResult<OfMessage>>;

struct PendingRequest {
    slot: oneshot::Sender<PipelineResult<OfMessage>>,
    deadline: Option<Instant>,
    dispatched: bool,
}

struct RegistryState {
    next_xid: u32,
    pending: HashMap<Xid, PendingRequest>,
}

/// Pending requests of a single device connection.
pub struct TransactionRegistry {
    device_id: DeviceId,
    state: Mutex<RegistryState>,
}

impl TransactionRegistry {
    pub fn new(device_id: DeviceId) -> Self {
        TransactionRegistry {
            device_id,
            state: Mutex::new(RegistryState {
                next_xid: 1,
                pending: HashMap::new(),
            }),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    // The state is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues an xid not used by any outstanding request.
    ///
    /// With every xid outstanding the next one is returned anyway, and
    /// registering it fails with `XidInUse`.
    pub fn allocate(&self) -> Xid {
        self.allocate_within(XID_SPACE)
    }

    fn allocate_within(&self, attempts: u64) -> Xid {
        let mut state = self.lock();
        let first = Xid::new(state.next_xid);
        for _ in 0..attempts {
            let candidate = Xid::new(state.next_xid);
            state.next_xid = state.next_xid.wrapping_add(1);
            if !state.pending.contains_key(&candidate) {
                return candidate;
            }
        }
        debug!(device = %self.device_id, "No free xid, every value is outstanding");
        state.next_xid = first.value().wrapping_add(1);
        first
    }

    /// Records a pending request and returns its result slot.
    pub fn register(&self, xid: Xid, deadline: Option<Instant>) -> PipelineResult<ReplySlot> {
        let mut state = self.lock();
        if state.pending.contains_key(&xid) {
            return Err(PipelineError::XidInUse { xid });
        }

        let (slot, rx) = oneshot::channel();
        state.pending.insert(
            xid,
            PendingRequest {
                slot,
                deadline,
                dispatched: false,
            },
        );
        trace!(device = %self.device_id, xid = %xid, "Registered pending request");
        Ok(rx)
    }

    fn take(&self, xid: Xid) -> PipelineResult<PendingRequest> {
        self.lock()
            .pending
            .remove(&xid)
            .ok_or(PipelineError::UnknownTransaction { xid })
    }

    /// Completes a pending request with the device's reply.
    pub fn resolve(&self, xid: Xid, reply: OfMessage) -> PipelineResult<()> {
        let request = self.take(xid)?;
        // A dropped receiver means nobody is waiting any more; the xid is still consumed.
        let _ = request.slot.send(Ok(reply));
        Ok(())
    }

    /// Completes a pending request with a failure.
    pub fn fail(&self, xid: Xid, cause: PipelineError) -> PipelineResult<()> {
        let request = self.take(xid)?;
        let _ = request.slot.send(Err(cause));
        Ok(())
    }

    /// Fails a pending request whose deadline passed.
    pub fn expire(&self, xid: Xid) -> PipelineResult<()> {
        self.fail(xid, PipelineError::Timeout { xid })
    }

    /// Withdraws a request that has not been written yet.
    ///
    /// Returns false when the request is already on the wire (or gone); such
    /// a request can only end through a reply, a timeout or connection loss.
    pub fn cancel(&self, xid: Xid) -> bool {
        let mut state = self.lock();
        match state.pending.get(&xid) {
            Some(request) if !request.dispatched => {}
            _ => return false,
        }
        if let Some(request) = state.pending.remove(&xid) {
            let _ = request.slot.send(Err(PipelineError::Cancelled));
        }
        debug!(device = %self.device_id, xid = %xid, "Pending request cancelled");
        true
    }

    /// Called by the writer right before a request goes on the wire.
    ///
    /// Returns false when the request was cancelled meanwhile and must be
    /// skipped.
    pub fn mark_dispatched(&self, xid: Xid) -> bool {
        match self.lock().pending.get_mut(&xid) {
            Some(request) => {
                request.dispatched = true;
                true
            }
            None => false,
        }
    }

    /// Xids whose deadline is at or before `now`.
    pub fn overdue(&self, now: Instant) -> Vec<Xid> {
        let state = self.lock();
        let mut xids: Vec<Xid> = state
            .pending
            .iter()
            .filter(|(_, request)| request.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(xid, _)| *xid)
            .collect();
        xids.sort();
        xids
    }

    /// Fails every outstanding request with `cause`. Returns how many.
    pub fn fail_all(&self, cause: PipelineError) -> usize {
        let drained: Vec<(Xid, PendingRequest)> = self.lock().pending.drain().collect();
        let count = drained.len();
        for (_, request) in drained {
            let _ = request.slot.send(Err(cause.clone()));
        }
        if count > 0 {
            debug!(device = %self.device_id, count, cause = %cause, "Failed all pending requests");
        }
        count
    }

    pub fn is_pending(&self, xid: Xid) -> bool {
        self.lock().pending.contains_key(&xid)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorMsg;
    use std::time::Duration;

    fn registry() -> TransactionRegistry {
        TransactionRegistry::new(DeviceId::new("openflow:1"))
    }

    #[test]
    fn test_allocate_skips_outstanding_xids() {
        let registry = registry();
        let first = registry.allocate();
        let _slot = registry.register(first, None).unwrap();

        // Wrap the counter back onto the outstanding xid
        registry.lock().next_xid = first.value();
        let next = registry.allocate();
        assert_ne!(next, first);
        assert_eq!(next.value(), first.value().wrapping_add(1));
    }

    #[test]
    fn test_allocate_wraps() {
        let registry = registry();
        registry.lock().next_xid = u32::MAX;
        assert_eq!(registry.allocate(), Xid::new(u32::MAX));
        assert_eq!(registry.allocate(), Xid::new(0));
    }

    #[test]
    fn test_allocate_gives_up_when_every_xid_is_outstanding() {
        let registry = registry();
        let _slots: Vec<ReplySlot> = (1..=3)
            .map(|value| registry.register(Xid::new(value), None).unwrap())
            .collect();

        let xid = registry.allocate_within(3);
        assert_eq!(xid, Xid::new(1));
        assert_eq!(
            registry.register(xid, None).unwrap_err(),
            PipelineError::XidInUse { xid }
        );

        // A free value is found again once one is released
        registry.resolve(Xid::new(3), OfMessage::Ack).unwrap();
        assert_eq!(registry.allocate_within(3), Xid::new(3));
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let registry = registry();
        let _slot = registry.register(Xid::new(5), None).unwrap();
        assert_eq!(
            registry.register(Xid::new(5), None).unwrap_err(),
            PipelineError::XidInUse { xid: Xid::new(5) }
        );
    }

    #[tokio::test]
    async fn test_resolve_consumes_exactly_once() {
        let registry = registry();
        let slot = registry.register(Xid::new(1), None).unwrap();

        registry.resolve(Xid::new(1), OfMessage::Ack).unwrap();
        assert_eq!(slot.await.unwrap(), Ok(OfMessage::Ack));

        assert_eq!(
            registry.resolve(Xid::new(1), OfMessage::Ack),
            Err(PipelineError::UnknownTransaction { xid: Xid::new(1) })
        );
    }

    #[tokio::test]
    async fn test_unknown_xid_leaves_others_untouched() {
        let registry = registry();
        let slot = registry.register(Xid::new(1), None).unwrap();

        assert!(registry.resolve(Xid::new(99), OfMessage::Ack).is_err());
        assert!(registry.fail(Xid::new(98), PipelineError::Cancelled).is_err());
        assert!(registry.is_pending(Xid::new(1)));

        let err = PipelineError::DeviceRejected(ErrorMsg::new(5, 1, ""));
        registry.fail(Xid::new(1), err.clone()).unwrap();
        assert_eq!(slot.await.unwrap(), Err(err));
    }

    #[tokio::test]
    async fn test_cancel_only_before_dispatch() {
        let registry = registry();
        let queued = registry.register(Xid::new(1), None).unwrap();
        let _sent = registry.register(Xid::new(2), None).unwrap();

        assert!(registry.mark_dispatched(Xid::new(2)));
        assert!(!registry.cancel(Xid::new(2)));
        assert!(registry.is_pending(Xid::new(2)));

        assert!(registry.cancel(Xid::new(1)));
        assert_eq!(queued.await.unwrap(), Err(PipelineError::Cancelled));
        assert!(!registry.mark_dispatched(Xid::new(1)));
    }

    #[tokio::test]
    async fn test_overdue_and_expire() {
        let registry = registry();
        let now = Instant::now();
        let late = registry.register(Xid::new(1), Some(now)).unwrap();
        let _fresh = registry
            .register(Xid::new(2), Some(now + Duration::from_secs(60)))
            .unwrap();
        let _forever = registry.register(Xid::new(3), None).unwrap();

        let overdue = registry.overdue(now);
        assert_eq!(overdue, vec![Xid::new(1)]);

        registry.expire(Xid::new(1)).unwrap();
        assert_eq!(
            late.await.unwrap(),
            Err(PipelineError::Timeout { xid: Xid::new(1) })
        );
        assert_eq!(registry.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let registry = registry();
        let a = registry.register(Xid::new(1), None).unwrap();
        let b = registry.register(Xid::new(2), None).unwrap();

        let lost = PipelineError::ConnectionLost {
            device: DeviceId::new("openflow:1"),
        };
        assert_eq!(registry.fail_all(lost.clone()), 2);
        assert_eq!(a.await.unwrap(), Err(lost.clone()));
        assert_eq!(b.await.unwrap(), Err(lost));
        assert_eq!(registry.pending_count(), 0);
    }
}
