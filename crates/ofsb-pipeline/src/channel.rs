//! # Outbound Channel
//!
//! The only writer to a device's wire, and the place replies come back in.
//!
//! ## Connection Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DeviceConnection                                  │
//! │                                                                         │
//! │  send(xid, msg) ──► register(xid, deadline) ──► outbound queue         │
//! │        │                                              │                 │
//! │        ▼                                              ▼                 │
//! │   PendingReply ◄──────────┐                   ┌──────────────┐          │
//! │   (awaits slot)           │                   │ writer task  │          │
//! │                           │                   │ mark sent    │          │
//! │                           │                   │ encode       │──► wire  │
//! │                ┌──────────┴─────────┐         └──────────────┘          │
//! │                │ TransactionRegistry│                                   │
//! │                └──────────▲─────────┘         ┌──────────────┐          │
//! │                           │                   │ sweeper task │          │
//! │   handle_inbound(frame) ──┤  resolve / fail   │ expire()     │          │
//! │   disconnect() ───────────┘  fail_all         └──────────────┘          │
//! │                                                                         │
//! │  Messages leave in the order `send` was called.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use ofsb_core::{DeviceId, Xid};

use crate::codec::WireCodec;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::protocol::{Envelope, OfMessage};
use crate::transaction::{ReplySlot, TransactionRegistry};

// =============================================================================
// Channel Contract
// =============================================================================

/// Ordered, correlated path to one device.
pub trait OutboundChannel: Send + Sync {
    fn device_id(&self) -> &DeviceId;

    /// Fresh xid, unused among this channel's outstanding requests.
    fn allocate_xid(&self) -> Xid;

    /// Queues `message` under `xid`. The reply future resolves when the
    /// device answers, the deadline passes or the connection drops.
    fn send(&self, xid: Xid, message: OfMessage) -> PendingReply;

    /// Stops the channel and fails everything outstanding.
    fn close(&self) {}
}

// =============================================================================
// Pending Reply
// =============================================================================

/// Future of one request's outcome.
pub struct PendingReply {
    xid: Xid,
    slot: ReplySlot,
    registry: Option<Arc<TransactionRegistry>>,
}

impl PendingReply {
    pub fn new(xid: Xid, slot: ReplySlot, registry: Arc<TransactionRegistry>) -> Self {
        PendingReply {
            xid,
            slot,
            registry: Some(registry),
        }
    }

    /// A reply that is already settled with `error`.
    pub fn failed(xid: Xid, error: PipelineError) -> Self {
        let (tx, slot) = oneshot::channel();
        let _ = tx.send(Err(error));
        PendingReply {
            xid,
            slot,
            registry: None,
        }
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    /// Withdraws the request if it has not been written yet.
    pub fn cancel(&self) -> bool {
        match &self.registry {
            Some(registry) => registry.cancel(self.xid),
            None => false,
        }
    }
}

impl Future for PendingReply {
    type Output = PipelineResult<OfMessage>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let xid = this.xid;
        Pin::new(&mut this.slot).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(PipelineError::ChannelError(format!(
                "Result slot for transaction {} dropped",
                xid
            ))),
        })
    }
}

// =============================================================================
// Device Connection
// =============================================================================

struct ConnectionInner {
    device_id: DeviceId,
    registry: Arc<TransactionRegistry>,
    codec: Arc<dyn WireCodec>,
    outbound_tx: mpsc::Sender<Envelope>,
    connected: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    request_timeout: Duration,
    barrier_timeout: Duration,
}

/// Queue-backed channel over one device byte stream.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct DeviceConnection {
    inner: Arc<ConnectionInner>,
}

impl DeviceConnection {
    /// Starts the writer and sweeper tasks for a device.
    ///
    /// `wire` receives one encoded frame per message, in send order.
    pub fn open(
        device_id: DeviceId,
        codec: Arc<dyn WireCodec>,
        wire: mpsc::Sender<Vec<u8>>,
        config: &PipelineConfig,
    ) -> Self {
        let registry = Arc::new(TransactionRegistry::new(device_id.clone()));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.device.outbound_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_writer(
            device_id.clone(),
            registry.clone(),
            codec.clone(),
            wire,
            outbound_rx,
            connected.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(run_sweeper(
            registry.clone(),
            config.transaction.sweep_interval(),
            shutdown_rx,
        ));

        info!(device = %device_id, "Device connection opened");

        DeviceConnection {
            inner: Arc::new(ConnectionInner {
                device_id,
                registry,
                codec,
                outbound_tx,
                connected,
                shutdown_tx,
                request_timeout: config.transaction.request_timeout(),
                barrier_timeout: config.transaction.barrier_timeout(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.registry.pending_count()
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.inner.registry
    }

    /// Routes one frame from the device to its pending request.
    ///
    /// Undecodable frames and replies for unknown xids are logged and
    /// dropped; they never affect other outstanding requests.
    pub fn handle_inbound(&self, frame: &[u8]) {
        let envelope = match self.inner.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(device = %self.inner.device_id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        let xid = envelope.xid;
        let kind = envelope.message.kind();
        let outcome = match envelope.message {
            OfMessage::Error(err) => self
                .inner
                .registry
                .fail(xid, PipelineError::DeviceRejected(err)),
            reply => self.inner.registry.resolve(xid, reply),
        };

        match outcome {
            Ok(()) => trace!(device = %self.inner.device_id, xid = %xid, kind, "Reply routed"),
            Err(e) => debug!(
                device = %self.inner.device_id,
                xid = %xid,
                kind,
                error = %e,
                "Ignoring reply"
            ),
        }
    }

    /// Fails every outstanding request with `ConnectionLost` and stops the
    /// background tasks.
    pub fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown_tx.send_replace(true);
        let failed = self.inner.registry.fail_all(self.connection_lost());
        info!(device = %self.inner.device_id, failed, "Device connection closed");
    }

    fn connection_lost(&self) -> PipelineError {
        PipelineError::ConnectionLost {
            device: self.inner.device_id.clone(),
        }
    }

    fn deadline_for(&self, message: &OfMessage) -> Instant {
        let timeout = match message {
            OfMessage::BarrierRequest => self.inner.barrier_timeout,
            _ => self.inner.request_timeout,
        };
        Instant::now() + timeout
    }
}

impl OutboundChannel for DeviceConnection {
    fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    fn allocate_xid(&self) -> Xid {
        self.inner.registry.allocate()
    }

    fn send(&self, xid: Xid, message: OfMessage) -> PendingReply {
        if !self.is_connected() {
            return PendingReply::failed(xid, self.connection_lost());
        }

        let registry = &self.inner.registry;
        let slot = match registry.register(xid, Some(self.deadline_for(&message))) {
            Ok(slot) => slot,
            Err(e) => return PendingReply::failed(xid, e),
        };

        // disconnect() may have drained the registry between the check above
        // and the registration.
        if !self.is_connected() {
            let _ = registry.fail(xid, self.connection_lost());
        } else {
            let kind = message.kind();
            match self.inner.outbound_tx.try_send(Envelope::new(xid, message)) {
                Ok(()) => trace!(device = %self.inner.device_id, xid = %xid, kind, "Queued"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(device = %self.inner.device_id, xid = %xid, "Outbound queue full");
                    let _ = registry.fail(
                        xid,
                        PipelineError::ChannelError("Outbound queue full".into()),
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    let _ = registry.fail(xid, self.connection_lost());
                }
            }
        }

        PendingReply::new(xid, slot, registry.clone())
    }

    fn close(&self) {
        self.disconnect();
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

async fn run_writer(
    device_id: DeviceId,
    registry: Arc<TransactionRegistry>,
    codec: Arc<dyn WireCodec>,
    wire: mpsc::Sender<Vec<u8>>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            next = outbound_rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if !registry.mark_dispatched(envelope.xid) {
            debug!(device = %device_id, xid = %envelope.xid, "Skipping withdrawn request");
            continue;
        }

        let frame = match codec.encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %device_id, xid = %envelope.xid, error = %e, "Encoding failed");
                let _ = registry.fail(envelope.xid, e);
                continue;
            }
        };

        if wire.send(frame).await.is_err() {
            warn!(device = %device_id, "Device stream closed, failing outstanding requests");
            connected.store(false, Ordering::SeqCst);
            registry.fail_all(PipelineError::ConnectionLost {
                device: device_id.clone(),
            });
            break;
        }
        trace!(device = %device_id, xid = %envelope.xid, kind = envelope.message.kind(), "Written");
    }
    debug!(device = %device_id, "Writer stopped");
}

async fn run_sweeper(
    registry: Arc<TransactionRegistry>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut orphaned = false;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed(), if !orphaned => {
                if changed.is_ok() {
                    break;
                }
                // Every handle is gone but replies may still be awaited; keep
                // expiring them until none are left.
                debug!(device = %registry.device_id(), "Connection dropped without disconnect");
                orphaned = true;
            }
            _ = ticker.tick() => {
                for xid in registry.overdue(Instant::now()) {
                    if registry.expire(xid).is_ok() {
                        warn!(device = %registry.device_id(), xid = %xid, "Request timed out");
                    }
                }
                if orphaned && registry.pending_count() == 0 {
                    break;
                }
            }
        }
    }
    debug!(device = %registry.device_id(), "Sweeper stopped");
}
