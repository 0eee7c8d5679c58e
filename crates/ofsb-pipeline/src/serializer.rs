//! # Per-Device Job Serializer
//!
//! One worker task per device runs that device's jobs one at a time.
//!
//! ## Worker Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Job Serializer                                   │
//! │                                                                         │
//! │  enqueue(dev A, J1) ─┐                                                 │
//! │  enqueue(dev A, J2) ─┼──► [A queue] ──► worker A:  J1 ──► J2 ──► J3   │
//! │  enqueue(dev A, J3) ─┘                                                 │
//! │                                                                         │
//! │  enqueue(dev B, K1) ────► [B queue] ──► worker B:  K1                  │
//! │                                                                         │
//! │  • A and B run in parallel; A's jobs never overlap                     │
//! │  • Workers are created on first use and stop after remove_device       │
//! │  • A job that fails or panics completes its own result only; the       │
//! │    worker moves on to the next job                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use ofsb_core::DeviceId;

use crate::error::{PipelineError, PipelineResult};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// FIFO job queues keyed by device.
#[derive(Default)]
pub struct JobSerializer {
    workers: Mutex<HashMap<DeviceId, mpsc::UnboundedSender<Job>>>,
}

impl JobSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<DeviceId, mpsc::UnboundedSender<Job>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `job` behind every job already queued for `device`.
    ///
    /// The job is queued when this is called, not when the returned future
    /// is first polled.
    pub fn enqueue<F, Fut, T>(
        &self,
        device: &DeviceId,
        job: F,
    ) -> impl Future<Output = PipelineResult<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PipelineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = result_tx.send(job().await);
            })
        });

        let queued = self.submit(device, wrapped);
        let device = device.clone();

        async move {
            queued?;
            result_rx.await.map_err(|_| PipelineError::JobAborted {
                device,
                reason: "job panicked before completing".into(),
            })?
        }
    }

    fn submit(&self, device: &DeviceId, job: Job) -> PipelineResult<()> {
        let mut workers = self.workers();
        let sender = workers
            .entry(device.clone())
            .or_insert_with(|| spawn_worker(device.clone()));

        sender
            .send(job)
            .map_err(|_| PipelineError::ChannelError(format!("Job queue for {} closed", device)))
    }

    /// Stops the worker of `device` once its queued jobs have run.
    pub fn remove_device(&self, device: &DeviceId) -> bool {
        let removed = self.workers().remove(device).is_some();
        if removed {
            debug!(device = %device, "Job queue released");
        }
        removed
    }

    pub fn device_count(&self) -> usize {
        self.workers().len()
    }
}

fn spawn_worker(device: DeviceId) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    debug!(device = %device, "Job queue created");

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            // Run on its own task so a panic is contained to this job
            if let Err(e) = tokio::spawn(job()).await {
                if e.is_panic() {
                    error!(device = %device, "Job panicked");
                }
            }
        }
        debug!(device = %device, "Job worker stopped");
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_same_device_jobs_never_overlap() {
        let serializer = JobSerializer::new();
        let device = DeviceId::new("openflow:1");
        let log = Arc::new(AsyncMutex::new(Vec::new()));

        let mut results = Vec::new();
        for i in 0..3u32 {
            let log = log.clone();
            results.push(serializer.enqueue(&device, move || async move {
                log.lock().await.push(format!("start {}", i));
                tokio::time::sleep(Duration::from_millis(20 - i as u64 * 5)).await;
                log.lock().await.push(format!("end {}", i));
                Ok(i)
            }));
        }

        let values = futures_util::future::join_all(results).await;
        assert_eq!(values, vec![Ok(0), Ok(1), Ok(2)]);
        assert_eq!(
            *log.lock().await,
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn test_failed_and_panicking_jobs_do_not_block_queue() {
        let serializer = JobSerializer::new();
        let device = DeviceId::new("openflow:1");

        let failed = serializer.enqueue(&device, || async {
            Err::<(), _>(PipelineError::Cancelled)
        });
        let panicked = serializer.enqueue(&device, || async {
            if true {
                panic!("job exploded");
            }
            Ok(())
        });
        let after = serializer.enqueue(&device, || async { Ok("still running") });

        assert_eq!(failed.await, Err(PipelineError::Cancelled));
        assert!(matches!(panicked.await, Err(PipelineError::JobAborted { .. })));
        assert_eq!(after.await, Ok("still running"));
    }

    #[tokio::test]
    async fn test_devices_run_in_parallel() {
        let serializer = JobSerializer::new();
        let (tx, rx) = oneshot::channel::<()>();

        // A waits for B; this only completes if they are not serialized together
        let a = serializer.enqueue(&DeviceId::new("a"), move || async move {
            rx.await.map_err(|_| PipelineError::Cancelled)
        });
        let b = serializer.enqueue(&DeviceId::new("b"), move || async move {
            let _ = tx.send(());
            Ok(())
        });

        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(a, b) })
            .await
            .unwrap();
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));
        assert_eq!(serializer.device_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_device_runs_queued_jobs_then_recreates() {
        let serializer = JobSerializer::new();
        let device = DeviceId::new("openflow:1");

        let queued = serializer.enqueue(&device, || async { Ok(1) });
        assert!(serializer.remove_device(&device));
        assert!(!serializer.remove_device(&device));
        assert_eq!(queued.await, Ok(1));

        let fresh = serializer.enqueue(&device, || async { Ok(2) });
        assert_eq!(fresh.await, Ok(2));
        assert_eq!(serializer.device_count(), 1);
    }
}
