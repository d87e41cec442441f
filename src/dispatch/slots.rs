use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Fixed pool of dispatch slots sized by the endpoint's concurrency limit.
/// A worker must hold a slot for the whole handler invocation; the permit is
/// released on drop, so failure paths cannot leak capacity.
#[derive(Clone)]
pub struct DispatchSlots {
    semaphore: Arc<Semaphore>,
    metrics: Arc<SlotMetrics>,
}

impl DispatchSlots {
    pub fn new(limit: u16) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit as usize)),
            metrics: Arc::new(SlotMetrics {
                limit: limit as u64,
                inflight: AtomicU64::new(0),
                throttled: AtomicU64::new(0),
            }),
        }
    }

    /// Waits for a free slot, or returns `None` if shutdown fires first.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Option<DispatchSlot> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.throttled.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    acquired = self.semaphore.clone().acquire_owned() => {
                        acquired.expect("dispatch slot semaphore closed")
                    }
                }
            }
        };

        self.metrics.inflight.fetch_add(1, Ordering::Relaxed);
        Some(DispatchSlot {
            _permit: permit,
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            limit: self.metrics.limit,
            inflight: self.metrics.inflight.load(Ordering::Relaxed),
            throttled: self.metrics.throttled.load(Ordering::Relaxed),
        }
    }
}

pub struct DispatchSlot {
    _permit: OwnedSemaphorePermit,
    metrics: Arc<SlotMetrics>,
}

impl Drop for DispatchSlot {
    fn drop(&mut self) {
        self.metrics.inflight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct SlotMetrics {
    limit: u64,
    inflight: AtomicU64,
    throttled: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotSnapshot {
    pub limit: u64,
    pub inflight: u64,
    pub throttled: u64,
}
