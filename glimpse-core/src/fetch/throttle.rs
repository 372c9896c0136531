use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Returned when a throttle wait is abandoned because its cancellation token
/// fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("throttle wait cancelled")]
pub struct ThrottleCancelled;

/// Bounded pool of fetch permits shared by every request of one cache.
#[derive(Clone, Debug)]
pub struct Throttler {
    permits: Arc<Semaphore>,
    size: usize,
}

/// One held fetch slot; released when dropped.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl Throttler {
    /// Pool with `size` permits (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool sized to the host's logical CPU count.
    pub fn per_cpu() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free permit, giving up as soon as `cancel` fires. A token
    /// that is already cancelled fails even when permits are free.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ThrottlePermit, ThrottleCancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("throttle wait cancelled");
                Err(ThrottleCancelled)
            }
            permit = Arc::clone(&self.permits).acquire_owned() => {
                // The semaphore is never closed; treat closure like a cancel.
                permit
                    .map(|permit| ThrottlePermit { _permit: permit })
                    .map_err(|_| ThrottleCancelled)
            }
        }
    }
}
