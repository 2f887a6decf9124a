//! Process-wide GPU lease.
//!
//! The external synthesis runtime and the capture/OCR collaborator share one
//! GPU. Every GPU-bound operation enters this single-slot lease first so the
//! two never run inference concurrently. Acquisition is scoped: the slot is
//! released when the returned guard drops, on every exit path.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-slot, process-wide mutual exclusion for GPU-bound work.
///
/// Clones share the same slot. Not reentrant: acquiring twice from the same
/// task deadlocks, so hold the guard only across the synthesis call itself.
#[derive(Debug, Clone)]
pub struct GpuLease {
    slot: Option<Arc<Semaphore>>,
}

/// RAII guard for a held lease. Dropping it releases the slot.
#[derive(Debug)]
pub struct GpuLeaseGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

impl GpuLease {
    /// Create a lease with one slot.
    pub fn new() -> Self {
        if cfg!(feature = "no-gpu-lease") {
            return Self::noop();
        }
        Self {
            slot: Some(Arc::new(Semaphore::new(1))),
        }
    }

    /// Create a lease that admits everyone immediately (for tests).
    pub fn noop() -> Self {
        Self { slot: None }
    }

    /// Wait for the slot and hold it until the guard drops.
    pub async fn acquire(&self) -> GpuLeaseGuard {
        match &self.slot {
            Some(slot) => {
                // The semaphore is never closed, so acquire cannot fail.
                let permit = Arc::clone(slot)
                    .acquire_owned()
                    .await
                    .expect("GPU lease semaphore closed");
                GpuLeaseGuard {
                    _permit: Some(permit),
                }
            }
            None => GpuLeaseGuard { _permit: None },
        }
    }

    /// Try to take the slot without waiting.
    pub fn try_acquire(&self) -> Option<GpuLeaseGuard> {
        match &self.slot {
            Some(slot) => Arc::clone(slot)
                .try_acquire_owned()
                .ok()
                .map(|permit| GpuLeaseGuard {
                    _permit: Some(permit),
                }),
            None => Some(GpuLeaseGuard { _permit: None }),
        }
    }
}

impl Default for GpuLease {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test]
    async fn lease_is_exclusive() {
        let lease = GpuLease::new();
        let guard = lease.acquire().await;
        assert!(lease.try_acquire().is_none());
        drop(guard);
        assert!(lease.try_acquire().is_some());
    }

    #[tokio::test]
    async fn clones_share_the_slot() {
        let lease = GpuLease::new();
        let other = lease.clone();
        let guard = lease.acquire().await;
        assert!(other.try_acquire().is_none());
        drop(guard);
        assert!(other.try_acquire().is_some());
    }

    #[tokio::test]
    async fn noop_lease_always_admits() {
        let lease = GpuLease::noop();
        let _a = lease.acquire().await;
        assert!(lease.try_acquire().is_some());
    }

    #[tokio::test]
    async fn released_on_error_paths() {
        let lease = GpuLease::new();
        let result: Result<(), &str> = async {
            let _guard = lease.acquire().await;
            Err("synthesis failed")
        }
        .await;
        assert!(result.is_err());
        assert!(lease.try_acquire().is_some());
    }
}
