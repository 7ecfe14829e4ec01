//! Per-batch concurrency cap.

use std::{future::Future, sync::Arc};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    error::{BatchError, Result},
    request::MAX_CONCURRENT_TASKS,
};

/// Bounded counting permit set.
///
/// The capacity is fixed at construction; build a new limiter for each batch
/// rather than resizing one. Clones share the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` permits (1..=20).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_CONCURRENT_TASKS {
            return Err(BatchError::Validation(format!(
                "concurrency must be between 1 and {MAX_CONCURRENT_TASKS}, got {capacity}"
            )));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. It is released when the returned guard drops.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition cannot fail.
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("limiter semaphore is never closed"),
        }
    }

    /// Run `work` while holding a permit.
    ///
    /// The permit is released on every exit path, including panics and the
    /// future being dropped mid-flight.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        work.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn rejects_invalid_capacity() {
        assert!(ConcurrencyLimiter::new(0).is_err());
        assert!(ConcurrencyLimiter::new(21).is_err());
        assert_eq!(ConcurrencyLimiter::new(20).unwrap().capacity(), 20);
    }

    #[tokio::test]
    async fn caps_concurrent_holders() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn releases_permit_when_work_panics() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let inner = limiter.clone();
        let result = tokio::spawn(async move {
            inner
                .run(async {
                    panic!("item blew up");
                })
                .await
        })
        .await;

        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);
    }
}
