//! Progress reporting hooks for batch runs.

use std::{future::Future, marker::PhantomData};

use async_trait::async_trait;

use crate::{models::Progress, Result};

/// Receives one notification per completed item.
///
/// An error returned from [`on_progress`](Self::on_progress) aborts the batch;
/// the job driver uses this to stop work when the status store is unreachable.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_progress(&self, progress: Progress) -> Result<()>;
}

/// Observer that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

#[async_trait]
impl ProgressObserver for SilentProgress {
    async fn on_progress(&self, _progress: Progress) -> Result<()> {
        Ok(())
    }
}

/// Simple wrapper to build a [`ProgressObserver`] from an async closure.
///
/// ```rust,ignore
/// let observer = LambdaProgress::new(|p: Progress| async move {
///     println!("{}/{} ({}%)", p.current, p.total, p.percentage);
///     Ok(())
/// });
/// ```
pub struct LambdaProgress<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> LambdaProgress<F, Fut>
where
    F: Fn(Progress) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ProgressObserver for LambdaProgress<F, Fut>
where
    F: Fn(Progress) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_progress(&self, progress: Progress) -> Result<()> {
        (self.func)(progress).await
    }
}
