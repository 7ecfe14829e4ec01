//! Bounded fan-out/fan-in over item generations.
//!
//! `BatchOrchestrator` launches one task per requested record, gates them with
//! a freshly sized [`ConcurrencyLimiter`], and collects records as they finish.
//! Item failures arrive as sentinel records and count like any other
//! completion. Only a wrong final count, a cancellation, or a failing progress
//! observer ends the batch early.

use std::sync::Arc;

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    client::GenerationClient,
    error::{BatchError, Result},
    item::ItemGenerator,
    limiter::ConcurrencyLimiter,
    models::{GenerationResult, ItemFailure, Progress},
    request::GenerationRequest,
};

use super::metrics::BatchMetrics;
use super::progress::ProgressObserver;

/// Drives one batch of item generations against an injected client.
///
/// The orchestrator holds no per-batch state: every call to
/// [`run`](Self::run) builds its own limiter and item generator.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = BatchOrchestrator::new(Arc::new(client));
/// let records = orchestrator.run(&request, &SilentProgress).await?;
/// assert_eq!(records.len(), request.count());
/// ```
#[derive(Clone)]
pub struct BatchOrchestrator {
    client: Arc<dyn GenerationClient>,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    /// Generate `request.count()` records, reporting after every completion.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<GenerationResult>> {
        self.run_with_cancel(request, observer, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops awaiting items once `cancel` fires.
    ///
    /// Outstanding item tasks are aborted; calls already sent to the service
    /// may still complete upstream, but their records are discarded.
    #[instrument(
        skip_all,
        fields(count = request.count(), concurrency = request.concurrent_tasks())
    )]
    pub async fn run_with_cancel(
        &self,
        request: &GenerationRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<GenerationResult>> {
        let total = request.count();
        let limiter = ConcurrencyLimiter::new(request.concurrent_tasks())?;
        let generator = ItemGenerator::new(self.client.clone(), request);

        let mut guard = AbortOnDrop(Vec::with_capacity(total));
        let mut pending = FuturesUnordered::new();
        for index in 0..total {
            let generator = generator.clone();
            let limiter = limiter.clone();
            let handle = tokio::spawn(async move { generator.generate(index, &limiter).await });
            guard.0.push(handle.abort_handle());
            pending.push(handle.map(move |joined| (index, joined)));
        }
        debug!(total, "Spawned item tasks");

        let mut results = Vec::with_capacity(total);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(completed = results.len(), total, "Batch cancelled");
                    return Err(BatchError::Cancelled {
                        completed: results.len(),
                        total,
                    });
                }
                next = pending.next() => next,
            };

            let Some((index, joined)) = next else {
                break;
            };

            let record = match joined {
                Ok(record) => record,
                Err(err) => {
                    warn!(item = index + 1, error = %err, "Item task did not finish");
                    GenerationResult::sentinel(
                        generator.schema(),
                        index,
                        ItemFailure::Aborted,
                        format!("error: item task failed: {err}"),
                    )
                }
            };
            results.push(record);

            observer
                .on_progress(Progress::new(results.len(), total))
                .await?;
        }

        if results.len() != total {
            return Err(BatchError::CountMismatch {
                expected: total,
                actual: results.len(),
            });
        }

        let metrics = BatchMetrics::from_results(&results);
        info!(
            succeeded = metrics.succeeded,
            sentinels = metrics.sentinels(),
            "Batch finished"
        );
        Ok(results)
    }
}

/// Aborts every spawned item task when the batch ends, however it ends.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
