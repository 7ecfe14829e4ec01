//! Job lifecycle: submit, poll, retrieve, cancel.
//!
//! [`JobService`] is the surface an HTTP layer would sit on. Each submitted
//! request becomes a detached job driver that owns every status write for its
//! job, from the initial `running` record to exactly one terminal state.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    client::GenerationClient,
    error::{BatchError, Result},
    models::{Progress, TaskState, TaskStatus},
    request::GenerationRequest,
    sink::ResultSink,
    store::TaskStatusStore,
    workflow::{BatchOrchestrator, ProgressObserver},
};

/// Opaque job identifier (a UUID v4 string).
pub type JobId = String;

/// Runs generation jobs in the background and tracks them in a status store.
///
/// Cloning is cheap; clones share the same collaborators and job table.
///
/// # Example
///
/// ```rust,ignore
/// let service = JobService::new(client, Arc::new(MemoryStatusStore::new()), Arc::new(sink));
/// let job_id = service.submit(request).await?;
/// let status = service.wait(&job_id, Duration::from_millis(500)).await?;
/// let path = service.artifact(&job_id).await?;
/// ```
#[derive(Clone)]
pub struct JobService {
    orchestrator: BatchOrchestrator,
    store: Arc<dyn TaskStatusStore>,
    sink: Arc<dyn ResultSink>,
    jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl JobService {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        store: Arc<dyn TaskStatusStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(client),
            store,
            sink,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record the job as `running` and start it in the background.
    ///
    /// Returns as soon as the initial status is stored. Fails only if that
    /// write fails, in which case nothing is spawned.
    #[instrument(skip_all, fields(count = request.count()))]
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobId> {
        let job_id = Uuid::new_v4().to_string();

        let initial = TaskStatus::running(request.count(), request.task_expire())
            .with_progress_interval(request.progress_interval());
        self.store
            .set_status(&job_id, initial, Some(request.task_expire()))
            .await?;

        let token = CancellationToken::new();
        self.jobs.lock().await.insert(job_id.clone(), token.clone());

        let service = self.clone();
        let driver_id = job_id.clone();
        tokio::spawn(async move { service.drive(driver_id, request, token).await });

        info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Current status, or `None` if the job is unknown or its record expired.
    pub async fn status(&self, job_id: &str) -> Result<Option<TaskStatus>> {
        self.store.get_status(job_id).await
    }

    /// Path of a completed job's artifact.
    pub async fn artifact(&self, job_id: &str) -> Result<PathBuf> {
        let status = self
            .store
            .get_status(job_id)
            .await?
            .ok_or_else(|| BatchError::NotFound(format!("job {job_id}")))?;

        if status.status != TaskState::Completed {
            return Err(BatchError::NotFound(format!(
                "job {job_id} has no artifact while {:?}",
                status.status
            )));
        }

        let path = status
            .output_ref
            .map(PathBuf::from)
            .ok_or_else(|| BatchError::NotFound(format!("job {job_id} has no output reference")))?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BatchError::NotFound(format!(
                "artifact {} for job {job_id}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Ask a running job to stop.
    ///
    /// Returns `false` if the job is unknown or already finished. The driver
    /// records the `cancelled` state once in-flight items are torn down.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.lock().await.get(job_id) {
            Some(token) => {
                token.cancel();
                info!(job_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running job.
    pub async fn shutdown(&self) {
        let jobs = self.jobs.lock().await;
        for token in jobs.values() {
            token.cancel();
        }
        if !jobs.is_empty() {
            warn!(jobs = jobs.len(), "Cancelling running jobs on shutdown");
        }
    }

    /// Number of jobs whose drivers are still running.
    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Returns `NotFound` if the record disappears while waiting.
    pub async fn wait(&self, job_id: &str, poll_interval: Duration) -> Result<TaskStatus> {
        loop {
            match self.store.get_status(job_id).await? {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => tokio::time::sleep(poll_interval).await,
                None => return Err(BatchError::NotFound(format!("job {job_id}"))),
            }
        }
    }

    #[instrument(skip(self, request, token))]
    async fn drive(self, job_id: JobId, request: GenerationRequest, token: CancellationToken) {
        let observer = StoreProgress {
            store: self.store.clone(),
            job_id: job_id.clone(),
        };

        let outcome = self
            .orchestrator
            .run_with_cancel(&request, &observer, &token)
            .await;

        let recorded = match outcome {
            Ok(_) if token.is_cancelled() => self.store.set_cancelled(&job_id).await,
            Ok(records) => {
                match self
                    .sink
                    .write(&job_id, request.field_schema(), &records)
                    .await
                {
                    Ok(output_ref) => {
                        info!(output_ref = %output_ref, "Job completed");
                        self.store.set_completed(&job_id, &output_ref).await
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to write artifact");
                        self.store.set_error(&job_id, &err.to_string()).await
                    }
                }
            }
            Err(err) if err.is_cancelled() => {
                info!(reason = %err, "Job cancelled");
                self.store.set_cancelled(&job_id).await
            }
            Err(err) => {
                error!(error = %err, "Job failed");
                self.store.set_error(&job_id, &err.to_string()).await
            }
        };

        if let Err(err) = recorded {
            error!(error = %err, "Failed to record job outcome");
        }
        self.jobs.lock().await.remove(&job_id);
    }
}

/// Forwards batch progress into the status store.
struct StoreProgress {
    store: Arc<dyn TaskStatusStore>,
    job_id: JobId,
}

#[async_trait]
impl ProgressObserver for StoreProgress {
    async fn on_progress(&self, progress: Progress) -> Result<()> {
        self.store
            .update_progress(&self.job_id, progress.current, progress.total)
            .await
    }
}
