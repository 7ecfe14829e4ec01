//! Job status persistence.
//!
//! A [`TaskStatusStore`] keeps one [`TaskStatus`] per job id and forgets it
//! `ttl_seconds` after the last write. The progress, error and cancellation
//! helpers are read-modify-write over [`get_status`](TaskStatusStore::get_status)
//! and [`set_status`](TaskStatusStore::set_status); they are only safe with a
//! single writer per job, which the job driver guarantees.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStatusStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStatusStore;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    models::{Progress, TaskState, TaskStatus},
    request::{DEFAULT_TASK_EXPIRE_SECS, MAX_TASK_EXPIRE_SECS, MIN_TASK_EXPIRE_SECS},
    Result,
};

/// Resolve the expiry for a write.
///
/// An explicit value wins, then the status' own `ttl_seconds`, then the
/// default. The result is always clamped into the accepted window.
pub fn resolve_ttl(explicit: Option<u64>, status: &TaskStatus) -> u64 {
    explicit
        .or(Some(status.ttl_seconds).filter(|ttl| *ttl > 0))
        .unwrap_or(DEFAULT_TASK_EXPIRE_SECS)
        .clamp(MIN_TASK_EXPIRE_SECS, MAX_TASK_EXPIRE_SECS)
}

/// Key/value store with per-key expiry holding job lifecycle state.
#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    /// Overwrite the record for `job_id` and restart its expiry window.
    async fn set_status(&self, job_id: &str, status: TaskStatus, ttl_seconds: Option<u64>)
        -> Result<()>;

    /// Fetch the record, or `None` if it never existed or has expired.
    async fn get_status(&self, job_id: &str) -> Result<Option<TaskStatus>>;

    /// Remove the record immediately.
    async fn delete(&self, job_id: &str) -> Result<()>;

    /// Replace only the progress of a running job.
    ///
    /// Absent or terminal jobs are left untouched, as are updates that would
    /// move `current` backwards.
    async fn update_progress(&self, job_id: &str, current: usize, total: usize) -> Result<()> {
        let Some(mut status) = self.get_status(job_id).await? else {
            debug!(job_id, "Progress update for unknown job ignored");
            return Ok(());
        };
        if status.is_terminal() || current < status.progress.current {
            return Ok(());
        }
        status.progress = Progress::new(current, total);
        self.set_status(job_id, status, None).await
    }

    /// Move a job to `error` with `message`.
    async fn set_error(&self, job_id: &str, message: &str) -> Result<()> {
        transition(self, job_id, TaskState::Error, |status| status.failed(message)).await
    }

    /// Move a job to `cancelled`.
    async fn set_cancelled(&self, job_id: &str) -> Result<()> {
        transition(self, job_id, TaskState::Cancelled, TaskStatus::cancelled).await
    }

    /// Move a job to `completed`, pointing at its artifact.
    async fn set_completed(&self, job_id: &str, output_ref: &str) -> Result<()> {
        transition(self, job_id, TaskState::Completed, |status| {
            status.completed(output_ref)
        })
        .await
    }
}

/// Read-modify-write into `next`, unless the job is absent or the lifecycle forbids it.
async fn transition<S, F>(store: &S, job_id: &str, next: TaskState, apply: F) -> Result<()>
where
    S: TaskStatusStore + ?Sized,
    F: FnOnce(TaskStatus) -> TaskStatus + Send,
{
    let Some(status) = store.get_status(job_id).await? else {
        debug!(job_id, ?next, "Transition for unknown job ignored");
        return Ok(());
    };
    if !status.status.can_transition_to(next) {
        debug!(job_id, from = ?status.status, to = ?next, "Transition rejected");
        return Ok(());
    }
    store.set_status(job_id, apply(status), None).await
}
