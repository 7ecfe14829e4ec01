use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

use crate::{models::TaskStatus, Result};

use super::{resolve_ttl, TaskStatusStore};

#[derive(Debug, Clone)]
struct Entry {
    status: TaskStatus,
    expires_at: Instant,
}

/// Minimum time between opportunistic sweeps on write.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_sweep: Option<Instant>,
}

impl State {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.next_sweep = Some(now + SWEEP_INTERVAL);
        before - self.entries.len()
    }
}

/// In-process status store with lazy expiry.
///
/// Expired records are dropped when next read, by a sweep that runs on write
/// at most once per minute, or in bulk by [`purge_expired`](Self::purge_expired).
/// Uses tokio's clock, so paused-time tests can step past a TTL without
/// sleeping. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.inner.lock().await.purge(Instant::now())
    }

    /// Remaining lifetime of a live record.
    pub async fn ttl(&self, job_id: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.inner.lock().await;
        state
            .entries
            .get(job_id)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of stored records, including ones expired but not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }
}

#[async_trait]
impl TaskStatusStore for MemoryStatusStore {
    async fn set_status(
        &self,
        job_id: &str,
        mut status: TaskStatus,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let ttl = resolve_ttl(ttl_seconds, &status);
        status.ttl_seconds = ttl;
        trace!(job_id, ttl, state = ?status.status, "Writing status");
        let now = Instant::now();
        let mut state = self.inner.lock().await;
        if state.next_sweep.map_or(true, |at| now >= at) {
            let dropped = state.purge(now);
            if dropped > 0 {
                trace!(dropped, "Swept expired statuses");
            }
        }
        state.entries.insert(
            job_id.to_string(),
            Entry {
                status,
                expires_at: now + Duration::from_secs(ttl),
            },
        );
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<TaskStatus>> {
        let mut state = self.inner.lock().await;
        let expired = match state.entries.get(job_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.status.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(job_id);
        }
        Ok(None)
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        self.inner.lock().await.entries.remove(job_id);
        Ok(())
    }
}
