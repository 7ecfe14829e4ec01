use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::{debug, info};

use crate::{models::TaskStatus, Result};

use super::{resolve_ttl, TaskStatusStore};

/// Redis-backed status store.
///
/// Each job lives under `task:{job_id}` as a JSON string written with `SET EX`,
/// so Redis' own expiry enforces the TTL and every write restarts it.
#[derive(Clone)]
pub struct RedisStatusStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStatusStore {
    /// Connect to `url` (for example `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %sanitize_url(url), "Connecting status store to Redis");
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: "task:".to_string(),
        })
    }

    /// Use a key prefix other than `task:`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, job_id: &str) -> String {
        format!("{}{}", self.prefix, job_id)
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStatusStore for RedisStatusStore {
    async fn set_status(
        &self,
        job_id: &str,
        mut status: TaskStatus,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let ttl = resolve_ttl(ttl_seconds, &status);
        status.ttl_seconds = ttl;
        let payload = serde_json::to_string(&status)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(self.key(job_id), payload, ttl).await?;
        debug!(job_id, ttl, "Status written to Redis");
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<TaskStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(job_id)).await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(job_id)).await?;
        Ok(())
    }
}

/// Hide credentials embedded in a Redis URL before logging it.
fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
