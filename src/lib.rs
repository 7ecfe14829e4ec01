//! Batch generation of structured records from an LLM service.
//!
//! A caller describes the fields every record must carry, how many records to
//! produce, and how many calls may be in flight at once. The crate fans the
//! work out under a per-batch concurrency cap, folds every per-item failure
//! into a placeholder record so the batch always yields exactly `count`
//! records, and tracks job progress in an expiring status store.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use structured_batch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let service = JobService::new(
//!         Arc::new(config.openai_client()?),
//!         config.status_store().await?,
//!         Arc::new(config.sink()),
//!     );
//!
//!     let request = GenerationRequest::builder(
//!         "You write exam questions.",
//!         "Topic: photosynthesis",
//!         vec![
//!             FieldSpec::new("question", "Question"),
//!             FieldSpec::new("answer", "Reference answer"),
//!         ],
//!     )
//!     .count(20)
//!     .concurrent_tasks(4)
//!     .build()?;
//!
//!     let job_id = service.submit(request).await?;
//!     let status = service.wait(&job_id, Duration::from_secs(1)).await?;
//!     println!("{:?}: {:?}", status.status, service.artifact(&job_id).await?);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **`redis`**: Enable the Redis-backed [`store::RedisStatusStore`]

pub mod client;
pub mod config;
pub mod error;
pub mod item;
pub mod limiter;
pub mod models;
pub mod request;
pub mod schema;
pub mod service;
pub mod sink;
pub mod store;
pub mod workflow;

pub use client::{
    GenerationCall, GenerationClient, MockClient, MockHandler, MockRequest, OpenAiClient,
    OpenAiClientBuilder,
};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{BatchError, Result, ResultExt};
pub use item::ItemGenerator;
pub use limiter::ConcurrencyLimiter;
pub use models::{GenerationResult, ItemFailure, Progress, TaskState, TaskStatus};
pub use request::{GenerationRequest, GenerationRequestBuilder, RequestPayload, SamplingParams};
pub use schema::{FieldSchema, FieldSpec};
pub use service::{JobId, JobService};
pub use sink::{JsonFileSink, ResultSink};
#[cfg(feature = "redis")]
pub use store::RedisStatusStore;
pub use store::{MemoryStatusStore, TaskStatusStore};
pub use workflow::{BatchMetrics, BatchOrchestrator, LambdaProgress, ProgressObserver, SilentProgress};

/// Prelude module for convenient imports.
///
/// ```rust
/// use structured_batch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{GenerationClient, MockClient, MockRequest, OpenAiClient};
    pub use crate::config::ServiceConfig;
    pub use crate::error::{BatchError, Result, ResultExt};
    pub use crate::models::{GenerationResult, ItemFailure, Progress, TaskState, TaskStatus};
    pub use crate::request::GenerationRequest;
    pub use crate::schema::{FieldSchema, FieldSpec};
    pub use crate::service::{JobId, JobService};
    pub use crate::sink::{JsonFileSink, ResultSink};
    pub use crate::store::{MemoryStatusStore, TaskStatusStore};
    pub use crate::workflow::{BatchOrchestrator, LambdaProgress, ProgressObserver, SilentProgress};

    pub use serde::{Deserialize, Serialize};
}
