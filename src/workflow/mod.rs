//! Batch orchestration primitives.
//!
//! # Core Concepts
//!
//! - **BatchOrchestrator**: fans out one item generation per requested record
//!   behind a per-batch concurrency limiter and collects them in completion order
//! - **ProgressObserver**: receives one update per completed item
//! - **BatchMetrics**: success and sentinel tallies for a finished batch
//!
//! # Example
//!
//! ```rust,ignore
//! use structured_batch::workflow::{BatchOrchestrator, LambdaProgress};
//!
//! let orchestrator = BatchOrchestrator::new(client);
//! let observer = LambdaProgress::new(|p| async move {
//!     println!("{}/{}", p.current, p.total);
//!     Ok(())
//! });
//! let records = orchestrator.run(&request, &observer).await?;
//! ```

mod batch;
mod metrics;
mod progress;

pub use batch::BatchOrchestrator;
pub use metrics::BatchMetrics;
pub use progress::{LambdaProgress, ProgressObserver, SilentProgress};
