//! Job storage and the claim/resolve protocol shared by intake, status and workers.
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::{Job, JobId, ScanReport, ScanRequest};

mod memory;
mod redis_queue;

pub use self::memory::MemoryQueue;
pub use self::redis_queue::RedisQueue;

pub type QueueResult<T> = Result<T, QueueError>;

/// Single source of truth for job state.
///
/// Implementations must make `claim` atomic across every caller sharing the
/// backing store, and must reject `complete`/`fail` on anything but an
/// `active` job so terminal states never change.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store a new `queued` job and return its id.
    async fn enqueue(&self, request: ScanRequest) -> QueueResult<JobId>;

    /// Take the oldest `queued` job, moving it to `active`. `None` when idle.
    async fn claim(&self) -> QueueResult<Option<Job>>;

    async fn complete(&self, id: JobId, result: ScanReport) -> QueueResult<()>;

    async fn fail(&self, id: JobId, error: String) -> QueueResult<()>;

    /// Read-only lookup. `Ok(None)` for unknown ids.
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Park an idle worker until work may be available or `max_wait` elapses.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
