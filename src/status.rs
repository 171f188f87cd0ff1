//! Read-only view of a job for pollers.
use serde::Serialize;

use crate::error::QueueError;
use crate::queue::JobQueue;
use crate::types::{JobId, JobStatus, ScanReport};

/// Poll response. Pending jobs carry only their state; terminal jobs carry
/// their result or error and never change afterwards.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusView {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusView {
    pub fn from_status(status: JobStatus) -> Self {
        let label = status.label();
        let (result, error) = match status {
            JobStatus::Completed(report) => (Some(report), None),
            JobStatus::Failed(message) => (None, Some(message)),
            JobStatus::Queued | JobStatus::Active => (None, None),
        };
        Self { status: label, result, error }
    }

    /// HTTP rendering: callers only distinguish "still running" from terminal,
    /// so a job waiting for a worker is reported as `active` too.
    pub fn for_wire(mut self) -> Self {
        if self.status == "queued" {
            self.status = "active";
        }
        self
    }
}

/// `Ok(None)` when the id was never issued.
pub async fn get_status(queue: &dyn JobQueue, id: JobId) -> Result<Option<StatusView>, QueueError> {
    Ok(queue.get(id).await?.map(|job| StatusView::from_status(job.status)))
}
