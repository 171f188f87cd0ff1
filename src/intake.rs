//! Front door for new scans: validate, enqueue, hand back an id. Never waits on a scan.
use std::net::Ipv4Addr;

use tracing::info;

use crate::error::{QueueError, ValidationError};
use crate::queue::JobQueue;
use crate::types::{JobId, ScanMode, ScanRequest};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Turn raw caller input into a [`ScanRequest`].
///
/// The target must be a plain dotted quad (`Ipv4Addr`'s parser already rejects
/// CIDR suffixes, leading zeros and surrounding whitespace). Target is checked
/// before mode so the caller sees the first problem in field order.
pub fn validate(raw_target: Option<&str>, raw_mode: Option<&str>) -> Result<ScanRequest, ValidationError> {
    let target = raw_target.ok_or(ValidationError::Missing("target"))?;
    let target: Ipv4Addr = target.parse().map_err(|_| ValidationError::InvalidTarget)?;
    let mode = raw_mode.ok_or(ValidationError::Missing("scanType"))?;
    let mode: ScanMode = mode.parse().map_err(|_| ValidationError::InvalidMode)?;
    Ok(ScanRequest { target, mode })
}

/// Validate and enqueue. Rejected input never reaches the queue.
pub async fn submit(
    queue: &dyn JobQueue,
    raw_target: Option<&str>,
    raw_mode: Option<&str>,
) -> Result<JobId, SubmitError> {
    let request = validate(raw_target, raw_mode)?;
    let id = queue.enqueue(request).await?;
    info!(job_id = %id, target = %request.target, mode = %request.mode, "job added to queue");
    Ok(id)
}
