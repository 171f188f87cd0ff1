use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{JobQueue, QueueResult};
use crate::error::QueueError;
use crate::types::{Job, JobId, JobStatus, ScanReport, ScanRequest};

/// In-process queue. Safe for any number of worker tasks in one process.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    work: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    pending: VecDeque<JobId>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn resolve(&self, id: JobId, status: JobStatus) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Active {
            return Err(QueueError::InvalidTransition { id, from: job.status.label() });
        }
        job.status = status;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, request: ScanRequest) -> QueueResult<JobId> {
        let job = Job::queued(request);
        let id = job.id;
        {
            let mut inner = self.inner.lock().await;
            inner.jobs.insert(id, job);
            inner.pending.push_back(id);
        }
        self.work.notify_one();
        Ok(id)
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.pending.pop_front() {
            if let Some(job) = inner.jobs.get_mut(&id) {
                if job.status == JobStatus::Queued {
                    job.status = JobStatus::Active;
                    return Ok(Some(job.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn complete(&self, id: JobId, result: ScanReport) -> QueueResult<()> {
        self.resolve(id, JobStatus::Completed(result)).await
    }

    async fn fail(&self, id: JobId, error: String) -> QueueResult<()> {
        self.resolve(id, JobStatus::Failed(error)).await
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.work.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanMode;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn req(last: u8) -> ScanRequest {
        ScanRequest { target: Ipv4Addr::new(10, 0, 0, last), mode: ScanMode::Quick }
    }

    #[tokio::test]
    async fn enqueue_then_get_is_queued() {
        let q = MemoryQueue::new();
        let id = q.enqueue(req(1)).await.unwrap();
        let job = q.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.request, req(1));
        assert!(q.get(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_fifo_and_marks_active() {
        let q = MemoryQueue::new();
        let a = q.enqueue(req(1)).await.unwrap();
        let b = q.enqueue(req(2)).await.unwrap();
        let first = q.claim().await.unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(first.status, JobStatus::Active);
        assert_eq!(q.get(a).await.unwrap().unwrap().status, JobStatus::Active);
        assert_eq!(q.claim().await.unwrap().unwrap().id, b);
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_requires_active() {
        let q = MemoryQueue::new();
        let id = q.enqueue(req(1)).await.unwrap();
        let err = q.complete(id, ScanReport::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { from: "queued", .. }));

        q.claim().await.unwrap();
        q.fail(id, "scanner process failed".into()).await.unwrap();
        let err = q.complete(id, ScanReport::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { from: "failed", .. }));
        assert_eq!(
            q.get(id).await.unwrap().unwrap().status,
            JobStatus::Failed("scanner process failed".into())
        );

        let err = q.fail(JobId::new(), "x".into()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_job() {
        let q = Arc::new(MemoryQueue::new());
        let mut ids = HashSet::new();
        for i in 0..200u32 {
            ids.insert(q.enqueue(req((i % 250) as u8)).await.unwrap());
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = q.claim().await.unwrap() {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut claimed = Vec::new();
        for h in handles {
            claimed.extend(h.await.unwrap());
        }
        assert_eq!(claimed.len(), ids.len());
        let unique: HashSet<_> = claimed.into_iter().collect();
        assert_eq!(unique, ids);
    }

    #[tokio::test]
    async fn enqueue_wakes_idle_waiter() {
        let q = Arc::new(MemoryQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now();
                q.wait_for_work(Duration::from_secs(30)).await;
                start.elapsed()
            })
        };
        tokio::task::yield_now().await;
        q.enqueue(req(1)).await.unwrap();
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(30));
    }
}
