use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ScannerError;
use crate::notifier::Notifier;
use crate::queue::JobQueue;
use crate::scanner::Scanner;
use crate::types::{Job, JobStatus};

/// Everything a worker needs; cloned into each worker task.
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    scanner: Arc<dyn Scanner>,
    notifier: Notifier,
    idle_poll: Duration,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, scanner: Arc<dyn Scanner>, notifier: Notifier) -> Self {
        Self { queue, scanner, notifier, idle_poll: Duration::from_secs(1) }
    }

    /// Upper bound on how long an idle worker sleeps before re-checking the queue.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Claim and process jobs until `cancel` fires. A claimed job always runs to
    /// resolution before cancellation is observed.
    pub async fn run(self, worker_no: usize, cancel: CancellationToken) {
        info!(worker = worker_no, "worker listening for jobs");
        while !cancel.is_cancelled() {
            match self.queue.claim().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(worker = worker_no, error = %e, "failed to claim job"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.wait_for_work(self.idle_poll) => {}
            }
        }
        info!(worker = worker_no, "worker stopped");
    }

    /// Execute one claimed job and record its outcome. Returns the outcome the
    /// worker tried to record; failures to store it are logged, not returned.
    pub async fn process(&self, job: Job) -> JobStatus {
        let Job { id, request, .. } = job;
        info!(job_id = %id, target = %request.target, mode = %request.mode, "processing job");

        match self.scanner.invoke(&request).await {
            Ok(report) => {
                let outcome = self.queue.complete(id, report.clone()).await;
                match outcome {
                    Ok(()) => {
                        info!(job_id = %id, open_ports = report.open_port_count(), "job completed");
                        self.notifier.spawn_notify(id, request, report.clone());
                    }
                    Err(e) => error!(job_id = %id, error = %e, "failed to record job result"),
                }
                JobStatus::Completed(report)
            }
            Err(err) => {
                log_scanner_failure(&id.to_string(), &err);
                let message = err.to_string();
                if let Err(e) = self.queue.fail(id, message.clone()).await {
                    error!(job_id = %id, error = %e, "failed to record job failure");
                }
                JobStatus::Failed(message)
            }
        }
    }
}

fn log_scanner_failure(job_id: &str, err: &ScannerError) {
    match err {
        ScannerError::ProcessFailed { code, stderr } => {
            error!(job_id, exit_code = ?code, stderr = %stderr, "scanner exited unsuccessfully")
        }
        ScannerError::Spawn(e) => error!(job_id, error = %e, "could not start scanner"),
        ScannerError::Malformed(e) => error!(job_id, error = %e, "scanner output is not a JSON report"),
        ScannerError::Reported(msg) => warn!(job_id, error = %msg, "scanner reported failure"),
        ScannerError::TimedOut => error!(job_id, "scanner timed out"),
    }
}

/// A fixed number of workers sharing one queue.
pub struct WorkerPool {
    worker: Worker,
    size: usize,
}

impl WorkerPool {
    pub fn new(worker: Worker, size: usize) -> Self {
        Self { worker, size }
    }

    /// Start every worker on the current runtime. Join the returned set after
    /// cancelling to wait for in-flight scans.
    pub fn spawn(self, cancel: CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker_no in 0..self.size {
            set.spawn(self.worker.clone().run(worker_no, cancel.clone()));
        }
        set
    }
}
