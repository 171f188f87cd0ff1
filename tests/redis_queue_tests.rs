//! Runs against a live Redis only when `SCAN_JOBS_TEST_REDIS_URL` is set.
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use scan_jobs_rs::error::QueueError;
use scan_jobs_rs::queue::{JobQueue, RedisQueue};
use scan_jobs_rs::types::{JobId, JobStatus, ScanMode, ScanReport, ScanRequest};

async fn queue() -> Option<RedisQueue> {
    let url = std::env::var("SCAN_JOBS_TEST_REDIS_URL").ok()?;
    // Fresh prefix per test so runs never see each other's jobs.
    let prefix = format!("scan-jobs-test:{}", JobId::new());
    Some(RedisQueue::connect(&url, prefix).await.expect("redis reachable"))
}

fn req(last: u8) -> ScanRequest {
    ScanRequest { target: Ipv4Addr::new(10, 1, 0, last), mode: ScanMode::Full }
}

#[tokio::test]
async fn lifecycle_round_trip() {
    let Some(q) = queue().await else { return };
    let id = q.enqueue(req(1)).await.unwrap();
    let job = q.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.request, req(1));

    let claimed = q.claim().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, JobStatus::Active);
    assert!(q.claim().await.unwrap().is_none());

    let report = ScanReport::from_json(br#"{"status":"up","open_ports":[{"port":80,"service":"http"}]}"#).unwrap();
    q.complete(id, report.clone()).await.unwrap();
    assert_eq!(q.get(id).await.unwrap().unwrap().status, JobStatus::Completed(report));

    let err = q.fail(id, "late".into()).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { from: "completed", .. }));
    assert!(q.get(JobId::new()).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_claimers_split_the_queue() {
    let Some(q) = queue().await else { return };
    let mut ids = HashSet::new();
    for i in 0..50u8 {
        ids.insert(q.enqueue(req(i)).await.unwrap());
    }

    let q = Arc::new(q);
    let mut handles = Vec::new();
    for _ in 0..5 {
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
    assert_eq!(claimed.into_iter().collect::<HashSet<_>>(), ids);
}
