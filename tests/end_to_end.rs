//! Full path: HTTP submit → worker pool → external scanner process → HTTP poll.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use scan_jobs_rs::notifier::Notifier;
use scan_jobs_rs::queue::{JobQueue, MemoryQueue};
use scan_jobs_rs::scanner::ProcessScanner;
use scan_jobs_rs::server;
use scan_jobs_rs::worker::{Worker, WorkerPool};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Fake scanner keyed on the target address.
const FAKE_SCANNER: &str = r#"
case "$1" in
  8.8.8.8)
    sleep 0.1
    printf '{"status":"up","hostnames":[{"name":"dns.google","type":"PTR"}],"open_ports":[{"port":53,"service":"domain"}]}'
    ;;
  10.0.0.1)
    printf '{"status":"down"}'
    ;;
  192.0.2.1)
    echo 'scanner crashed' >&2
    exit 1
    ;;
  192.0.2.2)
    echo 'Starting Nmap 7.94 ( https://nmap.org )'
    ;;
  192.0.2.3)
    printf '{"error":"Nmap Error: host resolution failed"}'
    ;;
esac
"#;

struct Harness {
    app: Router,
    cancel: CancellationToken,
    pool: JoinSet<()>,
}

impl Harness {
    fn start(workers: usize) -> Self {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new());
        let scanner = ProcessScanner::new("sh").with_args(["-c", FAKE_SCANNER, "scanner"]);
        let worker = Worker::new(queue.clone(), Arc::new(scanner), Notifier::disabled())
            .with_idle_poll(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(worker, workers).spawn(cancel.clone());
        let app = server::router(queue, &[], None).unwrap();
        Self { app, cancel, pool }
    }

    async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn submit(&self, target: &str, mode: &str) -> String {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/scan")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"target": target, "scanType": mode}).to_string()))
            .unwrap();
        let (status, body) = self.call(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        body["jobId"].as_str().unwrap().to_string()
    }

    async fn poll(&self, id: &str) -> Value {
        let (status, body) = self
            .call(Request::builder().uri(format!("/api/scan/{id}")).body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    async fn wait_terminal(&self, id: &str) -> Value {
        for _ in 0..500 {
            let body = self.poll(id).await;
            match body["status"].as_str() {
                Some("completed") | Some("failed") => return body,
                Some("active") => tokio::time::sleep(Duration::from_millis(20)).await,
                other => panic!("unexpected status {other:?}"),
            }
        }
        panic!("job {id} never finished");
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        while self.pool.join_next().await.is_some() {}
    }
}

#[tokio::test]
async fn reachable_host_completes_with_scanner_report() {
    let h = Harness::start(1);
    let id = h.submit("8.8.8.8", "quick").await;
    assert_eq!(h.wait_terminal(&id).await, json!({
        "status": "completed",
        "result": {
            "status": "up",
            "hostnames": [{"name": "dns.google", "type": "PTR"}],
            "open_ports": [{"port": 53, "service": "domain"}]
        }
    }));
    h.stop().await;
}

#[tokio::test]
async fn scanner_exit_failure_fails_job() {
    let h = Harness::start(1);
    let id = h.submit("192.0.2.1", "quick").await;
    assert_eq!(h.wait_terminal(&id).await, json!({"status":"failed","error":"scanner process failed"}));
    h.stop().await;
}

#[tokio::test]
async fn non_json_output_fails_job() {
    let h = Harness::start(1);
    let id = h.submit("192.0.2.2", "full").await;
    assert_eq!(h.wait_terminal(&id).await, json!({"status":"failed","error":"failed to process scan results"}));
    h.stop().await;
}

#[tokio::test]
async fn embedded_error_is_surfaced() {
    let h = Harness::start(1);
    let id = h.submit("192.0.2.3", "quick").await;
    assert_eq!(
        h.wait_terminal(&id).await,
        json!({"status":"failed","error":"Nmap Error: host resolution failed"})
    );
    h.stop().await;
}

#[tokio::test]
async fn unreachable_host_completes_as_down() {
    let h = Harness::start(1);
    let id = h.submit("10.0.0.1", "full").await;
    let body = h.wait_terminal(&id).await;
    assert_eq!(body, json!({"status":"completed","result":{"status":"down"}}));
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_bad_job_does_not_stop_the_pool() {
    let h = Harness::start(3);
    let mut ids = Vec::new();
    for target in ["192.0.2.1", "8.8.8.8", "192.0.2.2", "10.0.0.1", "8.8.8.8"] {
        ids.push((target, h.submit(target, "quick").await));
    }
    for (target, id) in &ids {
        let body = h.wait_terminal(id).await;
        let expected = match *target {
            "8.8.8.8" | "10.0.0.1" => "completed",
            _ => "failed",
        };
        assert_eq!(body["status"], expected, "{target}");
    }
    h.stop().await;
}
