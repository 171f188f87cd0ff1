use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::types::{JobId, ScanReport, ScanRequest};

/// Best-effort completion alerts to a chat-style incoming webhook.
///
/// Without a configured URL every call is a silent no-op.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    webhook: Option<Url>,
    client: Client,
    in_flight: Arc<Mutex<JoinSet<()>>>,
}

impl Notifier {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(webhook: Option<Url>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { webhook, client, in_flight: Arc::default() }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    pub async fn notify(&self, job_id: JobId, request: &ScanRequest, report: &ScanReport) -> Result<(), NotifyError> {
        let Some(url) = self.webhook.as_ref() else {
            return Ok(());
        };
        let response = self
            .client
            .post(url.clone())
            .json(&summary_payload(job_id, request, report))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        debug!(job_id = %job_id, "completion notice delivered");
        Ok(())
    }

    /// Fire and forget. Delivery problems end up in the log, never in the job.
    pub fn spawn_notify(&self, job_id: JobId, request: ScanRequest, report: ScanReport) {
        if !self.is_enabled() {
            return;
        }
        let notifier = self.clone();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            if let Err(e) = notifier.notify(job_id, &request, &report).await {
                warn!(job_id = %job_id, error = %e, "failed to deliver completion notice");
            }
        });
    }

    /// Wait up to `grace` for notices still being delivered; whatever is left
    /// afterwards is abandoned with a log line.
    pub async fn flush(&self, grace: Duration) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()));
        if pending.is_empty() {
            return;
        }
        info!(pending = pending.len(), "waiting for completion notices");
        let drained = tokio::time::timeout(grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(dropped = pending.len(), "completion notices abandoned at shutdown");
        }
    }
}

/// Clean when nothing is listening, risky otherwise.
fn risk_color(open_ports: usize) -> &'static str {
    if open_ports == 0 {
        "good"
    } else {
        "danger"
    }
}

fn summary_payload(job_id: JobId, request: &ScanRequest, report: &ScanReport) -> Value {
    let open_ports = report.open_port_count();
    json!({
        "text": format!("Scan finished for {}", request.target),
        "attachments": [
            {
                "color": risk_color(open_ports),
                "fields": [
                    { "title": "Target", "value": request.target.to_string(), "short": true },
                    { "title": "Mode", "value": request.mode.as_str(), "short": true },
                    { "title": "Open Ports", "value": open_ports.to_string(), "short": true },
                    { "title": "Status", "value": report.host_status().unwrap_or("unknown"), "short": true },
                    { "title": "Job", "value": job_id.to_string(), "short": false }
                ]
            }
        ]
    })
}
