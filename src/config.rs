//! Command-line / environment configuration shared by the `serve` and `worker` commands.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use reqwest::Url;
use tracing::{info, warn};

use crate::notifier::Notifier;
use crate::queue::{JobQueue, MemoryQueue, RedisQueue};
use crate::rate_limit::ApiRateLimit;
use crate::scanner::ProcessScanner;
use crate::worker::Worker;

#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    /// Redis URL for a queue shared between processes. In-memory queue when omitted.
    #[arg(long = "redis-url", env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key prefix for all queue data in Redis.
    #[arg(long = "queue-prefix", env = "SCAN_QUEUE_PREFIX", default_value = "scan-queue")]
    pub prefix: String,
}

impl QueueArgs {
    pub async fn open(&self) -> Result<Arc<dyn JobQueue>> {
        match self.redis_url.as_deref() {
            Some(url) => {
                let queue = RedisQueue::connect(url, self.prefix.clone())
                    .await
                    .context("failed to connect to redis job queue")?;
                Ok(Arc::new(queue))
            }
            None => {
                info!("using in-memory job queue");
                Ok(Arc::new(MemoryQueue::new()))
            }
        }
    }

    pub fn is_shared(&self) -> bool {
        self.redis_url.is_some()
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Number of concurrent workers.
    #[arg(long, env = "SCAN_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Scanner executable, invoked as `<scanner> [scanner-arg..] <target> <mode>`.
    #[arg(long, env = "SCANNER_PROGRAM", default_value = "scanner")]
    pub scanner: PathBuf,

    /// Extra leading scanner arguments (e.g. the script path when the scanner is an interpreter).
    #[arg(long = "scanner-arg", env = "SCANNER_ARGS", value_delimiter = ',')]
    pub scanner_args: Vec<String>,

    /// Kill scans running longer than this. No limit by default.
    #[arg(long = "scan-timeout-secs", env = "SCAN_TIMEOUT_SECS")]
    pub scan_timeout_secs: Option<u64>,

    /// Longest an idle worker waits before polling the queue again.
    #[arg(long = "idle-poll-ms", env = "SCAN_IDLE_POLL_MS", default_value_t = 1000)]
    pub idle_poll_ms: u64,

    /// Incoming-webhook URL for completion notices.
    #[arg(long = "notify-webhook", env = "NOTIFY_WEBHOOK_URL")]
    pub notify_webhook: Option<String>,
}

impl WorkerArgs {
    pub fn scanner(&self) -> ProcessScanner {
        ProcessScanner::new(&self.scanner)
            .with_args(&self.scanner_args)
            .with_timeout(self.scan_timeout_secs.map(Duration::from_secs))
    }

    pub fn notifier(&self) -> Result<Notifier> {
        let webhook = self
            .notify_webhook
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Url::parse(s).with_context(|| format!("invalid notify webhook URL: {s}")))
            .transpose()?;
        if webhook.is_none() {
            info!("completion notices disabled (no webhook configured)");
        }
        Ok(Notifier::new(webhook))
    }

    pub fn worker(&self, queue: Arc<dyn JobQueue>) -> Result<Worker> {
        if self.scan_timeout_secs.is_none() {
            warn!("no scan timeout configured; a hung scanner keeps its job active");
        }
        Ok(Worker::new(queue, Arc::new(self.scanner()), self.notifier()?)
            .with_idle_poll(Duration::from_millis(self.idle_poll_ms.max(1))))
    }
}

#[derive(Debug, Clone, Args)]
pub struct HttpArgs {
    /// Address the HTTP API binds to.
    #[arg(long, env = "SCAN_BIND", default_value = "0.0.0.0:5000")]
    pub bind: String,

    /// Browser origins allowed to call the API.
    #[arg(
        long = "cors-origin",
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = [
            String::from("http://localhost:3000"),
            String::from("http://localhost:5173"),
            String::from("http://127.0.0.1:3000"),
        ]
    )]
    pub cors_origins: Vec<String>,

    /// Requests each client IP may make to `/api` per window. 0 turns limiting off.
    #[arg(long = "rate-limit-max", env = "SCAN_RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u32,

    /// Rate-limit window length.
    #[arg(long = "rate-limit-window-secs", env = "SCAN_RATE_LIMIT_WINDOW_SECS", default_value_t = 900)]
    pub rate_limit_window_secs: u64,
}

impl HttpArgs {
    pub fn rate_limit(&self) -> Option<ApiRateLimit> {
        let limit = ApiRateLimit::per_window(self.rate_limit_max, Duration::from_secs(self.rate_limit_window_secs));
        match limit {
            Some(_) => info!(
                max = self.rate_limit_max,
                window_secs = self.rate_limit_window_secs,
                "API rate limiting enabled"
            ),
            None => warn!("API rate limiting disabled"),
        }
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        workers: WorkerArgs,
        #[command(flatten)]
        http: HttpArgs,
    }

    #[test]
    fn defaults() {
        let cli = TestCli::try_parse_from(["scan-jobs-rs"]).unwrap();
        assert_eq!(cli.queue.prefix, "scan-queue");
        assert_eq!(cli.workers.workers, 1);
        assert_eq!(cli.workers.scan_timeout_secs, None);
        assert_eq!(cli.http.bind, "0.0.0.0:5000");
        assert_eq!(cli.http.cors_origins.len(), 3);
        assert_eq!(cli.http.rate_limit_max, 100);
        assert_eq!(cli.http.rate_limit_window_secs, 900);
        assert!(cli.http.rate_limit().is_some());
    }

    #[test]
    fn zero_rate_limit_turns_it_off() {
        let cli = TestCli::try_parse_from(["scan-jobs-rs", "--rate-limit-max", "0"]).unwrap();
        assert!(cli.http.rate_limit().is_none());
    }

    #[test]
    fn scanner_and_worker_flags() {
        let cli = TestCli::try_parse_from([
            "scan-jobs-rs",
            "--scanner",
            "/opt/engine/venv/bin/python3",
            "--scanner-arg",
            "/opt/engine/scanner.py",
            "--workers",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.workers.scanner_args, vec!["/opt/engine/scanner.py"]);
        assert_eq!(cli.workers.workers, 4);
    }

    #[test]
    fn bad_webhook_is_rejected() {
        let cli = TestCli::try_parse_from(["scan-jobs-rs", "--notify-webhook", "not a url"]).unwrap();
        assert!(cli.workers.notifier().is_err());
        let cli = TestCli::try_parse_from(["scan-jobs-rs", "--notify-webhook", "https://hooks.example.com/T0/B0"])
            .unwrap();
        assert!(cli.workers.notifier().unwrap().is_enabled());
    }
}
