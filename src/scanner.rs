use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use crate::error::ScannerError;
use crate::types::{ScanReport, ScanRequest};

/// Request/response boundary to whatever performs the actual probing.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn invoke(&self, request: &ScanRequest) -> Result<ScanReport, ScannerError>;
}

/// Runs `<program> [args..] <target> <mode>` and reads one JSON document from stdout.
///
/// - Waits for the process to exit and buffers stdout/stderr in full before judging the run.
/// - Non-zero exit → [`ScannerError::ProcessFailed`]; stderr is kept for logs only.
/// - Output that is not a JSON object → [`ScannerError::Malformed`].
/// - A document with a truthy `error` field → [`ScannerError::Reported`].
/// - No timeout unless [`ProcessScanner::with_timeout`] is used; on timeout the child is killed.
#[derive(Debug, Clone)]
pub struct ProcessScanner {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ProcessScanner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), timeout: None }
    }

    /// Arguments placed before `<target> <mode>`, e.g. an interpreter's script path.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, request: &ScanRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(request.target.to_string())
            .arg(request.mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Scanner for ProcessScanner {
    async fn invoke(&self, request: &ScanRequest) -> Result<ScanReport, ScannerError> {
        let mut cmd = self.command(request);
        let output = cmd.output();
        let output = match self.timeout {
            Some(limit) => time::timeout(limit, output).await.map_err(|_| ScannerError::TimedOut)?,
            None => output.await,
        }
        .map_err(ScannerError::Spawn)?;

        if !output.status.success() {
            return Err(ScannerError::ProcessFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !output.stderr.is_empty() {
            debug!(target_ip = %request.target, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "scanner diagnostics");
        }

        interpret_output(&output.stdout)
    }
}

/// Classify the stdout of a successful run.
pub fn interpret_output(stdout: &[u8]) -> Result<ScanReport, ScannerError> {
    let report = ScanReport::from_json(stdout).map_err(ScannerError::Malformed)?;
    match report.embedded_error() {
        Some(message) => Err(ScannerError::Reported(message)),
        None => Ok(report),
    }
}
