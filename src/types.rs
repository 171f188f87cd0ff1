use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Scan profile handed to the external scanner as its second argument.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Quick,
    Full,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = ();

    /// Exact, case-sensitive match on `quick` / `full`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            _ => Err(()),
        }
    }
}

/// A validated scan request. Only built by the intake service (or read back from the queue).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: Ipv4Addr,
    #[serde(rename = "scanType")]
    pub mode: ScanMode,
}

/// Structured document emitted by the external scanner.
///
/// Kept as the raw JSON object so the status endpoint returns the scanner's
/// fields in the order it wrote them. Values are re-serialized, so number
/// formatting may differ from the scanner's bytes. The accessors below only
/// peek at the fields the service itself cares about.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ScanReport(Map<String, Value>);

impl ScanReport {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse one JSON document. Anything other than a JSON object is rejected.
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Reachability reported by the scanner (`up` / `down`), if present.
    pub fn host_status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    /// Soft failure carried inside an otherwise successful run.
    pub fn embedded_error(&self) -> Option<String> {
        match self.0.get("error")? {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn open_port_count(&self) -> usize {
        self.0
            .get("open_ports")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// Opaque job identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle position of a job. Terminal variants carry their payload, so a
/// job can never hold both a result and an error.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Queued,
    Active,
    Completed(ScanReport),
    Failed(String),
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// One unit of work as stored by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub request: ScanRequest,
    pub status: JobStatus,
    pub created_at: OffsetDateTime,
}

impl Job {
    pub fn queued(request: ScanRequest) -> Self {
        Self {
            id: JobId::new(),
            request,
            status: JobStatus::Queued,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
