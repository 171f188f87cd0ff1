//! Redis-backed queue shared by every server and worker process pointed at the same instance.
//!
//! Layout under `<prefix>`:
//! - `<prefix>:pending` list of job ids waiting to be claimed (FIFO)
//! - `<prefix>:job:<id>` hash with `request`, `state`, `result`, `error`, `created_at`
//!
//! State checks and transitions run inside Lua scripts so they are atomic
//! across processes.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use super::{JobQueue, QueueResult};
use crate::error::QueueError;
use crate::types::{Job, JobId, JobStatus, ScanReport, ScanRequest};

mod scripts {
    use redis::Script;

    /// Pop pending ids until one is still `queued`, then mark it `active`.
    /// KEYS[1] = pending list, ARGV[1] = job key prefix.
    pub fn claim() -> Script {
        Script::new(
            r#"
            local id = redis.call('LPOP', KEYS[1])
            while id do
                local key = ARGV[1] .. id
                if redis.call('HGET', key, 'state') == 'queued' then
                    redis.call('HSET', key, 'state', 'active')
                    return {id, redis.call('HGET', key, 'request'), redis.call('HGET', key, 'created_at')}
                end
                id = redis.call('LPOP', KEYS[1])
            end
            return false
            "#,
        )
    }

    /// Move an `active` job to a terminal state.
    /// KEYS[1] = job key, ARGV = terminal state, payload field, payload.
    /// Returns `ok`, `missing`, or the state that blocked the transition.
    pub fn resolve() -> Script {
        Script::new(
            r#"
            local state = redis.call('HGET', KEYS[1], 'state')
            if not state then
                return 'missing'
            end
            if state ~= 'active' then
                return state
            end
            redis.call('HSET', KEYS[1], 'state', ARGV[1], ARGV[2], ARGV[3])
            return 'ok'
            "#,
        )
    }
}

/// Queue stored in Redis. Cheap to clone; clones share one managed connection.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    prefix: String,
    claim_script: Script,
    resolve_script: Script,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").field("prefix", &self.prefix).finish()
    }
}

impl RedisQueue {
    /// Connect and verify the server answers before handing the queue out.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "job queue connected to redis");
        Ok(Self { conn, prefix, claim_script: scripts::claim(), resolve_script: scripts::resolve() })
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}{}", self.job_key_prefix(), id)
    }

    async fn resolve(&self, id: JobId, state: &str, field: &str, payload: String) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let outcome: String = self
            .resolve_script
            .key(self.job_key(id))
            .arg(state)
            .arg(field)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        match outcome.as_str() {
            "ok" => Ok(()),
            "missing" => Err(QueueError::NotFound(id)),
            other => Err(QueueError::InvalidTransition { id, from: static_label(other) }),
        }
    }
}

fn static_label(state: &str) -> &'static str {
    match state {
        "queued" => "queued",
        "active" => "active",
        "completed" => "completed",
        "failed" => "failed",
        _ => "unknown",
    }
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

fn corrupt(id: JobId, reason: impl std::fmt::Display) -> QueueError {
    QueueError::Corrupt { id, reason: reason.to_string() }
}

fn decode_request(id: JobId, raw: &str) -> QueueResult<ScanRequest> {
    serde_json::from_str(raw).map_err(|e| corrupt(id, format_args!("request: {e}")))
}

fn decode_created_at(id: JobId, raw: &str) -> QueueResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| corrupt(id, format_args!("created_at: {e}")))
}

fn decode_job(id: JobId, mut fields: HashMap<String, String>) -> QueueResult<Job> {
    let take = |fields: &mut HashMap<String, String>, name: &str| {
        fields.remove(name).ok_or_else(|| corrupt(id, format_args!("missing field {name}")))
    };
    let request = decode_request(id, &take(&mut fields, "request")?)?;
    let created_at = decode_created_at(id, &take(&mut fields, "created_at")?)?;
    let status = match take(&mut fields, "state")?.as_str() {
        "queued" => JobStatus::Queued,
        "active" => JobStatus::Active,
        "completed" => {
            let raw = take(&mut fields, "result")?;
            let report: ScanReport =
                serde_json::from_str(&raw).map_err(|e| corrupt(id, format_args!("result: {e}")))?;
            JobStatus::Completed(report)
        }
        "failed" => JobStatus::Failed(take(&mut fields, "error")?),
        other => return Err(corrupt(id, format_args!("unknown state {other}"))),
    };
    Ok(Job { id, request, status, created_at })
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, request: ScanRequest) -> QueueResult<JobId> {
        let job = Job::queued(request);
        let request_json =
            serde_json::to_string(&job.request).map_err(|e| corrupt(job.id, e))?;
        let fields = [
            ("request", request_json),
            ("state", job.status.label().to_string()),
            ("created_at", format_timestamp(job.created_at)),
        ];
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(self.job_key(job.id), &fields)
            .ignore()
            .rpush(self.pending_key(), job.id.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(job.id)
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let claimed: Option<(String, String, String)> = self
            .claim_script
            .key(self.pending_key())
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        let Some((raw_id, request, created_at)) = claimed else {
            return Ok(None);
        };
        let id: JobId = raw_id
            .parse()
            .map_err(|e| QueueError::Unavailable(format!("claimed malformed job id {raw_id}: {e}")))?;
        Ok(Some(Job {
            id,
            request: decode_request(id, &request)?,
            status: JobStatus::Active,
            created_at: decode_created_at(id, &created_at)?,
        }))
    }

    async fn complete(&self, id: JobId, result: ScanReport) -> QueueResult<()> {
        let payload = serde_json::to_string(&result).map_err(|e| corrupt(id, e))?;
        self.resolve(id, "completed", "result", payload).await
    }

    async fn fail(&self, id: JobId, error: String) -> QueueResult<()> {
        self.resolve(id, "failed", "error", error).await
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_job(id, fields).map(Some)
    }
}
