use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    intake::{self, SubmitError},
    queue::JobQueue,
    rate_limit::{self, ApiRateLimit},
    status::{self, StatusView},
    types::JobId,
};

/// Largest accepted request body.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024;

/// Hardening headers added to every response unless a handler set its own.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("content-security-policy", "default-src 'none'; frame-ancestors 'self'"),
];

#[derive(Clone)]
pub struct AppState {
    queue: Arc<dyn JobQueue>,
}

/// `{ "error": <message> }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, rejection.body_text())
    }
}

/// Raw submission body. Fields stay untyped so validation owns every message.
#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    target: Option<Value>,
    #[serde(default, rename = "scanType")]
    scan_type: Option<Value>,
}

/// Strings pass through; any other JSON type is handed over as an invalid literal.
fn field_text(value: Option<&Value>) -> Option<&str> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => Some(""),
    }
}

/// Build the application router.
///
/// `cors_origins` lists browser origins allowed to call the API; an empty
/// list disables CORS headers entirely. `api_limit` applies to `/api` only.
pub fn router(
    queue: Arc<dyn JobQueue>,
    cors_origins: &[String],
    api_limit: Option<ApiRateLimit>,
) -> Result<Router> {
    let state = AppState { queue };

    let mut api = Router::new()
        .route("/scan", post(post_scan))
        .route("/scan/{id}", get(get_scan))
        .with_state(state);
    if let Some(limit) = api_limit {
        api = api.layer(middleware::from_fn_with_state(limit, rate_limit::enforce));
    }

    let mut app = Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES));
    for &(name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    if !cors_origins.is_empty() {
        let origins = cors_origins
            .iter()
            .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}")))
            .collect::<Result<Vec<_>>>()?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true),
        );
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}

/// Serve `app` on `bind` until `shutdown` is cancelled.
pub async fn spawn_server(bind: &str, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "scan API listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn post_scan(
    State(app): State<AppState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let submitted = intake::submit(
        app.queue.as_ref(),
        field_text(body.target.as_ref()),
        field_text(body.scan_type.as_ref()),
    )
    .await;
    match submitted {
        Ok(id) => Ok(Json(json!({ "jobId": id, "status": "queued" }))),
        Err(SubmitError::Invalid(e)) => Err(ApiError::new(StatusCode::BAD_REQUEST, e.to_string())),
        Err(SubmitError::Queue(e)) => {
            error!(error = %e, "queue error");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add scan to queue"))
        }
    }
}

async fn get_scan(
    State(app): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    let not_found = || ApiError::new(StatusCode::NOT_FOUND, "Job not found");
    let id: JobId = raw_id.parse().map_err(|_| not_found())?;
    match status::get_status(app.queue.as_ref(), id).await {
        Ok(Some(view)) => Ok(Json(view.for_wire())),
        Ok(None) => Err(not_found()),
        Err(e) => {
            error!(job_id = %id, error = %e, "status check failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Status check failed"))
        }
    }
}

async fn health() -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
    Json(json!({ "status": "UP", "timestamp": timestamp }))
}
