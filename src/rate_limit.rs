//! Per-client request limiting for the `/api` routes.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::warn;

use crate::server::ApiError;

pub const TOO_MANY_REQUESTS: &str = "Too many requests from this IP, please try again later.";

/// Forget idle clients once this many are tracked.
const PRUNE_ABOVE: usize = 10_000;

/// Token bucket per client IP: a full window's allowance up front, refilled
/// evenly across the window.
#[derive(Clone)]
pub struct ApiRateLimit {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl ApiRateLimit {
    /// At most `max` requests per client in any `window`. `None` when either
    /// is zero.
    pub fn per_window(max: u32, window: Duration) -> Option<Self> {
        let burst = NonZeroU32::new(max)?;
        let quota = Quota::with_period(window / max)?.allow_burst(burst);
        Some(Self { limiter: Arc::new(RateLimiter::keyed(quota)) })
    }

    fn admit(&self, client: IpAddr) -> bool {
        if self.limiter.len() > PRUNE_ABOVE {
            self.limiter.retain_recent();
        }
        self.limiter.check_key(&client).is_ok()
    }
}

/// Requests without a peer address (in-process calls) share one bucket.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn enforce(State(limit): State<ApiRateLimit>, req: Request, next: Next) -> Result<Response, ApiError> {
    let client = client_ip(&req);
    if !limit.admit(client) {
        warn!(client = %client, path = %req.uri().path(), "rate limit exceeded");
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS));
    }
    Ok(next.run(req).await)
}
