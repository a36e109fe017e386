//! Admission control in front of every listing and download route.

use crate::{
    errors::AppError,
    services::rate_limiter::{Admission, UNKNOWN_CLIENT},
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct KeyOnly {
    key: Option<String>,
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// Client address used as the rate-limit bucket.
///
/// `None` when the peer is loopback or cannot be determined; those requests
/// share the `unknown` bucket.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> Option<String> {
    let forwarded = if trust_forwarded_for {
        forwarded_ip(request.headers())
    } else {
        None
    };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    forwarded
        .or(peer)
        .map(|ip| ip.to_canonical())
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
}

/// Reject with 429 when any of the limiter's checks fails.
///
/// Requests without an access key pass through; the handler answers them
/// with 400 before anything reaches upstream.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = Query::<KeyOnly>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.key)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    let Some(key) = key else {
        return next.run(request).await;
    };

    let ip = client_ip(&request, state.config.trust_forwarded_for);
    match state.limiter.admit(ip.as_deref(), &key) {
        Admission::Allowed => next.run(request).await,
        Admission::Limited {
            reason,
            retry_after,
        } => {
            warn!(
                client = ip.as_deref().unwrap_or(UNKNOWN_CLIENT),
                reason = reason.as_str(),
                ?retry_after,
                "request rate limited"
            );
            AppError::too_many_requests(retry_after).into_response()
        }
    }
}
