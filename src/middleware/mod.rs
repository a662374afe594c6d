//! Middleware for request logging and rate limiting.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};

use axum::{extract::ConnectInfo, http::Request};
use std::net::{IpAddr, SocketAddr};

/// Client address. The socket peer, unless the deployment sits behind a
/// proxy it trusts to set `X-Forwarded-For`; then the first hop wins.
pub(crate) fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !trust_forwarded_for {
        return peer;
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .or(peer)
}
