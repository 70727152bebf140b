use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderName, HeaderValue, Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_API_KEY: &str = "x-api-key";

// =============================================================================
// Request ID
// =============================================================================

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(X_REQUEST_ID);

    // Preserve an incoming request id, otherwise generate one
    let req_id_value = req.headers().get(&header_name).cloned().unwrap_or_else(|| {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
    });

    // Downstream spans read it from extensions
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

// =============================================================================
// API key authentication
// =============================================================================

/// Expected API key; `None` disables enforcement.
#[derive(Clone, Default)]
pub struct ApiKeyAuth {
    expected: Option<Arc<str>>,
}

impl ApiKeyAuth {
    pub fn new(expected: Option<&str>) -> Self {
        Self {
            expected: expected.map(Arc::from),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.expected.is_some()
    }

    fn accepts(&self, provided: Option<&str>) -> bool {
        match (self.expected.as_deref(), provided) {
            (None, _) => true,
            (Some(expected), Some(key)) => bool::from(key.as_bytes().ct_eq(expected.as_bytes())),
            (Some(_), None) => false,
        }
    }
}

/// Require a valid key in `X-API-Key` or `Authorization: Bearer`.
///
/// CORS preflight (`OPTIONS`) is always let through.
pub async fn api_key_auth(
    State(auth): State<ApiKeyAuth>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(X_API_KEY)
        .and_then(|h| h.to_str().ok())
        .filter(|k| !k.is_empty())
        .or_else(|| {
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .filter(|k| !k.is_empty())
        });

    if auth.accepts(provided) {
        next.run(req).await
    } else {
        tracing::debug!(path = %req.uri().path(), "API key rejected");
        ApiError::Unauthorized.into_response()
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_ip(&req);
    let (allowed, remaining) = limiter.allow(&client);
    if !allowed {
        tracing::debug!(client = %client, "rate limit exceeded");
        return ApiError::RateLimited {
            retry_after_secs: limiter.retry_after_secs(),
        }
        .into_response();
    }

    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.limit()));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    res
}

/// Client address: `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
pub fn client_ip(req: &Request<Body>) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// =============================================================================
// HTTP metrics
// =============================================================================

pub async fn http_metrics(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let res = next.run(req).await;
    crate::metrics::record_http_request(
        method.as_str(),
        &route,
        res.status().as_u16(),
        started.elapsed(),
    );
    res
}
