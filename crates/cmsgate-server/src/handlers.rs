use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analytics::AnalyticsEventBatch;
use crate::cache::CanonicalQuery;
use crate::content::RetrievalOutcome;
use crate::error::ApiError;
use crate::server::AppState;

pub const X_CACHE_STATUS: &str = "x-cache-status";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.readiness().await;
    let status = if health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": health.status,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": health.checks,
    });
    (status, Json(body))
}

pub async fn metrics() -> impl IntoResponse {
    let body = crate::metrics::render_metrics().unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

// ---- Content ----

pub async fn get_collection(
    State(state): State<AppState>,
    Path(content_type): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    check_segment("type", &content_type)?;
    let query = CanonicalQuery::parse(raw.as_deref().unwrap_or(""));
    let outcome = state.content.get_collection(&content_type, &query).await?;
    Ok(content_response(outcome, false))
}

pub async fn get_single(
    State(state): State<AppState>,
    Path((content_type, id)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    check_segment("type", &content_type)?;
    check_segment("id", &id)?;
    let query = CanonicalQuery::parse(raw.as_deref().unwrap_or(""));
    let outcome = state.content.get_single(&content_type, &id, &query).await?;
    Ok(content_response(outcome, false))
}

pub async fn get_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    if slug.is_empty() {
        return Err(ApiError::BadRequest("slug must not be empty".into()));
    }
    let outcome = state.content.get_page_by_slug(&slug).await?;
    Ok(content_response(outcome, false))
}

pub async fn get_preview(
    State(state): State<AppState>,
    Path((content_type, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    check_segment("type", &content_type)?;
    check_segment("id", &id)?;
    let outcome = state.content.get_preview(&content_type, &id).await?;
    Ok(content_response(outcome, true))
}

/// Path segments are interpolated into origin URLs and cache keys.
fn check_segment(name: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() || value.contains(['/', '?', '#', ':']) {
        return Err(ApiError::BadRequest(format!("invalid {name}: {value:?}")));
    }
    Ok(())
}

fn content_response(outcome: RetrievalOutcome, no_store: bool) -> Response {
    let mut response = Response::new(Body::from(outcome.payload));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        X_CACHE_STATUS,
        HeaderValue::from_static(outcome.provenance.header_value()),
    );
    if no_store {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

// ---- Cache invalidation webhook ----

/// Content-change notification. `contentType` wins over `model` when both are set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentWebhook {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

pub async fn content_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let hook: ContentWebhook = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {e}")))?;
    let content_type = hook
        .content_type
        .or(hook.model)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("webhook payload has no content type".into()))?;
    check_segment("content type", &content_type)?;

    let deleted = state.content.invalidate_cache(&content_type).await?;
    tracing::info!(
        content_type = %content_type,
        event = hook.event.as_deref().unwrap_or(""),
        deleted,
        "cache invalidated by webhook"
    );
    Ok(Json(json!({ "invalidated": content_type, "deleted": deleted })))
}

// ---- Analytics ----

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn ingest_events(State(state): State<AppState>, body: Bytes) -> Response {
    let batch: AnalyticsEventBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting analytics batch");
            return (
                StatusCode::BAD_REQUEST,
                Json(IngestResponse {
                    success: false,
                    count: 0,
                    message: Some("Invalid request body".into()),
                }),
            )
                .into_response();
        }
    };

    let count = batch.events.len();
    crate::metrics::record_analytics_events(count);
    // Providers run off the request path
    state.analytics.dispatch(batch.events);

    Json(IngestResponse {
        success: true,
        count,
        message: None,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_reject_separators() {
        assert!(check_segment("type", "articles").is_ok());
        assert!(check_segment("id", "42").is_ok());
        assert!(check_segment("type", "").is_err());
        assert!(check_segment("type", "a/b").is_err());
        assert!(check_segment("id", "1?x=1").is_err());
        assert!(check_segment("type", "a:b").is_err());
    }
}
