//! HTTP client for the content origin.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use crate::cache::CanonicalQuery;
use crate::config::OriginConfig;

/// Errors returned by origin fetches.
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    /// The origin answered with something other than 200 OK.
    #[error("origin returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("origin request timed out after {0:?}")]
    Timeout(Duration),

    #[error("origin request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to build origin HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Authenticated client for the content API.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone, Debug)]
pub struct OriginClient {
    base_url: String,
    token: Option<String>,
    health_path: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl OriginClient {
    pub fn new(cfg: &OriginConfig) -> Result<Self, OriginError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(OriginError::Client)?;

        let health_path = if cfg.health_path.starts_with('/') {
            cfg.health_path.clone()
        } else {
            format!("/{}", cfg.health_path)
        };

        Ok(Self {
            base_url: cfg.base_url().to_string(),
            token: cfg.token().map(str::to_string),
            health_path,
            timeout: cfg.timeout(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/{type}[?{query}]`
    pub fn collection_endpoint(&self, content_type: &str, query: &CanonicalQuery) -> String {
        with_query(format!("{}/api/{}", self.base_url, content_type), query)
    }

    /// `{base}/api/{type}/{id}[?{query}]`
    pub fn single_endpoint(&self, content_type: &str, id: &str, query: &CanonicalQuery) -> String {
        with_query(
            format!("{}/api/{}/{}", self.base_url, content_type, id),
            query,
        )
    }

    /// `{base}/api/pages?filters[slug][$eq]={slug}&populate=*`
    pub fn page_endpoint(&self, slug: &str) -> String {
        let escaped: String = form_urlencoded::byte_serialize(slug.as_bytes()).collect();
        format!(
            "{}/api/pages?filters[slug][$eq]={}&populate=*",
            self.base_url, escaped
        )
    }

    /// `{base}/api/{type}/{id}?publicationState=preview`
    pub fn preview_endpoint(&self, content_type: &str, id: &str) -> String {
        format!(
            "{}/api/{}/{}?publicationState=preview",
            self.base_url, content_type, id
        )
    }

    /// Issue a single GET and return the body of a 200 response.
    ///
    /// Any other status becomes [`OriginError::Status`] carrying the body.
    /// No retries.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self, endpoint: &str) -> Result<Bytes, OriginError> {
        let started = Instant::now();
        let mut request = self
            .http
            .get(endpoint)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(endpoint = %endpoint, "Fetching from origin");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                crate::metrics::record_origin_request("error", started.elapsed());
                return Err(self.transport_error(e));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            crate::metrics::record_origin_request("status", started.elapsed());
            warn!(endpoint = %endpoint, status = %status.as_u16(), "Origin returned non-OK status");
            return Err(OriginError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        crate::metrics::record_origin_request("ok", started.elapsed());
        Ok(body)
    }

    /// Probe the origin liveness endpoint. 200 and 204 count as healthy.
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}{}", self.base_url, self.health_path);
        match self.http.get(&url).send().await {
            Ok(response) => matches!(response.status(), StatusCode::OK | StatusCode::NO_CONTENT),
            Err(e) => {
                debug!(url = %url, error = %e, "Origin health check failed");
                false
            }
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> OriginError {
        if e.is_timeout() {
            OriginError::Timeout(self.timeout)
        } else {
            OriginError::Transport(e)
        }
    }
}

fn with_query(endpoint: String, query: &CanonicalQuery) -> String {
    if query.is_empty() {
        endpoint
    } else {
        format!("{}?{}", endpoint, query.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base: &str, token: Option<&str>) -> OriginClient {
        OriginClient::new(&OriginConfig {
            url: base.to_string(),
            token: token.map(str::to_string),
            timeout_ms: 2_000,
            ..OriginConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_shapes() {
        let client = client_for("http://cms.local/", None);
        let query = CanonicalQuery::parse("sort=title&limit=10");

        assert_eq!(
            client.collection_endpoint("articles", &CanonicalQuery::default()),
            "http://cms.local/api/articles"
        );
        assert_eq!(
            client.collection_endpoint("articles", &query),
            "http://cms.local/api/articles?limit=10&sort=title"
        );
        assert_eq!(
            client.single_endpoint("articles", "42", &query),
            "http://cms.local/api/articles/42?limit=10&sort=title"
        );
        assert_eq!(
            client.page_endpoint("about us&more"),
            "http://cms.local/api/pages?filters[slug][$eq]=about+us%26more&populate=*"
        );
        assert_eq!(
            client.preview_endpoint("articles", "42"),
            "http://cms.local/api/articles/42?publicationState=preview"
        );
    }

    #[tokio::test]
    async fn fetch_sends_bearer_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(header("authorization", "Bearer s3cret"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), Some("s3cret"));
        let body = client
            .fetch(&client.collection_endpoint("articles", &CanonicalQuery::default()))
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"data":[]}"#);
    }

    #[tokio::test]
    async fn fetch_without_token_omits_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .and(query_param("filters[slug][$eq]", "home"))
            .and(query_param("populate", "*"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), None);
        client.fetch(&client.page_endpoint("home")).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn non_ok_status_carries_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), None);
        let err = client
            .fetch(&client.single_endpoint("articles", "9", &CanonicalQuery::default()))
            .await
            .unwrap_err();
        match err {
            OriginError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not here");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_accepts_200_and_204() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        assert!(client_for(&server.uri(), None).is_healthy().await);

        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;
        assert!(!client_for(&failing.uri(), None).is_healthy().await);
    }

    #[tokio::test]
    async fn unreachable_origin_is_unhealthy() {
        let client = client_for("http://127.0.0.1:1", None);
        assert!(!client.is_healthy().await);
        assert!(matches!(
            client.fetch("http://127.0.0.1:1/api/x").await,
            Err(OriginError::Transport(_)) | Err(OriginError::Timeout(_))
        ));
    }
}
