use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    analytics::AnalyticsService,
    cache::CacheStore,
    config::AppConfig,
    content::ContentService,
    handlers,
    health::HealthAggregator,
    middleware as app_middleware,
    origin::OriginClient,
    rate_limit::RateLimiter,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub content: ContentService,
    pub health: HealthAggregator,
    pub analytics: AnalyticsService,
    pub api_limiter: RateLimiter,
    pub analytics_limiter: RateLimiter,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        cache: CacheStore,
        origin: OriginClient,
        analytics: AnalyticsService,
    ) -> Self {
        let limits = &config.rate_limit;
        let api_limiter =
            RateLimiter::new(limits.requests, Duration::from_secs(limits.window_secs));
        let analytics_limiter = RateLimiter::new(
            limits.analytics_requests,
            Duration::from_secs(limits.analytics_window_secs),
        );
        Self {
            content: ContentService::new(cache.clone(), origin.clone()),
            health: HealthAggregator::new(cache, origin),
            analytics,
            api_limiter,
            analytics_limiter,
            config: Arc::new(config),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let cfg = state.config.clone();
    let auth = app_middleware::ApiKeyAuth::new(cfg.auth.api_key());
    if !auth.is_enforced() {
        tracing::warn!("no API key configured; content routes are unauthenticated");
    }

    // Content and webhook routes: rate limit -> API key
    let protected = Router::new()
        .route("/api/v1/content/{content_type}", get(handlers::get_collection))
        .route(
            "/api/v1/content/{content_type}/{id}",
            get(handlers::get_single),
        )
        .route("/api/v1/pages/{slug}", get(handlers::get_page))
        .route(
            "/api/v1/preview/{content_type}/{id}",
            get(handlers::get_preview),
        )
        .route("/api/v1/webhooks/content", post(handlers::content_webhook))
        .route_layer(middleware::from_fn_with_state(
            auth,
            app_middleware::api_key_auth,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.api_limiter.clone(),
            app_middleware::rate_limit,
        ));

    let analytics = Router::new()
        .route("/api/v1/analytics/events", post(handlers::ingest_events))
        .route_layer(middleware::from_fn_with_state(
            state.analytics_limiter.clone(),
            app_middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .merge(analytics)
        .with_state(state)
        .layer(middleware::from_fn(app_middleware::http_metrics))
        // Outermost first: panic guard -> request id -> trace -> cors -> compression -> timeout
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("");
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(cors_layer(&cfg.cors.allowed_origins))
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    cfg.request_timeout(),
                )),
        )
        .layer(DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

/// CORS policy for the configured browser origins. `*` mirrors the request origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(app_middleware::X_API_KEY),
        ])
        .expose_headers([
            HeaderName::from_static(app_middleware::X_REQUEST_ID),
            HeaderName::from_static(handlers::X_CACHE_STATUS),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    cache: Option<CacheStore>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            cache: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use an already constructed cache store instead of building one from config.
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn build(self) -> anyhow::Result<GatewayServer> {
        let cache = match self.cache {
            Some(cache) => cache,
            None => crate::create_cache_store(&self.config.cache, &self.config.redis).await,
        };
        let origin = OriginClient::new(&self.config.origin)?;
        let analytics = AnalyticsService::from_config(&self.config.analytics);

        tracing::info!(
            origin = %origin.base_url(),
            cache = cache.mode().as_str(),
            ttl_secs = cache.ttl().as_secs(),
            analytics = ?analytics.provider_names(),
            "gateway initialized"
        );

        let shutdown_timeout = self.config.shutdown_timeout();
        let state = AppState::new(self.config, cache.clone(), origin, analytics);
        spawn_limiter_purge(&state);
        let app = build_app(state);

        Ok(GatewayServer {
            addr: self.addr,
            app,
            cache,
            shutdown_timeout,
        })
    }
}

/// Periodically drop idle rate-limit buckets.
fn spawn_limiter_purge(state: &AppState) {
    let limiters = [state.api_limiter.clone(), state.analytics_limiter.clone()];
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            for limiter in &limiters {
                limiter.purge_idle();
            }
        }
    });
}

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    cache: CacheStore,
    shutdown_timeout: Duration,
}

impl GatewayServer {
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let serve = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

        // In-flight requests get `shutdown_timeout` to drain once the signal fires
        let shutdown_timeout = self.shutdown_timeout;
        let drained = tokio::select! {
            res = serve => Some(res),
            _ = async {
                shutdown_signal().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => None,
        };

        match drained {
            Some(res) => res?,
            None => tracing::warn!(
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "shutdown timed out with requests in flight"
            ),
        }

        self.cache.close();
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
