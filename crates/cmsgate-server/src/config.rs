use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    /// Content origin (the headless CMS API)
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 || self.server.shutdown_timeout_ms == 0 {
            return Err("server timeouts must be > 0".into());
        }
        // Origin validations
        if self.origin.url.trim().is_empty() {
            return Err("origin.url must not be empty".into());
        }
        url::Url::parse(&self.origin.url).map_err(|e| format!("origin.url is invalid: {e}"))?;
        if self.origin.timeout_ms == 0 {
            return Err("origin.timeout_ms must be > 0".into());
        }
        if self.analytics.timeout_ms == 0 {
            return Err("analytics.timeout_ms must be > 0".into());
        }
        // Cache validations
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".into());
        }
        if self.cache.backend == CacheBackendKind::Redis {
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }
        // Rate limit validations
        if self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0 {
            return Err("rate_limit.requests and rate_limit.window_secs must be > 0".into());
        }
        if self.rate_limit.analytics_requests == 0 || self.rate_limit.analytics_window_secs == 0 {
            return Err(
                "rate_limit.analytics_requests and rate_limit.analytics_window_secs must be > 0"
                    .into(),
            );
        }
        // CORS validation
        if self.cors.allowed_origins.is_empty() {
            return Err("cors.allowed_origins must list at least one origin".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Auth validation
        if self.environment == Environment::Production && self.auth.api_key().is_none() {
            return Err("auth.api_key is required when environment = production".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_timeout_ms)
    }

    /// Log output format; `json` unless explicitly configured otherwise in production.
    pub fn log_format(&self) -> LogFormat {
        match (self.logging.format, self.environment) {
            (Some(format), _) => format,
            (None, Environment::Production) => LogFormat::Json,
            (None, Environment::Development) => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for handling a single inbound request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    30_000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Content origin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Base URL of the content API, e.g. `http://localhost:1337`
    #[serde(default = "default_origin_url")]
    pub url: String,

    /// Bearer token sent on every origin request when set
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_origin_timeout_ms")]
    pub timeout_ms: u64,

    /// Liveness endpoint polled by the readiness check
    #[serde(default = "default_origin_health_path")]
    pub health_path: String,
}

fn default_origin_url() -> String {
    "http://localhost:1337".into()
}
fn default_origin_timeout_ms() -> u64 {
    10_000
}
fn default_origin_health_path() -> String {
    "/_health".into()
}

impl OriginConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Configured token, ignoring blank values.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            token: None,
            timeout_ms: default_origin_timeout_ms(),
            health_path: default_origin_health_path(),
        }
    }
}

/// Which cache backend the gateway uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Shared Redis cache; degrades to `none` if unreachable at startup
    #[default]
    Redis,
    /// Process-local cache (single instance deployments)
    Memory,
    /// Caching disabled
    None,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// TTL applied to every cached content response, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379"); a bare host:port is accepted
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Password applied when the URL does not carry one
    #[serde(default)]
    pub password: Option<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Bound for connection checkout and every command round trip, in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl RedisConfig {
    /// Full connection URL with scheme and password applied.
    pub fn connection_url(&self) -> Result<String, String> {
        let raw = if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        };
        let mut parsed =
            url::Url::parse(&raw).map_err(|e| format!("redis.url is invalid: {e}"))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            if parsed.password().is_none() {
                parsed
                    .set_password(Some(password))
                    .map_err(|_| "redis.url cannot carry a password".to_string())?;
            }
        }
        Ok(parsed.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// API key authentication
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Expected key for `X-API-Key` / `Authorization: Bearer`.
    /// When unset, API key enforcement is disabled (development only).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AuthConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP per window, across all routes
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    /// Separate budget for analytics ingestion
    #[serde(default = "default_rate_limit_requests")]
    pub analytics_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub analytics_window_secs: u64,
}

fn default_rate_limit_requests() -> u32 {
    100
}
fn default_rate_limit_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window_secs(),
            analytics_requests: default_rate_limit_requests(),
            analytics_window_secs: default_rate_limit_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Analytics provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// GA4 measurement id (G-XXXX)
    #[serde(default)]
    pub google_measurement_id: Option<String>,
    /// GA4 Measurement Protocol API secret
    #[serde(default)]
    pub google_api_secret: Option<String>,
    #[serde(default = "default_google_endpoint")]
    pub google_endpoint: String,
    /// Upper bound for one Measurement Protocol POST, in milliseconds
    #[serde(default = "default_analytics_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_google_endpoint() -> String {
    "https://www.google-analytics.com/mp/collect".into()
}
fn default_analytics_timeout_ms() -> u64 {
    5_000
}

impl AnalyticsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            google_measurement_id: None,
            google_api_secret: None,
            google_endpoint: default_google_endpoint(),
            timeout_ms: default_analytics_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Defaults to `json` in production and `pretty` otherwise
    #[serde(default)]
    pub format: Option<LogFormat>,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "cmsgate.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CMSGATE__ORIGIN__URL=https://cms.example.com
        builder = builder.add_source(
            Environment::with_prefix("CMSGATE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors.allowed_origins"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(300));
        assert_eq!(cfg.origin.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.log_format(), LogFormat::Pretty);
    }

    #[test]
    fn production_requires_api_key() {
        let mut cfg = AppConfig {
            environment: Environment::Production,
            ..AppConfig::default()
        };
        let err = cfg.validate().expect_err("missing key must be rejected");
        assert!(err.contains("auth.api_key"));

        cfg.auth.api_key = Some("   ".into());
        assert!(cfg.validate().is_err());

        cfg.auth.api_key = Some("secret".into());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.log_format(), LogFormat::Json);
    }

    #[test]
    fn rejects_bad_origin_url() {
        let mut cfg = AppConfig::default();
        cfg.origin.url = "not a url".into();
        assert!(cfg.validate().unwrap_err().contains("origin.url"));
    }

    #[test]
    fn analytics_timeout_must_be_positive() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.analytics.timeout(), Duration::from_secs(5));
        cfg.analytics.timeout_ms = 0;
        assert!(cfg.validate().unwrap_err().contains("analytics.timeout_ms"));
    }

    #[test]
    fn origin_base_url_trims_trailing_slash() {
        let origin = OriginConfig {
            url: "http://cms.local:1337/".into(),
            ..OriginConfig::default()
        };
        assert_eq!(origin.base_url(), "http://cms.local:1337");
    }

    #[test]
    fn redis_url_gets_scheme_and_password() {
        let redis = RedisConfig {
            url: "cache.internal:6380".into(),
            password: Some("hunter2".into()),
            ..RedisConfig::default()
        };
        assert_eq!(
            redis.connection_url().unwrap(),
            "redis://:hunter2@cache.internal:6380"
        );

        let with_auth = RedisConfig {
            url: "redis://:inline@localhost:6379".into(),
            password: Some("ignored".into()),
            ..RedisConfig::default()
        };
        assert_eq!(
            with_auth.connection_url().unwrap(),
            "redis://:inline@localhost:6379"
        );
    }
}
