pub mod analytics;
pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod origin;
pub mod rate_limit;
pub mod server;

pub use analytics::{AnalyticsEvent, AnalyticsEventBatch, AnalyticsProvider, AnalyticsService};
pub use cache::{CacheError, CacheMode, CacheStore, CanonicalQuery};
pub use config::{AppConfig, CacheBackendKind, CacheConfig, RedisConfig};
pub use content::{ContentService, Provenance, RetrievalOutcome};
pub use error::ApiError;
pub use health::{HealthAggregator, HealthStatus};
pub use observability::init_tracing_with;
pub use origin::{OriginClient, OriginError};
pub use server::{AppState, GatewayServer, ServerBuilder, build_app};

/// Create the cache store selected by configuration.
///
/// ## Cache Modes
///
/// - **redis**: connects a pooled client and PINGs it once; any failure
///   leaves the store in bypass mode for the lifetime of the process
/// - **memory**: process-local store
/// - **none**: bypass, every read goes to the origin
pub async fn create_cache_store(cache: &CacheConfig, redis: &RedisConfig) -> CacheStore {
    let ttl = cache.ttl();

    match cache.backend {
        CacheBackendKind::None => {
            tracing::info!("Caching disabled");
            return CacheStore::bypass(ttl);
        }
        CacheBackendKind::Memory => {
            tracing::info!(ttl_secs = ttl.as_secs(), "Using in-process cache");
            return CacheStore::new_memory(ttl);
        }
        CacheBackendKind::Redis => {}
    }

    let url = match redis.connection_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid Redis URL. Caching disabled.");
            return CacheStore::bypass(ttl);
        }
    };
    tracing::info!(url = %redis.url, "Connecting to Redis");

    let timeout = redis.timeout();
    let mut redis_config = deadpool_redis::Config::from_url(url);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(redis.pool_size));
    pool_config.max_size = redis.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool. Caching disabled.");
            return CacheStore::bypass(ttl);
        }
    };

    let store = CacheStore::new_redis(pool, ttl, timeout);
    if store.is_connected().await {
        tracing::info!("Connected to Redis");
        store
    } else {
        tracing::warn!("Redis did not answer PING. Caching disabled until restart.");
        store.close();
        CacheStore::bypass(ttl)
    }
}
