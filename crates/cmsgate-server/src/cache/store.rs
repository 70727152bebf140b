//! Cache store with Redis, in-process and bypass backends.

use bytes::Bytes;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors raised by cache operations that report failure to the caller.
///
/// Reads and write-backs never surface these; they are logged and treated
/// as a miss or a skipped write.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// A cached entry with TTL support (in-process backend).
#[derive(Clone, Debug)]
pub(crate) struct CachedEntry {
    pub data: Bytes,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Bytes, ttl: Duration) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Which backend a [`CacheStore`] is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Redis,
    Memory,
    Bypass,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Redis => "redis",
            CacheMode::Memory => "memory",
            CacheMode::Bypass => "bypass",
        }
    }
}

#[derive(Clone)]
enum Backend {
    /// Shared Redis, every round trip bounded by `timeout`
    Redis { pool: Pool, timeout: Duration },

    /// Process-local map
    Memory(Arc<DashMap<String, CachedEntry>>),

    /// Caching disabled; every read misses and every write is dropped
    Bypass,
}

/// Key/value store for serialized content responses.
///
/// The mode is fixed at construction. A Redis store that could not be reached
/// at startup is built as [`CacheMode::Bypass`] and stays that way.
#[derive(Clone)]
pub struct CacheStore {
    backend: Backend,
    ttl: Duration,
}

impl CacheStore {
    pub fn new_redis(pool: Pool, ttl: Duration, timeout: Duration) -> Self {
        Self {
            backend: Backend::Redis { pool, timeout },
            ttl,
        }
    }

    pub fn new_memory(ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(DashMap::new())),
            ttl,
        }
    }

    pub fn bypass(ttl: Duration) -> Self {
        Self {
            backend: Backend::Bypass,
            ttl,
        }
    }

    pub fn mode(&self) -> CacheMode {
        match self.backend {
            Backend::Redis { .. } => CacheMode::Redis,
            Backend::Memory(_) => CacheMode::Memory,
            Backend::Bypass => CacheMode::Bypass,
        }
    }

    /// TTL assigned to every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a key.
    ///
    /// Absent keys, expired entries and an unreachable store all read as `None`.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let result = match &self.backend {
            Backend::Bypass => None,
            Backend::Memory(map) => {
                let hit = map
                    .get(key)
                    .filter(|entry| !entry.is_expired())
                    .map(|entry| entry.data.clone());
                if hit.is_none() {
                    map.remove_if(key, |_, entry| entry.is_expired());
                }
                hit
            }
            Backend::Redis { pool, timeout } => {
                let read = bounded(*timeout, async {
                    let mut conn = pool.get().await?;
                    let value: Option<Vec<u8>> = conn.get(key).await?;
                    Ok::<_, CacheError>(value)
                })
                .await;
                match read {
                    Ok(value) => value.map(Bytes::from),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Redis GET failed, treating as miss");
                        None
                    }
                }
            }
        };

        if result.is_some() {
            tracing::debug!(key = %key, "cache hit");
            crate::metrics::record_cache_hit(self.mode().as_str());
        } else {
            tracing::debug!(key = %key, "cache miss");
            crate::metrics::record_cache_miss(self.mode().as_str());
        }
        result
    }

    /// Store raw bytes under `key` with the configured TTL.
    ///
    /// Failures are logged and swallowed.
    pub async fn set_raw(&self, key: &str, data: Bytes) {
        match &self.backend {
            Backend::Bypass => {}
            Backend::Memory(map) => {
                map.insert(key.to_string(), CachedEntry::new(data, self.ttl));
            }
            Backend::Redis { pool, timeout } => {
                let ttl_secs = self.ttl.as_secs().max(1);
                let write = bounded(*timeout, async {
                    let mut conn = pool.get().await?;
                    conn.set_ex::<_, _, ()>(key, &data[..], ttl_secs).await?;
                    Ok::<_, CacheError>(())
                })
                .await;
                match write {
                    Ok(()) => tracing::debug!(key = %key, ttl_secs, "cache set"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Redis SET failed"),
                }
            }
        }
    }

    /// Remove a single key. Failures are logged and swallowed.
    pub async fn delete(&self, key: &str) {
        match &self.backend {
            Backend::Bypass => {}
            Backend::Memory(map) => {
                map.remove(key);
            }
            Backend::Redis { pool, timeout } => {
                let removed = bounded(*timeout, async {
                    let mut conn = pool.get().await?;
                    conn.del::<_, ()>(key).await?;
                    Ok::<_, CacheError>(())
                })
                .await;
                if let Err(e) = removed {
                    tracing::warn!(key = %key, error = %e, "Redis DEL failed");
                }
            }
        }
    }

    /// Delete every key matching a glob pattern, returning how many were removed.
    ///
    /// Matching keys are removed with a single `DEL`. No matches is a no-op.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let deleted = match &self.backend {
            Backend::Bypass => 0,
            Backend::Memory(map) => {
                let before = map.len();
                map.retain(|key, _| !glob_match(pattern, key));
                before.saturating_sub(map.len())
            }
            Backend::Redis { pool, timeout } => {
                bounded(*timeout, async {
                    let mut conn = pool.get().await?;
                    let keys: Vec<String> = conn.keys(pattern).await?;
                    if keys.is_empty() {
                        return Ok::<_, CacheError>(0);
                    }
                    let deleted: usize = conn.del(&keys).await?;
                    Ok(deleted)
                })
                .await?
            }
        };
        tracing::info!(pattern = %pattern, deleted, "cache entries invalidated");
        Ok(deleted)
    }

    /// Active liveness check. Redis is pinged on every call.
    pub async fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Bypass => false,
            Backend::Memory(_) => true,
            Backend::Redis { pool, timeout } => {
                let ping = bounded(*timeout, async {
                    let mut conn = pool.get().await?;
                    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                    Ok::<_, CacheError>(pong)
                })
                .await;
                match ping {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(error = %e, "Redis PING failed");
                        false
                    }
                }
            }
        }
    }

    /// Release the underlying connections. Called once at shutdown.
    pub fn close(&self) {
        match &self.backend {
            Backend::Redis { pool, .. } => {
                pool.close();
                tracing::info!("Redis pool closed");
            }
            Backend::Memory(map) => map.clear(),
            Backend::Bypass => {}
        }
    }

    /// Number of live entries held in process (in-memory backend only).
    pub fn local_len(&self) -> Option<usize> {
        match &self.backend {
            Backend::Memory(map) => Some(map.len()),
            _ => None,
        }
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CacheError::Timeout(timeout))?
}

/// Redis-style glob matching supporting `*`, `?` and `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position after the last `*` and the text index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == text[t] {
                    p += 2;
                    t += 1;
                    continue;
                }
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
