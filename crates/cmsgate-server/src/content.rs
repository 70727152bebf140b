//! Cache-aside content retrieval.
//!
//! ```text
//! read ─▶ key ─▶ CacheStore::get ──hit──▶ payload (Hit)
//!                     │
//!                    miss
//!                     ▼
//!              OriginClient::fetch ──err──▶ OriginError (nothing cached)
//!                     │
//!                     ▼
//!              CacheStore::set_raw ─▶ payload (Miss)
//! ```
//!
//! Previews skip the cache in both directions.

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::cache::{self, CacheError, CacheStore, CanonicalQuery};
use crate::origin::{OriginClient, OriginError};

/// Where a payload came from. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served from the cache store
    Hit,
    /// Fetched from the origin (and written back)
    Miss,
    /// Fetched from the origin with the cache deliberately skipped
    Bypass,
}

impl Provenance {
    /// Value for the `X-Cache-Status` response header.
    pub fn header_value(&self) -> &'static str {
        match self {
            Provenance::Hit => "HIT",
            Provenance::Miss => "MISS",
            Provenance::Bypass => "BYPASS",
        }
    }
}

/// Result of a content read: opaque JSON bytes plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOutcome {
    pub payload: Bytes,
    pub provenance: Provenance,
}

impl RetrievalOutcome {
    pub fn is_hit(&self) -> bool {
        self.provenance == Provenance::Hit
    }
}

/// Composes the cache store and the origin client into read operations.
///
/// Owns the cache key policy; does not own the lifecycle of either dependency.
#[derive(Clone)]
pub struct ContentService {
    cache: CacheStore,
    origin: OriginClient,
}

impl ContentService {
    pub fn new(cache: CacheStore, origin: OriginClient) -> Self {
        Self { cache, origin }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// List a collection: `collection:{type}:{query}`.
    #[instrument(skip(self, query), fields(query = %query))]
    pub async fn get_collection(
        &self,
        content_type: &str,
        query: &CanonicalQuery,
    ) -> Result<RetrievalOutcome, OriginError> {
        let key = cache::collection_key(content_type, query);
        let endpoint = self.origin.collection_endpoint(content_type, query);
        self.read_through(&key, &endpoint).await
    }

    /// Fetch a single item by id: `single:{type}:{id}:{query}`.
    #[instrument(skip(self, query), fields(query = %query))]
    pub async fn get_single(
        &self,
        content_type: &str,
        id: &str,
        query: &CanonicalQuery,
    ) -> Result<RetrievalOutcome, OriginError> {
        let key = cache::single_key(content_type, id, query);
        let endpoint = self.origin.single_endpoint(content_type, id, query);
        self.read_through(&key, &endpoint).await
    }

    /// Fetch a page by slug: `page:{slug}`.
    #[instrument(skip(self))]
    pub async fn get_page_by_slug(&self, slug: &str) -> Result<RetrievalOutcome, OriginError> {
        let key = cache::page_key(slug);
        let endpoint = self.origin.page_endpoint(slug);
        self.read_through(&key, &endpoint).await
    }

    /// Fetch draft content. Never read from or written to the cache.
    #[instrument(skip(self))]
    pub async fn get_preview(
        &self,
        content_type: &str,
        id: &str,
    ) -> Result<RetrievalOutcome, OriginError> {
        let endpoint = self.origin.preview_endpoint(content_type, id);
        let payload = self.origin.fetch(&endpoint).await?;
        Ok(RetrievalOutcome {
            payload,
            provenance: Provenance::Bypass,
        })
    }

    /// Drop cached collection and single-item entries for a content type.
    ///
    /// Deletes keys matching `*:{type}:*`. Page entries (`page:{slug}`) are
    /// left alone even when the page embeds this content type.
    pub async fn invalidate_cache(&self, content_type: &str) -> Result<usize, CacheError> {
        let pattern = cache::content_type_pattern(content_type);
        let deleted = self.cache.delete_pattern(&pattern).await?;
        crate::metrics::record_cache_invalidation(content_type, deleted);
        Ok(deleted)
    }

    async fn read_through(
        &self,
        key: &str,
        endpoint: &str,
    ) -> Result<RetrievalOutcome, OriginError> {
        if let Some(payload) = self.cache.get(key).await {
            return Ok(RetrievalOutcome {
                payload,
                provenance: Provenance::Hit,
            });
        }

        // Errors propagate untouched; negative results are never cached.
        let payload = self.origin.fetch(endpoint).await?;
        self.cache.set_raw(key, payload.clone()).await;
        debug!(key = %key, bytes = payload.len(), "origin response cached");

        Ok(RetrievalOutcome {
            payload,
            provenance: Provenance::Miss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_header_values() {
        assert_eq!(Provenance::Hit.header_value(), "HIT");
        assert_eq!(Provenance::Miss.header_value(), "MISS");
        assert_eq!(Provenance::Bypass.header_value(), "BYPASS");
    }
}
