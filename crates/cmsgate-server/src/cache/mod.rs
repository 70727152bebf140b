//! Content cache.
//!
//! ## Backends
//!
//! - **Redis**: shared across gateway instances, the default
//! - **Memory**: process-local DashMap, for single-instance deployments
//! - **Bypass**: caching disabled
//!
//! ## Graceful Degradation
//!
//! Caching is an optimization only. If Redis cannot be reached when the
//! process starts, the store runs in bypass mode for the rest of its
//! lifetime and every read falls through to the origin. There is no
//! background reconnect.

pub mod keys;
pub mod store;

pub use keys::{CanonicalQuery, collection_key, content_type_pattern, page_key, single_key};
pub use store::{CacheError, CacheMode, CacheStore};
