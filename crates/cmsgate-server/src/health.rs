//! Readiness aggregation over the cache store and the origin.
//!
//! The origin is a hard dependency; the cache is informational and never
//! downgrades the overall verdict.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::CacheStore;
use crate::origin::OriginClient;

pub const CACHE_CHECK: &str = "cache";
pub const ORIGIN_CHECK: &str = "origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Unavailable,
}

impl From<bool> for CheckStatus {
    fn from(up: bool) -> Self {
        if up {
            CheckStatus::Ok
        } else {
            CheckStatus::Unavailable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Ok,
    Degraded,
}

/// Result of one readiness check. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: OverallStatus,
    pub checks: BTreeMap<&'static str, CheckStatus>,
}

impl HealthStatus {
    /// Apply the readiness policy to raw check results.
    pub fn from_checks(cache: CheckStatus, origin: CheckStatus) -> Self {
        let status = match origin {
            CheckStatus::Ok => OverallStatus::Ok,
            CheckStatus::Unavailable => OverallStatus::Degraded,
        };
        let checks = BTreeMap::from([(CACHE_CHECK, cache), (ORIGIN_CHECK, origin)]);
        Self { status, checks }
    }

    pub fn is_ready(&self) -> bool {
        self.status == OverallStatus::Ok
    }
}

#[derive(Clone)]
pub struct HealthAggregator {
    cache: CacheStore,
    origin: OriginClient,
}

impl HealthAggregator {
    pub fn new(cache: CacheStore, origin: OriginClient) -> Self {
        Self { cache, origin }
    }

    /// Probe both dependencies concurrently and combine the results.
    pub async fn readiness(&self) -> HealthStatus {
        let (cache_up, origin_up) = tokio::join!(self.cache.is_connected(), self.origin.is_healthy());
        let health = HealthStatus::from_checks(cache_up.into(), origin_up.into());
        if !health.is_ready() {
            tracing::warn!(checks = ?health.checks, "readiness degraded");
        }
        health
    }
}
