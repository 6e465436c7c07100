//! CACHED tier store using moka
//!
//! Keeps recent PRIMARY results by query signature with time-based
//! expiration, so a near-identical query inside the TTL can be answered
//! without the detector.

use crate::signature::QuerySignature;
use crate::types::{DetectionResult, FallbackTier};
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// CACHED tier occupancy, reported with health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries; moka counts lazily, so this may trail recent inserts
    pub entry_count: u64,
    pub max_capacity: u64,
    pub ttl_seconds: u64,
}

/// Signature-addressed detection cache
#[derive(Debug, Clone)]
pub struct DetectionCache {
    inner: Cache<QuerySignature, Arc<DetectionResult>>,
    max_capacity: u64,
    ttl: Duration,
}

impl DetectionCache {
    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            max_capacity,
            ttl,
        }
    }

    /// Remember a PRIMARY result
    #[inline]
    pub async fn insert(&self, signature: QuerySignature, result: DetectionResult) {
        self.inner.insert(signature, Arc::new(result)).await;
    }

    /// Cached result, marked as served by the CACHED tier
    pub async fn get(&self, signature: &QuerySignature) -> Option<DetectionResult> {
        self.inner
            .get(signature)
            .await
            .map(|hit| (*hit).clone().with_fallback(FallbackTier::Cached.label()))
    }

    /// Current occupancy and limits
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            max_capacity: self.max_capacity,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

impl Default for DetectionCache {
    /// Cache with 1,000 entries and a 60s TTL
    fn default() -> Self {
        Self::with_ttl(1_000, Duration::from_secs(60))
    }
}
