//! Health monitoring
//!
//! Every call's [`OutcomeSample`] lands in a fixed-capacity ring buffer, and
//! running aggregates (call count, per-tier counts, latency histogram,
//! detector failure mix) are kept in atomics. Recording is O(1) and never
//! blocks: a sample that meets a contended slot is dropped and counted.
//! Snapshots skip contended slots the same way.

use crate::cache::CacheStats;
use crate::error::DetectorErrorKind;
use crate::types::{CircuitState, FallbackTier, OutcomeSample};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Upper bounds (ms) of the latency histogram buckets; the last bucket is open
const LATENCY_BUCKETS_MS: [f64; 16] = [
    0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 150.0, 200.0, 300.0, 500.0, 1_000.0, 2_000.0,
    5_000.0,
    f64::INFINITY,
];

/// Fixed-capacity circular buffer with an atomic write cursor
#[derive(Debug)]
pub struct OutcomeRing {
    slots: Box<[Mutex<Option<OutcomeSample>>]>,
    cursor: AtomicUsize,
}

impl OutcomeRing {
    /// Create ring with `capacity` slots (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Store a sample, overwriting the oldest; `false` if the slot was contended
    pub fn push(&self, sample: OutcomeSample) -> bool {
        let idx = self.cursor.fetch_add(1, Ordering::AcqRel) % self.slots.len();
        match self.slots[idx].try_lock() {
            Some(mut slot) => {
                *slot = Some(sample);
                true
            }
            None => false,
        }
    }

    /// Samples currently held, oldest first
    ///
    /// Slots being written are skipped, so a reader never stalls a writer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OutcomeSample> {
        let cap = self.slots.len();
        let start = self.cursor.load(Ordering::Acquire) % cap;
        (0..cap)
            .filter_map(|offset| {
                self.slots[(start + offset) % cap]
                    .try_lock()
                    .and_then(|slot| slot.clone())
            })
            .collect()
    }
}

/// Latency and tier usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_calls: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub mean_ms: f64,
    /// Calls per tier; tiers never used are absent
    pub tier_usage: BTreeMap<FallbackTier, u64>,
    /// Samples lost to slot contention
    pub dropped_samples: u64,
}

/// Circuit and emergency status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub time_since_last_failure_ms: Option<f64>,
    pub emergency_active: bool,
    pub emergency_reason: Option<String>,
    /// Detector failures per kind; kinds never seen are absent
    pub detector_failures: BTreeMap<DetectorErrorKind, u64>,
}

/// Learned insights
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningSummary {
    pub insights: Vec<String>,
}

/// Point-in-time health view; computed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub performance: PerformanceStats,
    pub recovery: RecoveryStatus,
    pub cache: CacheStats,
    pub learning: LearningSummary,
}

/// Aggregates outcome samples
#[derive(Debug)]
pub struct HealthMonitor {
    ring: OutcomeRing,
    total: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    tier_counts: [AtomicU64; FallbackTier::ALL.len()],
    failure_counts: [AtomicU64; DetectorErrorKind::ALL.len()],
    dropped: AtomicU64,
}

impl HealthMonitor {
    /// Create monitor retaining `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: OutcomeRing::new(capacity),
            total: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            tier_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            failure_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Ingest one sample; never fails, never blocks
    pub fn record(&self, sample: OutcomeSample) {
        let latency_ms = if sample.latency_ms.is_finite() {
            sample.latency_ms.max(0.0)
        } else {
            0.0
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let latency_us = (latency_ms * 1_000.0).round() as u64;

        self.total.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_for(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.tier_counts[sample.tier_used.index()].fetch_add(1, Ordering::Relaxed);
        if let Some(kind) = sample.detector_error {
            self.failure_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
        }

        if !self.ring.push(sample) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Running performance aggregates
    #[must_use]
    pub fn performance(&self) -> PerformanceStats {
        let total = self.total.load(Ordering::Relaxed);
        let buckets: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let max_ms = micros_to_ms(self.latency_max_us.load(Ordering::Relaxed));

        let mean_ms = if total == 0 {
            0.0
        } else {
            micros_to_ms(self.latency_sum_us.load(Ordering::Relaxed)) / count_to_f64(total)
        };

        let tier_usage = FallbackTier::ALL
            .iter()
            .filter_map(|tier| {
                let n = self.tier_counts[tier.index()].load(Ordering::Relaxed);
                (n > 0).then_some((*tier, n))
            })
            .collect();

        PerformanceStats {
            total_calls: total,
            p50_ms: percentile(&buckets, 0.50, max_ms),
            p95_ms: percentile(&buckets, 0.95, max_ms),
            mean_ms,
            tier_usage,
            dropped_samples: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Detector failures per kind
    #[must_use]
    pub fn detector_failures(&self) -> BTreeMap<DetectorErrorKind, u64> {
        DetectorErrorKind::ALL
            .iter()
            .filter_map(|kind| {
                let n = self.failure_counts[kind.index()].load(Ordering::Relaxed);
                (n > 0).then_some((*kind, n))
            })
            .collect()
    }

    /// Retained samples, oldest first
    #[must_use]
    pub fn samples(&self) -> Vec<OutcomeSample> {
        self.ring.snapshot()
    }
}

fn bucket_for(latency_ms: f64) -> usize {
    LATENCY_BUCKETS_MS
        .iter()
        .position(|upper| latency_ms <= *upper)
        .unwrap_or(LATENCY_BUCKETS_MS.len() - 1)
}

/// Upper bound of the bucket holding the `p` quantile, capped at the observed max
fn percentile(buckets: &[u64], p: f64, max_ms: f64) -> f64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((count_to_f64(total) * p).ceil() as u64).max(1);

    let mut seen = 0u64;
    for (idx, count) in buckets.iter().enumerate() {
        seen += count;
        if seen >= rank {
            return LATENCY_BUCKETS_MS[idx].min(max_ms);
        }
    }
    max_ms
}

#[allow(clippy::cast_precision_loss)]
fn count_to_f64(n: u64) -> f64 {
    n as f64
}

fn micros_to_ms(us: u64) -> f64 {
    count_to_f64(us) / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::QuerySignature;
    use crate::types::{CategoryMap, DecisionId};
    use chrono::Utc;

    fn sample(tier: FallbackTier, latency_ms: f64) -> OutcomeSample {
        OutcomeSample {
            sample_id: DecisionId::new(),
            query_signature: QuerySignature::of("q"),
            keywords: vec![],
            tier_used: tier,
            categories: CategoryMap::new(),
            confidence_scores: BTreeMap::new(),
            latency_ms,
            detector_error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_monitor_reports_zeroes() {
        let monitor = HealthMonitor::new(10);
        let perf = monitor.performance();

        assert_eq!(perf.total_calls, 0);
        assert_eq!(perf.p50_ms, 0.0);
        assert_eq!(perf.p95_ms, 0.0);
        assert_eq!(perf.mean_ms, 0.0);
        assert!(perf.tier_usage.is_empty());
        assert!(monitor.detector_failures().is_empty());
        assert!(monitor.samples().is_empty());
    }

    #[test]
    fn aggregates_latency_and_tiers() {
        let monitor = HealthMonitor::new(100);
        for _ in 0..19 {
            monitor.record(sample(FallbackTier::Primary, 1.0));
        }
        monitor.record(sample(FallbackTier::Heuristic, 180.0));

        let perf = monitor.performance();
        assert_eq!(perf.total_calls, 20);
        assert_eq!(perf.p50_ms, 1.0);
        assert_eq!(perf.p95_ms, 1.0);
        assert!((perf.mean_ms - 9.95).abs() < 1e-9);
        assert_eq!(perf.tier_usage[&FallbackTier::Primary], 19);
        assert_eq!(perf.tier_usage[&FallbackTier::Heuristic], 1);
        assert!(!perf.tier_usage.contains_key(&FallbackTier::Cached));
    }

    #[test]
    fn tail_latency_lands_in_upper_bucket() {
        let monitor = HealthMonitor::new(100);
        for _ in 0..10 {
            monitor.record(sample(FallbackTier::Primary, 3.0));
        }
        for _ in 0..10 {
            monitor.record(sample(FallbackTier::Primary, 120.0));
        }
        let perf = monitor.performance();
        assert_eq!(perf.p50_ms, 5.0);
        assert_eq!(perf.p95_ms, 120.0);
    }

    #[test]
    fn counts_detector_failures() {
        let monitor = HealthMonitor::new(10);
        let mut s = sample(FallbackTier::Heuristic, 150.0);
        s.detector_error = Some(DetectorErrorKind::Timeout);
        monitor.record(s.clone());
        monitor.record(s);

        let failures = monitor.detector_failures();
        assert_eq!(failures[&DetectorErrorKind::Timeout], 2);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn ring_keeps_most_recent() {
        let monitor = HealthMonitor::new(3);
        for latency in [1.0, 2.0, 3.0, 4.0, 5.0] {
            monitor.record(sample(FallbackTier::Primary, latency));
        }

        let latencies: Vec<f64> = monitor.samples().iter().map(|s| s.latency_ms).collect();
        assert_eq!(latencies, vec![3.0, 4.0, 5.0]);
        assert_eq!(monitor.performance().total_calls, 5);
    }

    #[test]
    fn contended_slot_drops_sample() {
        let ring = OutcomeRing::new(1);
        let guard = ring.slots[0].lock();
        assert!(!ring.push(sample(FallbackTier::Primary, 1.0)));
        drop(guard);
        assert!(ring.push(sample(FallbackTier::Primary, 1.0)));
    }

    #[test]
    fn snapshot_skips_locked_slot() {
        let ring = OutcomeRing::new(3);
        for latency in [1.0, 2.0, 3.0] {
            assert!(ring.push(sample(FallbackTier::Primary, latency)));
        }

        let guard = ring.slots[1].lock();
        let latencies: Vec<f64> = ring.snapshot().iter().map(|s| s.latency_ms).collect();
        assert_eq!(latencies, vec![1.0, 3.0]);
        drop(guard);
        assert_eq!(ring.snapshot().len(), 3);
    }

    #[test]
    fn non_finite_latency_is_clamped() {
        let monitor = HealthMonitor::new(2);
        monitor.record(sample(FallbackTier::Primary, f64::NAN));
        assert_eq!(monitor.performance().mean_ms, 0.0);
    }
}
