//! Simulation report rendering

use serde::Serialize;
use std::fmt::Write;
use tdf_core::{
    ChainConfig, FallbackTier, HealthSnapshot, IntegrationMode, ModePreset, PerformanceStats,
    ShadowReport,
};

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub queries: usize,
    pub mode: IntegrationMode,
    pub preset: ModePreset,
    pub detector_calls: usize,
    pub health: HealthSnapshot,
    /// Present in shadow mode
    pub shadow: Option<ShadowReport>,
    /// Detector-only numbers, present outside active mode
    pub baseline: Option<PerformanceStats>,
}

impl SimulationReport {
    /// Share of decisions answered by a fallback tier
    #[must_use]
    pub fn degraded_rate(&self) -> f64 {
        let perf = &self.health.performance;
        if perf.total_calls == 0 {
            return 0.0;
        }
        let primary = perf
            .tier_usage
            .get(&FallbackTier::Primary)
            .copied()
            .unwrap_or(0);
        #[allow(clippy::cast_precision_loss)]
        let rate = (perf.total_calls - primary) as f64 / perf.total_calls as f64;
        rate
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let perf = &self.health.performance;
        let recovery = &self.health.recovery;

        let _ = writeln!(out, "=== TDF Simulation Report ===\n");
        let _ = writeln!(out, "Seed: {}", self.seed);
        let _ = writeln!(out, "Preset: {}", self.preset);
        let _ = writeln!(out, "Mode: {}", self.mode);
        let _ = writeln!(out, "Queries: {}", self.queries);
        let _ = writeln!(out, "Detector Calls: {}", self.detector_calls);

        let _ = writeln!(out, "\n=== Chain Performance ===");
        let _ = writeln!(out, "Decisions: {}", perf.total_calls);
        let _ = writeln!(
            out,
            "Latency: p50 {:.1}ms, p95 {:.1}ms, mean {:.2}ms",
            perf.p50_ms, perf.p95_ms, perf.mean_ms
        );
        let _ = writeln!(out, "Degraded: {:.1}%", self.degraded_rate() * 100.0);
        for (tier, count) in &perf.tier_usage {
            let _ = writeln!(out, "  {:<22} {}", tier.label(), count);
        }
        if perf.dropped_samples > 0 {
            let _ = writeln!(out, "Dropped Samples: {}", perf.dropped_samples);
        }

        let _ = writeln!(out, "\n=== Recovery ===");
        let _ = writeln!(out, "Circuit: {}", recovery.circuit_state);
        let _ = writeln!(out, "Consecutive Failures: {}", recovery.consecutive_failures);
        if recovery.emergency_active {
            let _ = writeln!(
                out,
                "Emergency: ACTIVE ({})",
                recovery.emergency_reason.as_deref().unwrap_or("unknown")
            );
        } else {
            let _ = writeln!(out, "Emergency: inactive");
        }
        for (kind, count) in &recovery.detector_failures {
            let _ = writeln!(out, "  {:<22} {}", kind.label(), count);
        }

        let cache = &self.health.cache;
        let _ = writeln!(
            out,
            "Cache: {} entries (capacity {}, ttl {}s)",
            cache.entry_count, cache.max_capacity, cache.ttl_seconds
        );

        if let Some(shadow) = &self.shadow {
            let _ = writeln!(out, "\n=== Shadow Comparison ===");
            let _ = writeln!(
                out,
                "Comparisons: {} (agreement {:.1}%)",
                shadow.comparisons,
                shadow.agreement_rate * 100.0
            );
            let _ = writeln!(out, "Detector Failures: {}", shadow.detector_failures);
            for (category, count) in &shadow.divergence_by_category {
                let _ = writeln!(out, "  {:<22} {}", category.as_str(), count);
            }
        }

        if let Some(baseline) = &self.baseline {
            let _ = writeln!(out, "\n=== Detector Baseline ===");
            let _ = writeln!(
                out,
                "Calls: {}, p50 {:.1}ms, p95 {:.1}ms",
                baseline.total_calls, baseline.p50_ms, baseline.p95_ms
            );
        }

        if !self.health.learning.insights.is_empty() {
            let _ = writeln!(out, "\n=== Insights ===");
            for (i, insight) in self.health.learning.insights.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, insight);
            }
        }
        out
    }
}

/// Resolved values of every preset as aligned text
#[must_use]
pub fn presets_text() -> String {
    let mut out = String::new();
    for preset in ModePreset::ALL {
        let c = ChainConfig::preset(preset);
        let _ = writeln!(out, "[{preset}]");
        let _ = writeln!(out, "  failure_threshold              {}", c.failure_threshold);
        let _ = writeln!(out, "  failure_window_seconds         {}", c.failure_window_seconds);
        let _ = writeln!(out, "  cooldown_seconds               {}", c.cooldown_seconds);
        let _ = writeln!(out, "  detection_timeout_ms           {}", c.detection_timeout_ms);
        let _ = writeln!(out, "  cache_ttl_seconds              {}", c.cache_ttl_seconds);
        let _ = writeln!(out, "  cache_capacity                 {}", c.cache_capacity);
        let _ = writeln!(out, "  emergency_trigger_seconds      {}", c.emergency_trigger_seconds);
        let _ = writeln!(
            out,
            "  emergency_max_duration_seconds {}",
            c.emergency_max_duration_seconds
        );
        let _ = writeln!(out, "  history_capacity               {}", c.history_capacity);
        let safe: Vec<&str> = c.safe_categories.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(out, "  safe_categories                {}\n", safe.join(", "));
    }
    out
}

/// Resolved values of every preset, keyed by name
///
/// # Errors
/// Fails only if serialisation fails
pub fn presets_json() -> serde_json::Result<String> {
    let presets: std::collections::BTreeMap<&str, ChainConfig> = ModePreset::ALL
        .into_iter()
        .map(|p| (p.as_str(), ChainConfig::preset(p)))
        .collect();
    serde_json::to_string_pretty(&presets)
}
