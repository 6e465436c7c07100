//! Integration adapter
//!
//! Lets a host roll the chain out gradually. The mode is read once per call
//! and can be switched at run time:
//! - `Monitoring`: detector only, chain bypassed
//! - `Shadow`: detector and chain side by side, detector answer returned
//! - `Active`: chain answer returned

use crate::chain::ConservativeFallbackChain;
use crate::detector::{detect_with_timeout, PrimaryDetector};
use crate::error::ConfigError;
use crate::health::{HealthMonitor, PerformanceStats};
use crate::signature::{keywords, QuerySignature, SAMPLE_KEYWORDS};
use crate::types::{
    Category, CategoryMap, DetectionContext, DetectionResult, FallbackDecision, FallbackTier,
    OutcomeSample,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// How the adapter answers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
    /// Detector only; failures answered with the conservative default
    Monitoring,
    /// Detector answer, chain evaluated alongside for comparison
    Shadow,
    /// Chain answer
    #[default]
    Active,
}

impl IntegrationMode {
    /// Every mode
    pub const ALL: [IntegrationMode; 3] = [
        IntegrationMode::Monitoring,
        IntegrationMode::Shadow,
        IntegrationMode::Active,
    ];

    /// Mode name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationMode::Monitoring => "monitoring",
            IntegrationMode::Shadow => "shadow",
            IntegrationMode::Active => "active",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            IntegrationMode::Monitoring => 0,
            IntegrationMode::Shadow => 1,
            IntegrationMode::Active => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => IntegrationMode::Monitoring,
            1 => IntegrationMode::Shadow,
            _ => IntegrationMode::Active,
        }
    }
}

impl std::fmt::Display for IntegrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        IntegrationMode::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| ConfigError::UnknownName {
                kind: "integration mode",
                value: s.to_string(),
            })
    }
}

/// Detector vs chain comparison counts
#[derive(Debug, Default)]
struct ShadowStats {
    comparisons: AtomicU64,
    agreements: AtomicU64,
    detector_failures: AtomicU64,
    divergence_by_category: DashMap<Category, u64>,
}

/// Shadow-mode comparison summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShadowReport {
    /// Calls where both sides produced a result
    pub comparisons: u64,
    /// Comparisons with identical category toggles
    pub agreements: u64,
    /// Comparisons that differed in at least one category
    pub divergences: u64,
    /// Shadow calls where the detector failed
    pub detector_failures: u64,
    pub agreement_rate: f64,
    /// Disagreements per category
    pub divergence_by_category: BTreeMap<Category, u64>,
}

/// Mode-switchable front door to the chain
pub struct IntegrationAdapter {
    mode: AtomicU8,
    chain: Arc<ConservativeFallbackChain>,
    detector: Arc<dyn PrimaryDetector>,
    baseline: HealthMonitor,
    shadow: ShadowStats,
}

impl std::fmt::Debug for IntegrationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationAdapter")
            .field("mode", &self.mode())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl IntegrationAdapter {
    /// Create adapter around a chain, using the chain's detector
    #[must_use]
    pub fn new(chain: Arc<ConservativeFallbackChain>, mode: IntegrationMode) -> Self {
        let detector = Arc::clone(chain.detector());
        let capacity = chain.config().history_capacity();
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            chain,
            detector,
            baseline: HealthMonitor::new(capacity),
            shadow: ShadowStats::default(),
        }
    }

    /// Current mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> IntegrationMode {
        IntegrationMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Switch mode; takes effect on the next call
    pub fn set_mode(&self, mode: IntegrationMode) {
        let previous = IntegrationMode::from_u8(self.mode.swap(mode.to_u8(), Ordering::AcqRel));
        if previous != mode {
            tracing::info!("Integration mode changed: {} -> {}", previous, mode);
        }
    }

    /// Categories to activate for a query, per the current mode
    pub async fn get_function_categories(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> (CategoryMap, FallbackDecision) {
        match self.mode() {
            IntegrationMode::Active => self.chain.get_function_categories(query, context).await,
            IntegrationMode::Monitoring => self.monitor(query, context).await,
            IntegrationMode::Shadow => self.shadow(query, context).await,
        }
    }

    async fn monitor(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> (CategoryMap, FallbackDecision) {
        let started = Instant::now();
        let outcome = detect_with_timeout(
            self.detector.as_ref(),
            query,
            context,
            self.chain.config().detection_timeout(),
        )
        .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let (tier, result, reason, error) = match outcome {
            Ok(result) => (
                FallbackTier::Primary,
                result,
                "monitoring: detector answered".to_string(),
                None,
            ),
            Err(err) => {
                tracing::warn!("Monitoring: detector failed: {}", err);
                (
                    FallbackTier::ConservativeDefault,
                    self.chain.conservative_default().resolve(),
                    format!("monitoring: detector failed: {err}"),
                    Some(err.kind()),
                )
            }
        };

        let decision = FallbackDecision::new(tier, reason, self.chain.circuit_state(), latency_ms)
            .with_detector_error(error);
        self.record_baseline(query, &result, &decision);
        (result.categories, decision)
    }

    async fn shadow(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> (CategoryMap, FallbackDecision) {
        let started = Instant::now();
        let (direct, (chain_categories, chain_decision)) = tokio::join!(
            detect_with_timeout(
                self.detector.as_ref(),
                query,
                context,
                self.chain.config().detection_timeout(),
            ),
            self.chain.get_function_categories(query, context),
        );
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let result = match direct {
            Ok(result) => result,
            Err(err) => {
                self.shadow.detector_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Shadow: detector failed ({}), returning chain result from tier {}",
                    err,
                    chain_decision.tier_used
                );
                return (chain_categories, chain_decision);
            }
        };

        let diverging = diverging_categories(&result.categories, &chain_categories);
        self.shadow.comparisons.fetch_add(1, Ordering::Relaxed);
        if diverging.is_empty() {
            self.shadow.agreements.fetch_add(1, Ordering::Relaxed);
        } else {
            for category in &diverging {
                *self.shadow.divergence_by_category.entry(*category).or_insert(0) += 1;
            }
            tracing::info!(
                "Shadow divergence on {:?} (chain tier {})",
                diverging,
                chain_decision.tier_used
            );
        }

        let decision = FallbackDecision::new(
            FallbackTier::Primary,
            format!("shadow: detector answered; chain used {}", chain_decision.tier_used),
            self.chain.circuit_state(),
            latency_ms,
        );
        self.record_baseline(query, &result, &decision);
        (result.categories, decision)
    }

    fn record_baseline(&self, query: &str, result: &DetectionResult, decision: &FallbackDecision) {
        self.baseline.record(OutcomeSample {
            sample_id: decision.decision_id,
            query_signature: QuerySignature::of(query),
            keywords: keywords(query, SAMPLE_KEYWORDS),
            tier_used: decision.tier_used,
            categories: result.categories.clone(),
            confidence_scores: result.confidence_scores.clone(),
            latency_ms: decision.latency_ms,
            detector_error: decision.detector_error,
            timestamp: Utc::now(),
        });
    }

    /// Shadow comparison counts so far
    #[must_use]
    pub fn shadow_report(&self) -> ShadowReport {
        let comparisons = self.shadow.comparisons.load(Ordering::Relaxed);
        let agreements = self.shadow.agreements.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let agreement_rate = if comparisons == 0 {
            0.0
        } else {
            agreements as f64 / comparisons as f64
        };
        ShadowReport {
            comparisons,
            agreements,
            divergences: comparisons - agreements,
            detector_failures: self.shadow.detector_failures.load(Ordering::Relaxed),
            agreement_rate,
            divergence_by_category: self
                .shadow
                .divergence_by_category
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    /// Detector-only performance seen in monitoring and shadow modes
    #[must_use]
    pub fn baseline_health(&self) -> PerformanceStats {
        self.baseline.performance()
    }

    /// Wrapped chain
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &Arc<ConservativeFallbackChain> {
        &self.chain
    }
}

/// Categories switched on in exactly one of the maps
fn diverging_categories(left: &CategoryMap, right: &CategoryMap) -> Vec<Category> {
    Category::ALL
        .into_iter()
        .filter(|c| {
            left.get(c).copied().unwrap_or(false) != right.get(c).copied().unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(enabled: &[Category]) -> CategoryMap {
        enabled.iter().map(|c| (*c, true)).collect()
    }

    #[test]
    fn mode_parses_and_round_trips() {
        for mode in IntegrationMode::ALL {
            assert_eq!(mode.as_str().parse::<IntegrationMode>().unwrap(), mode);
            assert_eq!(IntegrationMode::from_u8(mode.to_u8()), mode);
        }
        assert!("passive".parse::<IntegrationMode>().is_err());
        assert_eq!(IntegrationMode::default(), IntegrationMode::Active);
    }

    #[test]
    fn missing_and_false_are_equal() {
        let mut left = map(&[Category::Core]);
        left.insert(Category::Git, false);
        let right = map(&[Category::Core]);
        assert!(diverging_categories(&left, &right).is_empty());
    }

    #[test]
    fn divergence_lists_differing_categories() {
        let left = map(&[Category::Core, Category::Git]);
        let right = map(&[Category::Core, Category::Docs]);
        assert_eq!(
            diverging_categories(&left, &right),
            vec![Category::Git, Category::Docs]
        );
    }
}
