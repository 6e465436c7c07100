//! Core types for the fallback chain
//!
//! Defines the data model shared by every tier:
//! - The static category registry
//! - Detection results and fallback decisions
//! - Tier and circuit state enums
//! - Outcome samples recorded per call

use crate::error::{ConfigError, DetectorErrorKind};
use crate::signature::QuerySignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Functional category (tool group) that can be toggled for a query
///
/// This is the complete, statically known registry. Every map keyed by
/// `Category` is therefore a subset of the registry by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Always-on base tools
    Core,
    /// Version control
    Git,
    /// Code reading and explanation
    Analysis,
    /// Error investigation
    Debug,
    /// Test authoring and execution
    Test,
    /// Linting, formatting, refactoring
    Quality,
    /// Security review
    Security,
    /// Profiling and optimisation
    Performance,
    /// Documentation
    Docs,
    /// Network and third-party services
    External,
}

impl Category {
    /// Every registered category, in registry order
    pub const ALL: [Category; 10] = [
        Category::Core,
        Category::Git,
        Category::Analysis,
        Category::Debug,
        Category::Test,
        Category::Quality,
        Category::Security,
        Category::Performance,
        Category::Docs,
        Category::External,
    ];

    /// Registry name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Core => "core",
            Category::Git => "git",
            Category::Analysis => "analysis",
            Category::Debug => "debug",
            Category::Test => "test",
            Category::Quality => "quality",
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Docs => "docs",
            Category::External => "external",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// Which categories are switched on
pub type CategoryMap = BTreeMap<Category, bool>;

/// Free-form caller context passed through to the detector
pub type DetectionContext = serde_json::Map<String, serde_json::Value>;

/// Result of a single detection, produced once per query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Category toggles
    pub categories: CategoryMap,
    /// Confidence per category (0.0 - 1.0)
    pub confidence_scores: BTreeMap<Category, f64>,
    /// Time spent producing this result
    pub detection_time_ms: f64,
    /// Provenance of each signal
    pub signals_used: BTreeMap<Category, Vec<String>>,
    /// Name of the fallback tier that produced this result, if any
    pub fallback_applied: Option<String>,
}

impl DetectionResult {
    /// Create result from category toggles
    #[inline]
    #[must_use]
    pub fn new(categories: CategoryMap) -> Self {
        Self {
            categories,
            ..Self::default()
        }
    }

    /// Create result with every given category switched on
    #[must_use]
    pub fn from_enabled(enabled: impl IntoIterator<Item = Category>) -> Self {
        Self::new(enabled.into_iter().map(|c| (c, true)).collect())
    }

    /// With confidence score (clamped to 0.0 - 1.0)
    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, category: Category, score: f64) -> Self {
        self.confidence_scores.insert(category, score.clamp(0.0, 1.0));
        self
    }

    /// With a signal recorded for a category
    #[inline]
    #[must_use]
    pub fn with_signal(mut self, category: Category, signal: impl Into<String>) -> Self {
        self.signals_used
            .entry(category)
            .or_default()
            .push(signal.into());
        self
    }

    /// With detection time
    #[inline]
    #[must_use]
    pub fn with_detection_time_ms(mut self, ms: f64) -> Self {
        self.detection_time_ms = ms;
        self
    }

    /// Mark as produced by a fallback tier
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, label: impl Into<String>) -> Self {
        self.fallback_applied = Some(label.into());
        self
    }

    /// Categories switched on
    pub fn enabled(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories
            .iter()
            .filter(|(_, on)| **on)
            .map(|(c, _)| *c)
    }

    /// Whether at least one category is on
    #[inline]
    #[must_use]
    pub fn has_enabled(&self) -> bool {
        self.categories.values().any(|on| *on)
    }
}

/// Degradation tier, ordered from most to least capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTier {
    /// Tier 1: the primary detector
    Primary,
    /// Tier 2: a recent result for the same query signature
    Cached,
    /// Tier 3: deterministic keyword matcher
    Heuristic,
    /// Tier 4: configured safe superset
    ConservativeDefault,
    /// Tier 5: minimal dependency-free set
    Emergency,
}

impl FallbackTier {
    /// All tiers in ladder order
    pub const ALL: [FallbackTier; 5] = [
        FallbackTier::Primary,
        FallbackTier::Cached,
        FallbackTier::Heuristic,
        FallbackTier::ConservativeDefault,
        FallbackTier::Emergency,
    ];

    /// Tier number (1 - 5)
    #[inline]
    #[must_use]
    pub fn level(&self) -> u8 {
        match self {
            FallbackTier::Primary => 1,
            FallbackTier::Cached => 2,
            FallbackTier::Heuristic => 3,
            FallbackTier::ConservativeDefault => 4,
            FallbackTier::Emergency => 5,
        }
    }

    /// Label used in `fallback_applied`, logs and metrics
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            FallbackTier::Primary => "primary",
            FallbackTier::Cached => "cached",
            FallbackTier::Heuristic => "heuristic",
            FallbackTier::ConservativeDefault => "conservative_default",
            FallbackTier::Emergency => "emergency",
        }
    }

    /// Whether this tier is a degradation
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        *self != FallbackTier::Primary
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.level() - 1)
    }
}

impl std::fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow to the detector
    Closed,
    /// Detector is not invoked
    Open,
    /// A single probe may reach the detector
    HalfOpen,
}

impl CircuitState {
    /// State name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique decision identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Ulid);

impl DecisionId {
    /// Generate new decision ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a result was obtained; always returned together with the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDecision {
    /// Decision ID (shared with the recorded outcome sample)
    pub decision_id: DecisionId,
    /// Tier that produced the result
    pub tier_used: FallbackTier,
    /// Human-readable trail of why this tier was used
    pub reason: String,
    /// Circuit state when the decision was returned
    pub circuit_state: CircuitState,
    /// Total time spent in the chain
    pub latency_ms: f64,
    /// Whether a fallback tier was used
    pub degraded: bool,
    /// Detector failure observed during this call, if any
    pub detector_error: Option<DetectorErrorKind>,
}

impl FallbackDecision {
    /// Create decision; `degraded` follows from the tier
    #[must_use]
    pub fn new(
        tier_used: FallbackTier,
        reason: impl Into<String>,
        circuit_state: CircuitState,
        latency_ms: f64,
    ) -> Self {
        Self {
            decision_id: DecisionId::new(),
            tier_used,
            reason: reason.into(),
            circuit_state,
            latency_ms,
            degraded: tier_used.is_degraded(),
            detector_error: None,
        }
    }

    /// With detector error kind
    #[inline]
    #[must_use]
    pub fn with_detector_error(mut self, kind: Option<DetectorErrorKind>) -> Self {
        self.detector_error = kind;
        self
    }
}

/// One recorded observation of a detection call
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSample {
    /// Matches the decision's ID
    pub sample_id: DecisionId,
    /// Normalised query hash
    pub query_signature: QuerySignature,
    /// Salient query tokens, used by the learning engine
    pub keywords: Vec<String>,
    /// Tier used
    pub tier_used: FallbackTier,
    /// Categories returned
    pub categories: CategoryMap,
    /// Confidence returned
    pub confidence_scores: BTreeMap<Category, f64>,
    /// Chain latency
    pub latency_ms: f64,
    /// Detector failure during the call, if any
    pub detector_error: Option<DetectorErrorKind>,
    /// Wall-clock time of the decision
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("nonsense".parse::<Category>().is_err());
        assert_eq!(" Git ".parse::<Category>().unwrap(), Category::Git);
    }

    #[test]
    fn tier_levels_follow_ladder_order() {
        let levels: Vec<u8> = FallbackTier::ALL.iter().map(FallbackTier::level).collect();
        assert_eq!(levels, vec![1, 2, 3, 4, 5]);
        assert!(!FallbackTier::Primary.is_degraded());
        assert!(FallbackTier::Cached.is_degraded());
    }

    #[test]
    fn detection_result_builder() {
        let result = DetectionResult::from_enabled([Category::Core, Category::Git])
            .with_confidence(Category::Git, 1.7)
            .with_signal(Category::Git, "keyword:commit")
            .with_fallback("cached");

        assert_eq!(result.confidence_scores[&Category::Git], 1.0);
        assert_eq!(result.enabled().collect::<Vec<_>>(), vec![Category::Core, Category::Git]);
        assert_eq!(result.fallback_applied.as_deref(), Some("cached"));
        assert!(result.has_enabled());
    }

    #[test]
    fn decision_degraded_follows_tier() {
        let primary = FallbackDecision::new(FallbackTier::Primary, "ok", CircuitState::Closed, 1.0);
        let heuristic =
            FallbackDecision::new(FallbackTier::Heuristic, "circuit open", CircuitState::Open, 1.0);
        assert!(!primary.degraded);
        assert!(heuristic.degraded);
    }

    #[test]
    fn category_map_serializes_with_registry_names() {
        let result = DetectionResult::from_enabled([Category::Core]);
        let json = serde_json::to_value(&result.categories).unwrap();
        assert_eq!(json, serde_json::json!({ "core": true }));
    }
}
