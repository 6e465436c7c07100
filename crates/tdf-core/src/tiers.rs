//! Five-tier degradation policy
//!
//! The selector owns the ladder order and decides which tiers are candidates
//! for a call; the chain walks the plan and stops at the first tier that
//! produces a result. A tier that fails is never retried within the call.
//!
//! The two terminal tiers live here as well: CONSERVATIVE_DEFAULT (the
//! configured safe superset) and EMERGENCY (`core` only). Both are pure and
//! cannot fail.

use crate::types::{Category, DetectionResult, FallbackTier};

/// Inputs to tier planning for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierHealth {
    /// Emergency mode is active
    pub emergency_active: bool,
    /// The circuit breaker admitted a detector call
    pub primary_admitted: bool,
}

/// Ordered degradation ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSelector {
    ladder: Vec<FallbackTier>,
}

impl TierSelector {
    /// Standard ladder: PRIMARY, CACHED, HEURISTIC, CONSERVATIVE_DEFAULT
    #[must_use]
    pub fn new() -> Self {
        Self {
            ladder: vec![
                FallbackTier::Primary,
                FallbackTier::Cached,
                FallbackTier::Heuristic,
                FallbackTier::ConservativeDefault,
            ],
        }
    }

    /// Candidate tiers for a call, lowest-numbered first
    ///
    /// Emergency bypasses everything. Otherwise PRIMARY is dropped when the
    /// breaker did not admit the call. The plan always ends with a tier that
    /// cannot fail.
    #[must_use]
    pub fn plan(&self, health: TierHealth) -> Vec<FallbackTier> {
        if health.emergency_active {
            return vec![FallbackTier::Emergency];
        }
        self.ladder
            .iter()
            .copied()
            .filter(|tier| *tier != FallbackTier::Primary || health.primary_admitted)
            .collect()
    }
}

impl Default for TierSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Confidence reported for safe-set categories
const CONSERVATIVE_CONFIDENCE: f64 = 0.5;

/// CONSERVATIVE_DEFAULT tier: safe superset of categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConservativeDefaultTier {
    safe: Vec<Category>,
    source: String,
}

impl ConservativeDefaultTier {
    /// Create tier from a safe set (validated to contain `core`)
    #[must_use]
    pub fn new(safe: &[Category], source: impl Into<String>) -> Self {
        let mut safe = safe.to_vec();
        if !safe.contains(&Category::Core) {
            safe.insert(0, Category::Core);
        }
        Self {
            safe,
            source: source.into(),
        }
    }

    /// Categories switched on
    #[inline]
    #[must_use]
    pub fn categories(&self) -> &[Category] {
        &self.safe
    }

    /// Produce the safe result; every registry category is an explicit toggle
    #[must_use]
    pub fn resolve(&self) -> DetectionResult {
        let mut result = DetectionResult::new(
            Category::ALL
                .iter()
                .map(|c| (*c, self.safe.contains(c)))
                .collect(),
        );
        for category in &self.safe {
            result = result
                .with_confidence(*category, CONSERVATIVE_CONFIDENCE)
                .with_signal(*category, format!("preset:{}", self.source));
        }
        result.with_fallback(FallbackTier::ConservativeDefault.label())
    }
}

/// EMERGENCY tier: `{core: true}` and nothing else
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmergencyTier;

impl EmergencyTier {
    /// Produce the minimal result
    #[must_use]
    pub fn resolve(&self) -> DetectionResult {
        DetectionResult::from_enabled([Category::Core])
            .with_confidence(Category::Core, 1.0)
            .with_signal(Category::Core, "emergency")
            .with_fallback(FallbackTier::Emergency.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_plan_when_admitted() {
        let plan = TierSelector::new().plan(TierHealth {
            emergency_active: false,
            primary_admitted: true,
        });
        assert_eq!(
            plan,
            vec![
                FallbackTier::Primary,
                FallbackTier::Cached,
                FallbackTier::Heuristic,
                FallbackTier::ConservativeDefault,
            ]
        );
    }

    #[test]
    fn primary_skipped_when_not_admitted() {
        let plan = TierSelector::new().plan(TierHealth {
            emergency_active: false,
            primary_admitted: false,
        });
        assert_eq!(plan.first(), Some(&FallbackTier::Cached));
        assert!(!plan.contains(&FallbackTier::Primary));
    }

    #[test]
    fn emergency_bypasses_everything() {
        for primary_admitted in [true, false] {
            let plan = TierSelector::new().plan(TierHealth {
                emergency_active: true,
                primary_admitted,
            });
            assert_eq!(plan, vec![FallbackTier::Emergency]);
        }
    }

    #[test]
    fn plans_are_ordered_by_level() {
        let plan = TierSelector::new().plan(TierHealth {
            emergency_active: false,
            primary_admitted: true,
        });
        assert!(plan.windows(2).all(|w| w[0].level() < w[1].level()));
    }

    #[test]
    fn conservative_default_contains_core_and_safe_set() {
        let tier = ConservativeDefaultTier::new(&[Category::Git, Category::Debug], "conservative");
        let result = tier.resolve();

        assert!(result.categories[&Category::Core]);
        assert!(result.categories[&Category::Git]);
        assert!(result.categories[&Category::Debug]);
        assert!(!result.categories[&Category::Security]);
        assert_eq!(result.categories.len(), Category::ALL.len());
        assert_eq!(result.fallback_applied.as_deref(), Some("conservative_default"));
    }

    #[test]
    fn emergency_is_core_only() {
        let result = EmergencyTier.resolve();
        assert_eq!(result.categories.len(), 1);
        assert_eq!(result.categories.get(&Category::Core), Some(&true));
        assert_eq!(result.fallback_applied.as_deref(), Some("emergency"));
    }
}
