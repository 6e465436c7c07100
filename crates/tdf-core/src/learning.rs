//! Outcome learning
//!
//! Scans the recorded outcome samples on demand and produces ranked,
//! human-readable insights. Advisory only: nothing here feeds back into
//! tier selection.

use crate::error::DetectorErrorKind;
use crate::types::{Category, FallbackTier, OutcomeSample};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Share of a token's queries that must hit one degraded tier before it is reported
const TOKEN_DEGRADATION_MIN_RATE: f64 = 0.25;
/// Fraction of the timeout above which a PRIMARY call counts as slow
const SLOW_PRIMARY_FRACTION: f64 = 0.8;
/// Category activation insights rank below degradation insights
const ACTIVATION_WEIGHT: f64 = 0.5;

/// Kind of insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// A query token correlates with a degraded tier
    TokenDegradation,
    /// Overall share of degraded decisions
    DegradationRate,
    /// How often a category is switched on
    CategoryActivation,
    /// Mix of detector failure kinds
    DetectorFailures,
    /// PRIMARY answers close to the timeout
    SlowPrimary,
}

/// One ranked observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
    /// Ranking score; higher is more notable
    pub score: f64,
    /// Number of samples behind the observation
    pub support: usize,
}

/// Derives insights from outcome samples
#[derive(Debug, Clone, Copy)]
pub struct LearningEngine {
    min_support: usize,
    detection_timeout_ms: u64,
}

impl LearningEngine {
    /// Create engine
    ///
    /// `min_support` is the number of samples a token or aggregate needs
    /// before it is reported.
    #[must_use]
    pub fn new(min_support: usize, detection_timeout_ms: u64) -> Self {
        Self {
            min_support: min_support.max(1),
            detection_timeout_ms,
        }
    }

    /// Insights ranked by score, highest first
    #[must_use]
    pub fn analyze(&self, samples: &[OutcomeSample]) -> Vec<Insight> {
        let mut insights = Vec::new();
        if samples.is_empty() {
            return insights;
        }

        self.token_degradation(samples, &mut insights);
        self.degradation_rate(samples, &mut insights);
        self.category_activation(samples, &mut insights);
        Self::detector_failures(samples, &mut insights);
        self.slow_primary(samples, &mut insights);

        insights.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.message.cmp(&b.message))
        });
        insights
    }

    fn token_degradation(&self, samples: &[OutcomeSample], out: &mut Vec<Insight>) {
        let mut support: HashMap<&str, usize> = HashMap::new();
        let mut by_tier: HashMap<(&str, FallbackTier), usize> = HashMap::new();

        for sample in samples {
            for token in &sample.keywords {
                *support.entry(token.as_str()).or_default() += 1;
                if sample.tier_used.is_degraded() {
                    *by_tier.entry((token.as_str(), sample.tier_used)).or_default() += 1;
                }
            }
        }

        for ((token, tier), hits) in by_tier {
            let seen = support.get(token).copied().unwrap_or(0);
            if seen < self.min_support {
                continue;
            }
            let rate = ratio(hits, seen);
            if rate < TOKEN_DEGRADATION_MIN_RATE {
                continue;
            }
            out.push(Insight {
                kind: InsightKind::TokenDegradation,
                message: format!(
                    "tier {} used in {:.0}% of queries containing '{}'",
                    tier.label(),
                    rate * 100.0,
                    token
                ),
                score: rate,
                support: seen,
            });
        }
    }

    fn degradation_rate(&self, samples: &[OutcomeSample], out: &mut Vec<Insight>) {
        if samples.len() < self.min_support {
            return;
        }
        let degraded = samples.iter().filter(|s| s.tier_used.is_degraded()).count();
        let rate = ratio(degraded, samples.len());
        out.push(Insight {
            kind: InsightKind::DegradationRate,
            message: format!(
                "{:.0}% of the last {} decisions were degraded",
                rate * 100.0,
                samples.len()
            ),
            score: rate,
            support: samples.len(),
        });
    }

    fn category_activation(&self, samples: &[OutcomeSample], out: &mut Vec<Insight>) {
        if samples.len() < self.min_support {
            return;
        }
        let mut active: BTreeMap<Category, usize> = BTreeMap::new();
        for sample in samples {
            for (category, on) in &sample.categories {
                if *on && *category != Category::Core {
                    *active.entry(*category).or_default() += 1;
                }
            }
        }
        for (category, count) in active {
            let rate = ratio(count, samples.len());
            out.push(Insight {
                kind: InsightKind::CategoryActivation,
                message: format!("category {category} activated in {:.0}% of queries", rate * 100.0),
                score: rate * ACTIVATION_WEIGHT,
                support: count,
            });
        }
    }

    fn detector_failures(samples: &[OutcomeSample], out: &mut Vec<Insight>) {
        let mut kinds: BTreeMap<DetectorErrorKind, usize> = BTreeMap::new();
        for kind in samples.iter().filter_map(|s| s.detector_error) {
            *kinds.entry(kind).or_default() += 1;
        }
        let total: usize = kinds.values().sum();
        if total == 0 {
            return;
        }
        let mix = kinds
            .iter()
            .map(|(kind, n)| format!("{kind} {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push(Insight {
            kind: InsightKind::DetectorFailures,
            message: format!("detector failed in {total} of {} calls ({mix})", samples.len()),
            score: ratio(total, samples.len()),
            support: total,
        });
    }

    fn slow_primary(&self, samples: &[OutcomeSample], out: &mut Vec<Insight>) {
        #[allow(clippy::cast_precision_loss)]
        let threshold_ms = self.detection_timeout_ms as f64 * SLOW_PRIMARY_FRACTION;
        let primary: Vec<&OutcomeSample> = samples
            .iter()
            .filter(|s| s.tier_used == FallbackTier::Primary)
            .collect();
        let slow = primary.iter().filter(|s| s.latency_ms >= threshold_ms).count();
        if slow < self.min_support {
            return;
        }
        let rate = ratio(slow, primary.len());
        out.push(Insight {
            kind: InsightKind::SlowPrimary,
            message: format!(
                "{:.0}% of primary answers took over {:.0}ms (timeout {}ms)",
                rate * 100.0,
                threshold_ms,
                self.detection_timeout_ms
            ),
            score: rate,
            support: slow,
        });
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{keywords, QuerySignature};
    use crate::types::{CategoryMap, DecisionId};
    use chrono::Utc;

    fn sample(query: &str, tier: FallbackTier, latency_ms: f64) -> OutcomeSample {
        let mut categories = CategoryMap::new();
        categories.insert(Category::Core, true);
        if query.contains("debug") {
            categories.insert(Category::Debug, true);
        }
        OutcomeSample {
            sample_id: DecisionId::new(),
            query_signature: QuerySignature::of(query),
            keywords: keywords(query, crate::signature::SAMPLE_KEYWORDS),
            tier_used: tier,
            categories,
            confidence_scores: BTreeMap::new(),
            latency_ms,
            detector_error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn no_samples_no_insights() {
        assert!(LearningEngine::new(5, 150).analyze(&[]).is_empty());
    }

    #[test]
    fn token_correlated_with_degraded_tier() {
        let mut samples = Vec::new();
        for _ in 0..2 {
            samples.push(sample("debug the parser", FallbackTier::Heuristic, 1.0));
        }
        for _ in 0..3 {
            samples.push(sample("debug the lexer", FallbackTier::Primary, 1.0));
        }

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        let messages: Vec<&str> = insights.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.contains(&"tier heuristic used in 40% of queries containing 'debug'"));
    }

    #[test]
    fn tokens_below_min_support_are_ignored() {
        let samples: Vec<_> = (0..4)
            .map(|_| sample("debug the parser", FallbackTier::Heuristic, 1.0))
            .collect();

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        assert!(insights.iter().all(|i| i.kind != InsightKind::TokenDegradation));
    }

    #[test]
    fn degradation_rate_and_activation() {
        let mut samples: Vec<_> = (0..3)
            .map(|_| sample("debug it", FallbackTier::Primary, 1.0))
            .collect();
        samples.push(sample("write docs", FallbackTier::Cached, 1.0));
        samples.push(sample("write docs", FallbackTier::ConservativeDefault, 1.0));

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        let rate = insights
            .iter()
            .find(|i| i.kind == InsightKind::DegradationRate)
            .unwrap();
        assert_eq!(rate.message, "40% of the last 5 decisions were degraded");

        let activation = insights
            .iter()
            .find(|i| i.kind == InsightKind::CategoryActivation)
            .unwrap();
        assert_eq!(activation.message, "category debug activated in 60% of queries");
    }

    #[test]
    fn detector_failure_mix() {
        let mut samples = vec![sample("a query", FallbackTier::Heuristic, 150.0); 3];
        samples[0].detector_error = Some(DetectorErrorKind::Timeout);
        samples[1].detector_error = Some(DetectorErrorKind::Timeout);
        samples[2].detector_error = Some(DetectorErrorKind::Unavailable);

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        let failures = insights
            .iter()
            .find(|i| i.kind == InsightKind::DetectorFailures)
            .unwrap();
        assert_eq!(failures.message, "detector failed in 3 of 3 calls (timeout 2, unavailable 1)");
    }

    #[test]
    fn slow_primary_warning() {
        let samples: Vec<_> = (0..6)
            .map(|_| sample("refactor module", FallbackTier::Primary, 140.0))
            .collect();

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        assert!(insights.iter().any(|i| i.kind == InsightKind::SlowPrimary));
    }

    #[test]
    fn ranked_by_score() {
        let mut samples: Vec<_> = (0..5)
            .map(|_| sample("debug the parser", FallbackTier::Heuristic, 1.0))
            .collect();
        samples.push(sample("debug the parser", FallbackTier::Primary, 1.0));

        let insights = LearningEngine::new(5, 150).analyze(&samples);
        assert!(insights.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
