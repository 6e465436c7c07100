//! Conservative fallback chain
//!
//! Orchestrates one detection call:
//! 1. Check emergency mode (may auto-enter from a sustained open circuit)
//! 2. Ask the circuit breaker for admission
//! 3. Walk the tier plan; first tier that produces a result wins
//! 4. Record an outcome sample and metrics
//!
//! Detector failures never reach the caller; every call returns a result
//! together with the [`FallbackDecision`] explaining it.

use crate::cache::DetectionCache;
use crate::circuit::{CircuitBreaker, CircuitSettings};
use crate::config::{ChainConfig, ModePreset, ValidatedConfig};
use crate::detector::{detect_with_timeout, PrimaryDetector};
use crate::emergency::{EmergencyModeController, EmergencyRecord};
use crate::error::{DetectorErrorKind, FallbackError};
use crate::health::{HealthMonitor, HealthSnapshot, LearningSummary, RecoveryStatus};
use crate::heuristic::HeuristicMatcher;
use crate::learning::{Insight, LearningEngine};
use crate::signature::{keywords, QuerySignature, SAMPLE_KEYWORDS};
use crate::tiers::{ConservativeDefaultTier, EmergencyTier, TierHealth, TierSelector};
use crate::types::{
    CategoryMap, CircuitState, DetectionContext, DetectionResult, FallbackDecision, FallbackTier,
    OutcomeSample,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Insights listed in a health snapshot
const SNAPSHOT_INSIGHTS: usize = 10;

/// Fault-tolerant category detection
pub struct ConservativeFallbackChain {
    config: ValidatedConfig,
    detector: Arc<dyn PrimaryDetector>,
    circuit: CircuitBreaker,
    selector: TierSelector,
    cache: DetectionCache,
    heuristic: HeuristicMatcher,
    conservative: ConservativeDefaultTier,
    emergency_tier: EmergencyTier,
    emergency: EmergencyModeController,
    health: HealthMonitor,
    learning: LearningEngine,
    /// Messages from the latest analysis, served by health reads
    latest_insights: RwLock<Vec<String>>,
}

impl std::fmt::Debug for ConservativeFallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConservativeFallbackChain")
            .field("preset", &self.config.preset())
            .field("detector", &self.detector.name())
            .field("circuit", &self.circuit.state())
            .field("emergency", &self.emergency.is_flagged())
            .finish_non_exhaustive()
    }
}

impl ConservativeFallbackChain {
    /// Create chain from validated configuration
    ///
    /// # Errors
    /// - `FallbackError::Heuristic` if the rule table fails to compile
    pub fn new(
        config: ValidatedConfig,
        detector: Arc<dyn PrimaryDetector>,
    ) -> Result<Self, FallbackError> {
        let heuristic = HeuristicMatcher::new(config.heuristic_max_query_chars())?;
        let conservative =
            ConservativeDefaultTier::new(config.safe_categories(), config.preset().as_str());
        let circuit = CircuitBreaker::new(CircuitSettings {
            failure_threshold: config.failure_threshold(),
            failure_window: config.failure_window(),
            cooldown: config.cooldown(),
        });
        let emergency =
            EmergencyModeController::new(config.emergency_trigger(), config.emergency_max_duration());

        tracing::info!(
            "Fallback chain ready: preset={}, detector={}, timeout={}ms",
            config.preset(),
            detector.name(),
            config.raw().detection_timeout_ms
        );

        Ok(Self {
            cache: DetectionCache::with_ttl(config.cache_capacity(), config.cache_ttl()),
            health: HealthMonitor::new(config.history_capacity()),
            learning: LearningEngine::new(
                config.learning_min_support(),
                config.raw().detection_timeout_ms,
            ),
            latest_insights: RwLock::new(Vec::new()),
            selector: TierSelector::new(),
            emergency_tier: EmergencyTier,
            heuristic,
            conservative,
            circuit,
            emergency,
            detector,
            config,
        })
    }

    /// Create chain from unvalidated configuration
    ///
    /// # Errors
    /// - `FallbackError::Config` if validation fails
    /// - `FallbackError::Heuristic` if the rule table fails to compile
    pub fn from_config(
        config: ChainConfig,
        detector: Arc<dyn PrimaryDetector>,
    ) -> Result<Self, FallbackError> {
        Self::new(config.validate()?, detector)
    }

    /// Create chain from a preset's values
    ///
    /// # Errors
    /// - `FallbackError::Heuristic` if the rule table fails to compile
    pub fn from_preset(
        preset: ModePreset,
        detector: Arc<dyn PrimaryDetector>,
    ) -> Result<Self, FallbackError> {
        Self::from_config(ChainConfig::preset(preset), detector)
    }

    /// Categories to activate for a query
    pub async fn get_function_categories(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> (CategoryMap, FallbackDecision) {
        let (result, decision) = self.detect_with_decision(query, context).await;
        (result.categories, decision)
    }

    /// Full detection result and the decision that produced it
    pub async fn detect_with_decision(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> (DetectionResult, FallbackDecision) {
        let started = Instant::now();
        let signature = QuerySignature::of(query);
        let mut trail: Vec<String> = Vec::new();
        let mut detector_error: Option<DetectorErrorKind> = None;

        let emergency_active = self
            .emergency
            .observe_circuit(self.circuit.open_streak_started_at(), started);
        let mut permit = if emergency_active {
            trail.push(format!(
                "emergency mode active ({})",
                self.emergency.record().trigger_reason
            ));
            None
        } else {
            let permit = self.circuit.try_acquire(started);
            if permit.is_none() {
                trail.push(format!("circuit {}, detector skipped", self.circuit.state()));
            }
            permit
        };

        let plan = self.selector.plan(TierHealth {
            emergency_active,
            primary_admitted: permit.is_some(),
        });

        let (tier, result) = 'tiers: {
            for tier in plan {
                match tier {
                    FallbackTier::Primary => {
                        let Some(permit) = permit.take() else {
                            continue;
                        };
                        let outcome = detect_with_timeout(
                            self.detector.as_ref(),
                            query,
                            context,
                            self.config.detection_timeout(),
                        )
                        .await;
                        match outcome {
                            Ok(result) => {
                                permit.success();
                                self.cache.insert(signature, result.clone()).await;
                                trail.push("primary detector succeeded".to_string());
                                break 'tiers (tier, result);
                            }
                            Err(err) => {
                                let now = Instant::now();
                                let state = permit.failure(now);
                                detector_error = Some(err.kind());
                                metrics::counter!("tdf.detector_failure", "kind" => err.kind().label())
                                    .increment(1);
                                tracing::warn!(
                                    "Primary detector {} failed (circuit {}): {}",
                                    self.detector.name(),
                                    state,
                                    err
                                );
                                trail.push(format!("primary failed: {err}"));

                                if self
                                    .emergency
                                    .observe_circuit(self.circuit.open_streak_started_at(), now)
                                {
                                    trail.push("emergency mode entered".to_string());
                                    break 'tiers (
                                        FallbackTier::Emergency,
                                        self.emergency_tier.resolve(),
                                    );
                                }
                            }
                        }
                    }
                    FallbackTier::Cached => {
                        if let Some(hit) = self.cache.get(&signature).await {
                            trail.push(format!("cache hit for {}", signature.short()));
                            break 'tiers (tier, hit);
                        }
                        trail.push("no cached result".to_string());
                    }
                    FallbackTier::Heuristic => match self.heuristic.detect(query, context) {
                        Ok(Some(result)) => {
                            trail.push("heuristic matched".to_string());
                            break 'tiers (tier, result);
                        }
                        Ok(None) => trail.push("heuristic found no signals".to_string()),
                        Err(err) => {
                            tracing::warn!("Heuristic tier failed: {}", err);
                            trail.push(format!("heuristic failed: {err}"));
                        }
                    },
                    FallbackTier::ConservativeDefault => {
                        trail.push(format!("conservative default ({})", self.config.preset()));
                        break 'tiers (tier, self.conservative.resolve());
                    }
                    FallbackTier::Emergency => {
                        break 'tiers (tier, self.emergency_tier.resolve());
                    }
                }
            }
            (
                FallbackTier::ConservativeDefault,
                self.conservative.resolve(),
            )
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        let decision =
            FallbackDecision::new(tier, trail.join("; "), self.circuit.state(), latency_ms)
                .with_detector_error(detector_error);

        self.record(query, signature, &result, &decision);
        (result, decision)
    }

    fn record(
        &self,
        query: &str,
        signature: QuerySignature,
        result: &DetectionResult,
        decision: &FallbackDecision,
    ) {
        metrics::counter!("tdf.tier_used", "tier" => decision.tier_used.label()).increment(1);
        metrics::histogram!("tdf.decision_latency_ms").record(decision.latency_ms);
        tracing::debug!(
            decision = %decision.decision_id,
            tier = %decision.tier_used,
            latency_ms = decision.latency_ms,
            "Detection decided: {}",
            decision.reason
        );

        self.health.record(OutcomeSample {
            sample_id: decision.decision_id,
            query_signature: signature,
            keywords: keywords(query, SAMPLE_KEYWORDS),
            tier_used: decision.tier_used,
            categories: result.categories.clone(),
            confidence_scores: result.confidence_scores.clone(),
            latency_ms: decision.latency_ms,
            detector_error: decision.detector_error,
            timestamp: Utc::now(),
        });
    }

    /// Force the circuit `Closed`; emergency mode is left as is
    pub fn reset_circuit_breaker(&self) {
        tracing::info!("Circuit breaker reset");
        self.circuit.reset();
    }

    /// Force the circuit `Open`
    pub fn force_open_circuit(&self) {
        tracing::info!("Circuit breaker forced open");
        self.circuit.force_open(Instant::now());
    }

    /// Leave emergency mode; the circuit is left as is
    pub fn exit_emergency_mode(&self) {
        self.emergency.exit(Instant::now());
    }

    /// Enter emergency mode
    pub fn enter_emergency_mode(&self, reason: impl Into<String>) {
        self.emergency.enter(reason, Instant::now());
    }

    /// Point-in-time health view
    ///
    /// Reads aggregates only; the insight list is the one left by the latest
    /// [`insights`](Self::insights) call or reporter tick.
    #[must_use]
    pub fn get_health_status(&self) -> HealthSnapshot {
        let now = Instant::now();
        let circuit = self.circuit.snapshot();
        let emergency_active = self.emergency.is_active(now);
        let record = self.emergency.record();

        HealthSnapshot {
            performance: self.health.performance(),
            recovery: RecoveryStatus {
                circuit_state: circuit.state,
                consecutive_failures: circuit.consecutive_failures,
                time_since_last_failure_ms: circuit
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at).as_secs_f64() * 1_000.0),
                emergency_active,
                emergency_reason: emergency_active.then_some(record.trigger_reason),
                detector_failures: self.health.detector_failures(),
            },
            cache: self.cache.stats(),
            learning: LearningSummary {
                insights: self.latest_insights.read().clone(),
            },
        }
    }

    /// Top `limit` insights from recorded outcomes
    ///
    /// Scans the whole history and refreshes the insights that
    /// [`get_health_status`](Self::get_health_status) reports.
    #[must_use]
    pub fn insights(&self, limit: usize) -> Vec<Insight> {
        let mut insights = self.learning.analyze(&self.health.samples());
        *self.latest_insights.write() = insights
            .iter()
            .take(SNAPSHOT_INSIGHTS)
            .map(|insight| insight.message.clone())
            .collect();
        insights.truncate(limit);
        insights
    }

    /// Refresh and log the top insights every `interval` until the chain is dropped
    pub fn spawn_insight_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let chain = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(chain) = chain.upgrade() else {
                    break;
                };
                for insight in chain.insights(SNAPSHOT_INSIGHTS) {
                    tracing::info!(
                        kind = ?insight.kind,
                        support = insight.support,
                        "Insight: {}",
                        insight.message
                    );
                }
            }
        })
    }

    /// Current circuit state
    #[inline]
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    /// Copy of the emergency record
    #[must_use]
    pub fn emergency_record(&self) -> EmergencyRecord {
        self.emergency.record()
    }

    /// Configuration the chain was built with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub(crate) fn detector(&self) -> &Arc<dyn PrimaryDetector> {
        &self.detector
    }

    pub(crate) fn conservative_default(&self) -> &ConservativeDefaultTier {
        &self.conservative
    }
}
