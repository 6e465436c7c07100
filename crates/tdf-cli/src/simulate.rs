//! Flaky-detector simulation
//!
//! Drives the chain through the integration adapter with a seeded detector
//! that fails or hangs at configurable rates, then collects the resulting
//! health view.

use anyhow::{bail, Context};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tdf_core::{
    Category, ChainConfig, ConservativeFallbackChain, DetectionContext, DetectionResult,
    DetectorError, IntegrationAdapter, IntegrationMode, ModePreset, PrimaryDetector,
    ValidatedConfig,
};

use crate::report::SimulationReport;

/// Labelled queries the simulated detector "knows"
pub const CORPUS: &[(&str, &[Category])] = &[
    ("show me the git log for the last week", &[Category::Git]),
    ("why does this test fail with a null pointer", &[Category::Test, Category::Debug]),
    ("explain how the scheduler module works", &[Category::Analysis]),
    ("refactor this function and fix the lint warnings", &[Category::Quality]),
    ("check the login handler for sql injection", &[Category::Security]),
    ("the build got slow, profile the parser", &[Category::Performance]),
    ("write a readme section for the config file", &[Category::Docs]),
    ("call the weather api and cache the response", &[Category::External]),
    ("rebase my branch onto main and resolve the conflict", &[Category::Git]),
    ("add unit tests for the tokenizer", &[Category::Test]),
    ("hello, what can you do", &[]),
    ("debug the crash in the upload worker", &[Category::Debug]),
];

/// Longest simulated detector latency for a healthy answer
const MAX_HEALTHY_LATENCY_MS: u64 = 5;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub queries: usize,
    /// Probability a detector call fails outright
    pub failure_rate: f64,
    /// Probability a detector call never completes
    pub hang_rate: f64,
    pub seed: u64,
    pub mode: IntegrationMode,
    pub chain: ValidatedConfig,
}

impl SimulationConfig {
    /// Checks rates are probabilities
    ///
    /// # Errors
    /// Fails if either rate is outside 0.0 - 1.0 or their sum exceeds 1.0
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, rate) in [("failure-rate", self.failure_rate), ("hang-rate", self.hang_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{name} must be between 0 and 1, got {rate}");
            }
        }
        if self.failure_rate + self.hang_rate > 1.0 {
            bail!("failure-rate + hang-rate must not exceed 1");
        }
        Ok(())
    }
}

/// Seeded detector that answers from [`CORPUS`]
#[derive(Debug)]
pub struct SimulatedDetector {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    hang_rate: f64,
    calls: AtomicUsize,
}

enum Roll {
    Fail(DetectorError),
    Hang,
    Answer(Duration),
}

impl SimulatedDetector {
    #[must_use]
    pub fn new(seed: u64, failure_rate: f64, hang_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate,
            hang_rate,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Roll {
        let mut rng = self.rng.lock();
        let p: f64 = rng.random();
        if p < self.failure_rate {
            let err = match rng.random_range(0..3) {
                0 => DetectorError::Unavailable("connection reset".to_string()),
                1 => DetectorError::ResourceExhausted("model out of memory".to_string()),
                _ => DetectorError::Internal("malformed model output".to_string()),
            };
            Roll::Fail(err)
        } else if p < self.failure_rate + self.hang_rate {
            Roll::Hang
        } else {
            Roll::Answer(Duration::from_millis(rng.random_range(0..=MAX_HEALTHY_LATENCY_MS)))
        }
    }
}

#[async_trait::async_trait]
impl PrimaryDetector for SimulatedDetector {
    async fn detect(
        &self,
        query: &str,
        _context: Option<&DetectionContext>,
    ) -> Result<DetectionResult, DetectorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = match self.roll() {
            Roll::Fail(err) => return Err(err),
            Roll::Hang => std::future::pending().await,
            Roll::Answer(latency) => latency,
        };
        tokio::time::sleep(latency).await;

        let labels = CORPUS
            .iter()
            .find(|(q, _)| *q == query)
            .map_or(&[][..], |(_, labels)| *labels);
        let mut result = DetectionResult::new(Category::ALL.iter().map(|c| (*c, false)).collect())
            .with_confidence(Category::Core, 1.0);
        result.categories.insert(Category::Core, true);
        for category in labels {
            result.categories.insert(*category, true);
            result = result
                .with_confidence(*category, 0.9)
                .with_signal(*category, "model:simulated");
        }
        #[allow(clippy::cast_precision_loss)]
        let ms = latency.as_millis() as f64;
        Ok(result.with_detection_time_ms(ms))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Configuration from a TOML file, or from a preset when no file is given
///
/// # Errors
/// Fails if the file cannot be read or the values do not validate
pub fn resolve_config(preset: ModePreset, file: Option<&Path>) -> anyhow::Result<ValidatedConfig> {
    let config = match file {
        Some(path) => ChainConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ChainConfig::preset(preset),
    };
    config.validate().context("invalid configuration")
}

/// Run the simulation
///
/// # Errors
/// Fails if the simulation parameters are invalid or the chain cannot be built
pub async fn run_simulation(config: SimulationConfig) -> anyhow::Result<SimulationReport> {
    config.validate()?;

    let detector = Arc::new(SimulatedDetector::new(
        config.seed,
        config.failure_rate,
        config.hang_rate,
    ));
    let chain = Arc::new(
        ConservativeFallbackChain::new(config.chain.clone(), detector.clone())
            .context("building fallback chain")?,
    );
    let adapter = IntegrationAdapter::new(chain, config.mode);

    tracing::info!(
        "Simulating {} queries (seed {}, failure rate {}, hang rate {}, mode {})",
        config.queries,
        config.seed,
        config.failure_rate,
        config.hang_rate,
        config.mode
    );

    for query in CORPUS.iter().cycle().take(config.queries).map(|(q, _)| *q) {
        let (_, decision) = adapter.get_function_categories(query, None).await;
        tracing::debug!("{} -> {} ({})", query, decision.tier_used, decision.reason);
    }

    let insights = adapter.chain().insights(10);
    tracing::debug!(count = insights.len(), "Insights refreshed");
    let health = adapter.chain().get_health_status();

    Ok(SimulationReport {
        seed: config.seed,
        queries: config.queries,
        mode: config.mode,
        preset: config.chain.preset(),
        detector_calls: detector.calls(),
        health,
        shadow: (config.mode == IntegrationMode::Shadow).then(|| adapter.shadow_report()),
        baseline: (config.mode != IntegrationMode::Active).then(|| adapter.baseline_health()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn detector_answers_from_corpus() {
        let detector = SimulatedDetector::new(1, 0.0, 0.0);
        let result = detector.detect(CORPUS[0].0, None).await.unwrap();
        assert!(result.categories[&Category::Git]);
        assert!(result.categories[&Category::Core]);
        assert!(!result.categories[&Category::Docs]);
    }

    #[tokio::test]
    async fn always_failing_detector() {
        let detector = SimulatedDetector::new(1, 1.0, 0.0);
        for _ in 0..10 {
            assert!(detector.detect("q", None).await.is_err());
        }
        assert_eq!(detector.calls(), 10);
    }

    #[test]
    fn rates_are_validated() {
        let mut config = SimulationConfig {
            queries: 1,
            failure_rate: 1.5,
            hang_rate: 0.0,
            seed: 0,
            mode: IntegrationMode::Active,
            chain: ChainConfig::new().validate().unwrap(),
        };
        assert!(config.validate().is_err());

        config.failure_rate = 0.6;
        config.hang_rate = 0.6;
        assert!(config.validate().is_err());

        config.hang_rate = 0.4;
        assert!(config.validate().is_ok());
    }
}
