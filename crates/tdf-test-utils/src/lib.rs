//! Testing utilities for the TDF workspace
//!
//! Scripted detectors, fixtures and chain builders shared by integration tests.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tdf_core::{
    Category, ChainConfig, ConservativeFallbackChain, DetectionContext, DetectionResult,
    DetectorError, ModePreset, PrimaryDetector, ValidatedConfig,
};

/// What the scripted detector does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Ok(DetectionResult),
    Err(DetectorError),
    /// Never completes; only the chain's timeout ends the call
    Hang,
    /// Sleep, then answer
    Delay(Duration, DetectionResult),
}

/// Detector that replays a queue of steps, then repeats a default step
#[derive(Debug)]
pub struct ScriptedDetector {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn with_steps(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always_ok(result: DetectionResult) -> Arc<Self> {
        Self::with_steps([], Step::Ok(result))
    }

    pub fn always_failing() -> Arc<Self> {
        Self::with_steps(
            [],
            Step::Err(DetectorError::Unavailable("connection refused".to_string())),
        )
    }

    pub fn hanging() -> Arc<Self> {
        Self::with_steps([], Step::Hang)
    }

    /// Calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PrimaryDetector for ScriptedDetector {
    async fn detect(
        &self,
        _query: &str,
        _context: Option<&DetectionContext>,
    ) -> Result<DetectionResult, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Ok(result) => Ok(result),
            Step::Err(err) => Err(err),
            Step::Hang => std::future::pending().await,
            Step::Delay(delay, result) => {
                tokio::time::sleep(delay).await;
                Ok(result)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A typical PRIMARY answer: core, git and debug
pub fn sample_result() -> DetectionResult {
    DetectionResult::from_enabled([Category::Core, Category::Git, Category::Debug])
        .with_confidence(Category::Core, 1.0)
        .with_confidence(Category::Git, 0.92)
        .with_confidence(Category::Debug, 0.81)
        .with_signal(Category::Git, "model:git")
        .with_detection_time_ms(12.0)
}

/// Conservative preset with failure threshold 3 and cooldown 30s
pub fn test_config() -> ChainConfig {
    ChainConfig::preset(ModePreset::Conservative).with_failure_threshold(3)
}

pub fn validated(config: ChainConfig) -> ValidatedConfig {
    config.validate().unwrap()
}

pub fn build_chain(
    config: ChainConfig,
    detector: Arc<dyn PrimaryDetector>,
) -> Arc<ConservativeFallbackChain> {
    Arc::new(ConservativeFallbackChain::new(validated(config), detector).unwrap())
}
