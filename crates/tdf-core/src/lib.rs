//! TDF Core - Task Detection Fallback chain
//!
//! Decides which functional categories to activate for a query and keeps
//! answering when the primary detector does not:
//! - Five-tier degradation (primary, cached, heuristic, conservative default, emergency)
//! - Failure-counting circuit breaker with a single half-open probe
//! - Emergency safe-mode with automatic exit
//! - Outcome recording and advisory insights
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tdf_core::{ConservativeFallbackChain, ModePreset};
//!
//! # async fn example(detector: Arc<dyn tdf_core::PrimaryDetector>) -> Result<(), Box<dyn std::error::Error>> {
//! let chain = ConservativeFallbackChain::from_preset(ModePreset::Balanced, detector)?;
//!
//! let (categories, decision) = chain.get_function_categories("fix the failing test", None).await;
//! println!("tier {} ({}): {:?}", decision.tier_used, decision.reason, categories);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod adapter;
pub mod cache;
pub mod chain;
pub mod circuit;
pub mod config;
pub mod detector;
pub mod emergency;
pub mod error;
pub mod health;
pub mod heuristic;
pub mod learning;
pub mod signature;
pub mod tiers;
pub mod types;

// Re-exports for convenience
pub use adapter::{IntegrationAdapter, IntegrationMode, ShadowReport};
pub use cache::{CacheStats, DetectionCache};
pub use chain::ConservativeFallbackChain;
pub use circuit::{
    allowed_transitions, validate_transition, CallPermit, CircuitBreaker, CircuitBreakerState,
    CircuitSettings, PermitKind,
};
pub use config::{
    ChainConfig, ConfigOverrides, ModePreset, ValidatedConfig, MAX_CACHE_TTL_SECONDS,
    MAX_HISTORY_CAPACITY,
};
pub use detector::PrimaryDetector;
pub use emergency::{EmergencyModeController, EmergencyRecord};
pub use error::{
    CircuitError, ConfigError, DetectorError, DetectorErrorKind, FallbackError, HeuristicError,
};
pub use health::{
    HealthMonitor, HealthSnapshot, LearningSummary, OutcomeRing, PerformanceStats, RecoveryStatus,
};
pub use heuristic::HeuristicMatcher;
pub use learning::{Insight, InsightKind, LearningEngine};
pub use signature::QuerySignature;
pub use tiers::{ConservativeDefaultTier, EmergencyTier, TierHealth, TierSelector};
pub use types::{
    Category, CategoryMap, CircuitState, DecisionId, DetectionContext, DetectionResult,
    FallbackDecision, FallbackTier, OutcomeSample,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with TDF Core
    pub use crate::{
        Category, CategoryMap, ChainConfig, ConservativeFallbackChain, DetectionContext,
        DetectionResult, DetectorError, FallbackDecision, FallbackTier, IntegrationAdapter,
        IntegrationMode, ModePreset, PrimaryDetector,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
