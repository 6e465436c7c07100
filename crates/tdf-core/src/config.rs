//! Chain configuration
//!
//! A [`ModePreset`] is mapped at construction time to a concrete
//! [`ChainConfig`]; builder methods and TOML overrides adjust individual
//! values, and [`ChainConfig::validate`] produces the immutable
//! [`ValidatedConfig`] the chain is built from.

use crate::error::ConfigError;
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted cache TTL (one week)
pub const MAX_CACHE_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Largest accepted outcome history; slots are allocated up front
pub const MAX_HISTORY_CAPACITY: usize = 1_000_000;

/// Named bundle of defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreset {
    /// Favour correctness: trip early, activate a wide safe set
    #[default]
    Conservative,
    /// Middle ground
    Balanced,
    /// Favour the primary detector: tolerate more failures, minimal safe set
    Aggressive,
}

impl ModePreset {
    /// All presets
    pub const ALL: [ModePreset; 3] = [
        ModePreset::Conservative,
        ModePreset::Balanced,
        ModePreset::Aggressive,
    ];

    /// Preset name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModePreset::Conservative => "conservative",
            ModePreset::Balanced => "balanced",
            ModePreset::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for ModePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModePreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ModePreset::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| ConfigError::UnknownName {
                kind: "mode preset",
                value: s.to_string(),
            })
    }
}

/// Chain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Preset these values were derived from
    pub mode_preset: ModePreset,
    /// Consecutive failures before CLOSED -> OPEN
    pub failure_threshold: u32,
    /// Rolling window in which failures count as consecutive
    pub failure_window_seconds: u64,
    /// OPEN duration before a HALF_OPEN probe
    pub cooldown_seconds: u64,
    /// Per-call timeout for the primary detector
    pub detection_timeout_ms: u64,
    /// Validity window for CACHED tier reuse
    pub cache_ttl_seconds: u64,
    /// Maximum cached results
    pub cache_capacity: u64,
    /// Sustained-OPEN duration before auto-emergency
    pub emergency_trigger_seconds: u64,
    /// Forced auto-exit from emergency mode
    pub emergency_max_duration_seconds: u64,
    /// Outcome samples retained
    pub history_capacity: usize,
    /// Longest query the heuristic tier accepts
    pub heuristic_max_query_chars: usize,
    /// Samples needed before a token insight is reported
    pub learning_min_support: usize,
    /// Categories returned by the CONSERVATIVE_DEFAULT tier
    pub safe_categories: Vec<Category>,
}

impl ChainConfig {
    /// Create default configuration (conservative preset)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete values for a preset
    #[must_use]
    pub fn preset(preset: ModePreset) -> Self {
        match preset {
            ModePreset::Conservative => Self {
                mode_preset: preset,
                failure_threshold: 5,
                failure_window_seconds: 60,
                cooldown_seconds: 30,
                detection_timeout_ms: 150,
                cache_ttl_seconds: 60,
                cache_capacity: 1_000,
                emergency_trigger_seconds: 120,
                emergency_max_duration_seconds: 600,
                history_capacity: 500,
                heuristic_max_query_chars: 4_096,
                learning_min_support: 5,
                safe_categories: vec![
                    Category::Core,
                    Category::Git,
                    Category::Analysis,
                    Category::Debug,
                    Category::Test,
                    Category::Quality,
                    Category::Docs,
                ],
            },
            ModePreset::Balanced => Self {
                mode_preset: preset,
                failure_threshold: 7,
                failure_window_seconds: 60,
                cooldown_seconds: 20,
                detection_timeout_ms: 200,
                cache_ttl_seconds: 45,
                cache_capacity: 1_000,
                emergency_trigger_seconds: 180,
                emergency_max_duration_seconds: 600,
                history_capacity: 500,
                heuristic_max_query_chars: 4_096,
                learning_min_support: 5,
                safe_categories: vec![Category::Core, Category::Analysis, Category::Debug],
            },
            ModePreset::Aggressive => Self {
                mode_preset: preset,
                failure_threshold: 10,
                failure_window_seconds: 30,
                cooldown_seconds: 10,
                detection_timeout_ms: 250,
                cache_ttl_seconds: 30,
                cache_capacity: 500,
                emergency_trigger_seconds: 300,
                emergency_max_duration_seconds: 300,
                history_capacity: 500,
                heuristic_max_query_chars: 4_096,
                learning_min_support: 5,
                safe_categories: vec![Category::Core],
            },
        }
    }

    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// With rolling failure window
    #[inline]
    #[must_use]
    pub fn with_failure_window_seconds(mut self, secs: u64) -> Self {
        self.failure_window_seconds = secs;
        self
    }

    /// With cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown_seconds(mut self, secs: u64) -> Self {
        self.cooldown_seconds = secs;
        self
    }

    /// With detector timeout
    #[inline]
    #[must_use]
    pub fn with_detection_timeout_ms(mut self, ms: u64) -> Self {
        self.detection_timeout_ms = ms;
        self
    }

    /// With cache TTL
    #[inline]
    #[must_use]
    pub fn with_cache_ttl_seconds(mut self, secs: u64) -> Self {
        self.cache_ttl_seconds = secs;
        self
    }

    /// With cache capacity
    #[inline]
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// With emergency trigger
    #[inline]
    #[must_use]
    pub fn with_emergency_trigger_seconds(mut self, secs: u64) -> Self {
        self.emergency_trigger_seconds = secs;
        self
    }

    /// With emergency max duration
    #[inline]
    #[must_use]
    pub fn with_emergency_max_duration_seconds(mut self, secs: u64) -> Self {
        self.emergency_max_duration_seconds = secs;
        self
    }

    /// With outcome history capacity
    #[inline]
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// With heuristic query limit
    #[inline]
    #[must_use]
    pub fn with_heuristic_max_query_chars(mut self, chars: usize) -> Self {
        self.heuristic_max_query_chars = chars;
        self
    }

    /// With learning support threshold
    #[inline]
    #[must_use]
    pub fn with_learning_min_support(mut self, support: usize) -> Self {
        self.learning_min_support = support;
        self
    }

    /// With safe category set
    #[inline]
    #[must_use]
    pub fn with_safe_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.safe_categories = categories.into_iter().collect();
        self
    }

    /// Apply overrides on top of these values
    #[must_use]
    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(v) = overrides.failure_threshold {
            self.failure_threshold = v;
        }
        if let Some(v) = overrides.failure_window_seconds {
            self.failure_window_seconds = v;
        }
        if let Some(v) = overrides.cooldown_seconds {
            self.cooldown_seconds = v;
        }
        if let Some(v) = overrides.detection_timeout_ms {
            self.detection_timeout_ms = v;
        }
        if let Some(v) = overrides.cache_ttl_seconds {
            self.cache_ttl_seconds = v;
        }
        if let Some(v) = overrides.cache_capacity {
            self.cache_capacity = v;
        }
        if let Some(v) = overrides.emergency_trigger_seconds {
            self.emergency_trigger_seconds = v;
        }
        if let Some(v) = overrides.emergency_max_duration_seconds {
            self.emergency_max_duration_seconds = v;
        }
        if let Some(v) = overrides.history_capacity {
            self.history_capacity = v;
        }
        if let Some(v) = overrides.heuristic_max_query_chars {
            self.heuristic_max_query_chars = v;
        }
        if let Some(v) = overrides.learning_min_support {
            self.learning_min_support = v;
        }
        if let Some(v) = &overrides.safe_categories {
            self.safe_categories.clone_from(v);
        }
        self
    }

    /// Parse a TOML document: an optional `mode_preset` plus overrides
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML or unknown keys
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let overrides: ConfigOverrides = toml::from_str(source)?;
        Ok(Self::preset(overrides.mode_preset.unwrap_or_default()).apply(&overrides))
    }

    /// Load a TOML config file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Parse` if it is malformed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate into an immutable configuration
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` for zero thresholds, timeouts or capacities
    /// - `ConfigError::MissingCoreCategory` if `core` is not in the safe set
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        ValidatedConfig::try_from(self)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::preset(ModePreset::default())
    }
}

/// Partial configuration, as read from a config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub mode_preset: Option<ModePreset>,
    pub failure_threshold: Option<u32>,
    pub failure_window_seconds: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    pub detection_timeout_ms: Option<u64>,
    pub cache_ttl_seconds: Option<u64>,
    pub cache_capacity: Option<u64>,
    pub emergency_trigger_seconds: Option<u64>,
    pub emergency_max_duration_seconds: Option<u64>,
    pub history_capacity: Option<usize>,
    pub heuristic_max_query_chars: Option<usize>,
    pub learning_min_support: Option<usize>,
    pub safe_categories: Option<Vec<Category>>,
}

/// Configuration that passed validation; never mutated afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    raw: ChainConfig,
}

impl TryFrom<ChainConfig> for ValidatedConfig {
    type Error = ConfigError;

    fn try_from(mut raw: ChainConfig) -> Result<Self, Self::Error> {
        if raw.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        if raw.failure_window_seconds == 0 {
            return Err(ConfigError::invalid("failure_window_seconds", "must be at least 1"));
        }
        if raw.detection_timeout_ms == 0 {
            return Err(ConfigError::invalid("detection_timeout_ms", "must be at least 1"));
        }
        if raw.cache_ttl_seconds == 0 {
            return Err(ConfigError::invalid("cache_ttl_seconds", "must be at least 1"));
        }
        if raw.cache_ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(ConfigError::invalid(
                "cache_ttl_seconds",
                format!("must be at most {MAX_CACHE_TTL_SECONDS}"),
            ));
        }
        if raw.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache_capacity", "must be at least 1"));
        }
        if raw.emergency_max_duration_seconds == 0 {
            return Err(ConfigError::invalid(
                "emergency_max_duration_seconds",
                "must be at least 1",
            ));
        }
        if raw.history_capacity == 0 {
            return Err(ConfigError::invalid("history_capacity", "must be at least 1"));
        }
        if raw.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::invalid(
                "history_capacity",
                format!("must be at most {MAX_HISTORY_CAPACITY}"),
            ));
        }
        if raw.heuristic_max_query_chars == 0 {
            return Err(ConfigError::invalid("heuristic_max_query_chars", "must be at least 1"));
        }
        if !raw.safe_categories.contains(&Category::Core) {
            return Err(ConfigError::MissingCoreCategory);
        }

        raw.safe_categories.sort_unstable();
        raw.safe_categories.dedup();
        Ok(Self { raw })
    }
}

impl ValidatedConfig {
    /// Underlying values
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &ChainConfig {
        &self.raw
    }

    /// Preset the values came from
    #[inline]
    #[must_use]
    pub fn preset(&self) -> ModePreset {
        self.raw.mode_preset
    }

    #[inline]
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.raw.failure_threshold
    }

    #[inline]
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.raw.failure_window_seconds)
    }

    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.raw.cooldown_seconds)
    }

    #[inline]
    #[must_use]
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.detection_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.raw.cache_ttl_seconds)
    }

    #[inline]
    #[must_use]
    pub fn cache_capacity(&self) -> u64 {
        self.raw.cache_capacity
    }

    #[inline]
    #[must_use]
    pub fn emergency_trigger(&self) -> Duration {
        Duration::from_secs(self.raw.emergency_trigger_seconds)
    }

    #[inline]
    #[must_use]
    pub fn emergency_max_duration(&self) -> Duration {
        Duration::from_secs(self.raw.emergency_max_duration_seconds)
    }

    #[inline]
    #[must_use]
    pub fn history_capacity(&self) -> usize {
        self.raw.history_capacity
    }

    #[inline]
    #[must_use]
    pub fn heuristic_max_query_chars(&self) -> usize {
        self.raw.heuristic_max_query_chars
    }

    #[inline]
    #[must_use]
    pub fn learning_min_support(&self) -> usize {
        self.raw.learning_min_support
    }

    /// Safe set, sorted and deduplicated; always contains `core`
    #[inline]
    #[must_use]
    pub fn safe_categories(&self) -> &[Category] {
        &self.raw.safe_categories
    }
}
