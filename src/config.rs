use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LiftRsError;
use crate::logging::LogConfig;
use crate::models::MuscleRole;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Activity snapshot settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Recommendation scoring settings
    #[serde(default)]
    pub recommendation: RecommendationConfig,

    /// Personal record detection settings
    #[serde(default)]
    pub records: RecordConfig,

    /// Progression suggestion settings
    #[serde(default)]
    pub progression: ProgressionConfig,

    /// History store settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Role multipliers shared by workload accumulation and muscle balance scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleWeights {
    pub primary_mover: f64,
    pub synergist: f64,
    pub stabilizer: f64,
    pub other: f64,
}

impl RoleWeights {
    pub fn weight(&self, role: MuscleRole) -> f64 {
        match role {
            MuscleRole::PrimaryMover => self.primary_mover,
            MuscleRole::Synergist => self.synergist,
            MuscleRole::Stabilizer => self.stabilizer,
            MuscleRole::Other => self.other,
        }
    }
}

impl Default for RoleWeights {
    fn default() -> Self {
        RoleWeights {
            primary_mover: 1.0,
            synergist: 0.7,
            stabilizer: 0.4,
            other: 0.5,
        }
    }
}

/// Activity analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Trailing window in days (default: 31)
    pub window_days: u32,

    /// Set count at which an entry reaches full base intensity (default: 5)
    pub sets_for_full_intensity: u32,

    /// Lowest recency factor an entry inside the window can receive (default: 0.1)
    pub min_recency_factor: f64,

    /// Role multipliers for workload accumulation
    pub role_weights: RoleWeights,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            window_days: 31,
            sets_for_full_intensity: 5,
            min_recency_factor: 0.1,
            role_weights: RoleWeights::default(),
        }
    }
}

/// Recommendation scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Workload below which a muscle counts as underworked (default: 0.3)
    pub underworked_threshold: f64,

    /// Score every candidate starts from
    pub base_score: f64,

    pub muscle_balance_weight: f64,

    pub archetype_diversity_weight: f64,

    pub difficulty_progression_weight: f64,

    /// Multiplier applied to exercises logged inside the repeat penalty window
    pub repeat_penalty: f64,

    /// Hours before the reference time in which a log triggers the repeat penalty
    pub repeat_penalty_window_hours: u32,

    /// Bonus per underworked primary mover targeted
    pub primary_mover_bonus: f64,

    /// Flat bonus once `multi_muscle_bonus_threshold` underworked muscles are targeted
    pub multi_muscle_bonus: f64,

    pub multi_muscle_bonus_threshold: usize,

    /// Slope of the archetype over-use penalty
    pub archetype_overuse_slope: f64,

    /// Added to the average recent difficulty to form the progression target
    pub difficulty_step: f64,

    /// Target used when no recent difficulty data exists
    pub default_difficulty_target: f64,

    pub max_difficulty: f64,

    /// Score lost per difficulty level away from the target
    pub difficulty_penalty_per_level: f64,

    /// Role weights for muscle balance scoring
    pub role_weights: RoleWeights,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        RecommendationConfig {
            underworked_threshold: 0.3,
            base_score: 1.0,
            muscle_balance_weight: 3.0,
            archetype_diversity_weight: 2.0,
            difficulty_progression_weight: 1.5,
            repeat_penalty: 0.5,
            repeat_penalty_window_hours: 24,
            primary_mover_bonus: 0.5,
            multi_muscle_bonus: 0.5,
            multi_muscle_bonus_threshold: 3,
            archetype_overuse_slope: 3.0,
            difficulty_step: 0.5,
            default_difficulty_target: 3.0,
            max_difficulty: 5.0,
            difficulty_penalty_per_level: 0.2,
            role_weights: RoleWeights::default(),
        }
    }
}

/// Personal record detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Margin a lift must beat the previous best by (default: 0.1)
    pub tolerance: rust_decimal::Decimal,

    /// Highest rep count tracked for rep-specific records (default: 10)
    pub max_tracked_reps: u32,
}

impl Default for RecordConfig {
    fn default() -> Self {
        RecordConfig {
            tolerance: rust_decimal::Decimal::new(1, 1),
            max_tracked_reps: 10,
        }
    }
}

/// Progression suggestion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Trailing window in days (default: 14)
    pub window_days: u32,

    /// Added when the window already holds a set at or above the target reps
    pub overload_nudge: rust_decimal::Decimal,

    /// Suggestions are rounded up to a multiple of this increment
    pub rounding_increment: rust_decimal::Decimal,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        ProgressionConfig {
            window_days: 14,
            overload_nudge: rust_decimal::Decimal::from(5),
            rounding_increment: rust_decimal::Decimal::from(5),
        }
    }
}

/// History store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database path
    pub database_path: PathBuf,

    /// Upper bound on entries read by a single history scan
    pub max_scan_entries: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("liftrs")
                .join("liftrs.db"),
            max_scan_entries: 50_000,
        }
    }
}

/// Configuration management implementation
impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: EngineConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".liftrs")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %err,
                    "Config file not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reject settings that would break the scoring invariants
    pub fn validate(&self) -> Result<()> {
        if self.analysis.window_days == 0 {
            return Err(invalid_setting("analysis.window_days must be positive"));
        }
        if self.analysis.sets_for_full_intensity == 0 {
            return Err(invalid_setting("analysis.sets_for_full_intensity must be positive"));
        }
        if !(0.0..=1.0).contains(&self.analysis.min_recency_factor) {
            return Err(invalid_setting("analysis.min_recency_factor must be within [0, 1]"));
        }
        if self.progression.window_days == 0 {
            return Err(invalid_setting("progression.window_days must be positive"));
        }
        if self.progression.rounding_increment <= rust_decimal::Decimal::ZERO {
            return Err(invalid_setting("progression.rounding_increment must be positive"));
        }
        if self.records.tolerance < rust_decimal::Decimal::ZERO {
            return Err(invalid_setting("records.tolerance cannot be negative"));
        }
        if self.storage.max_scan_entries == 0 {
            return Err(invalid_setting("storage.max_scan_entries must be positive"));
        }
        Ok(())
    }
}

fn invalid_setting(reason: &str) -> anyhow::Error {
    LiftRsError::Configuration(reason.to_string()).into()
}
