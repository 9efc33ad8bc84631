// Library interface for liftrs
// The CLI and the integration tests both go through these modules

pub mod activity;
pub mod config;
pub mod database;
pub mod error;
pub mod history;
pub mod logging;
pub mod models;
pub mod one_rep_max;
pub mod progression;
pub mod recalculation;
pub mod recommendation;
pub mod records;

// Re-export commonly used types for convenience
pub use models::*;
pub use activity::{ActivityAnalyzer, ActivitySnapshot};
pub use config::EngineConfig;
pub use database::Database;
pub use error::{LiftRsError, Result};
pub use history::{HistoryRepository, LiftEntryFilters, MemoryHistory, PairHistory};
pub use logging::{emit_recommendation_trace, init_logging, LogConfig, LogFormat, LogLevel};
pub use one_rep_max::OneRepMaxEstimator;
pub use progression::{NoSuggestionReason, Suggestion, TrainingProgressionService, WeightSuggestion};
pub use recalculation::{PairLockRegistry, PrRecalculator, RebuildSummary};
pub use recommendation::{Recommendation, RecommendationEngine, RecommendationTrace};
pub use records::{current_records, ledger_digest, CurrentRecords, PrDetector, ReplayOutcome};
