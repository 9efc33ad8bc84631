//! Next-session weight suggestions
//!
//! Looks at the last 14 days of an exercise, takes the best estimated 1RM,
//! inverts it for the target rep count and rounds up to a loadable weight.
//! A nudge is added when the lifter already has a set at or above the target
//! reps in the window.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ProgressionConfig;
use crate::error::Result;
use crate::history::{HistoryRepository, LiftEntryFilters};
use crate::models::{LiftEntry, LoadType};
use crate::one_rep_max::OneRepMaxEstimator;

/// A concrete weight target for the next session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSuggestion {
    pub exercise_id: String,
    pub target_reps: u32,
    pub weight: Decimal,
    /// Valid set count of the latest session in the window
    pub suggested_sets: u32,
    /// Best estimated 1RM the suggestion was derived from
    pub basis_one_rep_max: Decimal,
    pub nudged: bool,
}

/// Why no weight could be suggested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSuggestionReason {
    NoRecentSets,
    BodyweightExercise,
    UnsupportedLoadType,
    InvalidTargetReps,
}

impl std::fmt::Display for NoSuggestionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoSuggestionReason::NoRecentSets => write!(f, "no valid sets in the recent window"),
            NoSuggestionReason::BodyweightExercise => write!(f, "bodyweight exercise"),
            NoSuggestionReason::UnsupportedLoadType => write!(f, "load type has no one-rep max"),
            NoSuggestionReason::InvalidTargetReps => write!(f, "target reps must be positive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suggestion {
    Target(WeightSuggestion),
    NoSuggestion(NoSuggestionReason),
}

impl Suggestion {
    pub fn weight(&self) -> Option<Decimal> {
        match self {
            Suggestion::Target(s) => Some(s.weight),
            Suggestion::NoSuggestion(_) => None,
        }
    }
}

/// Progressive overload predictor
pub struct TrainingProgressionService {
    config: ProgressionConfig,
    max_scan_entries: usize,
}

impl TrainingProgressionService {
    pub fn new() -> Self {
        Self::with_config(ProgressionConfig::default(), usize::MAX)
    }

    pub fn with_config(config: ProgressionConfig, max_scan_entries: usize) -> Self {
        TrainingProgressionService {
            config,
            max_scan_entries,
        }
    }

    /// Suggest a weight for `target_reps` based on history up to `as_of`
    pub fn suggest_next_weight<R: HistoryRepository + ?Sized>(
        &self,
        repo: &R,
        user_id: &str,
        exercise_id: &str,
        target_reps: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Suggestion> {
        let profiles = repo.exercise_profiles(&[exercise_id.to_string()])?;
        let load_type = profiles
            .get(exercise_id)
            .map(|p| p.load_type)
            .unwrap_or(LoadType::Weighted);

        let filters = LiftEntryFilters::for_user(user_id)
            .exercise(exercise_id)
            .between(self.window_start(as_of), as_of)
            .limit(self.max_scan_entries);
        let entries = repo.lift_entries(&filters)?;

        if entries.len() >= self.max_scan_entries {
            tracing::warn!(
                user_id,
                exercise_id,
                limit = self.max_scan_entries,
                "Progression scan hit the entry limit"
            );
        }

        let suggestion = self.suggest_from_entries(exercise_id, load_type, &entries, target_reps, as_of)?;

        tracing::debug!(
            user_id,
            exercise_id,
            target_reps,
            weight = ?suggestion.weight(),
            "Progression suggestion computed"
        );

        Ok(suggestion)
    }

    /// Pure core of [`Self::suggest_next_weight`]; entries outside the window are ignored
    pub fn suggest_from_entries(
        &self,
        exercise_id: &str,
        load_type: LoadType,
        entries: &[LiftEntry],
        target_reps: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Suggestion> {
        if target_reps == 0 {
            return Ok(Suggestion::NoSuggestion(NoSuggestionReason::InvalidTargetReps));
        }
        if load_type.is_bodyweight() {
            return Ok(Suggestion::NoSuggestion(NoSuggestionReason::BodyweightExercise));
        }
        if !load_type.supports_one_rep_max() {
            return Ok(Suggestion::NoSuggestion(NoSuggestionReason::UnsupportedLoadType));
        }

        let window_start = self.window_start(as_of);
        let in_window: Vec<&LiftEntry> = entries
            .iter()
            .filter(|e| e.exercise_id == exercise_id)
            .filter(|e| e.performed_at >= window_start && e.performed_at <= as_of)
            .collect();

        let mut best: Option<Decimal> = None;
        let mut reached_target = false;
        for entry in &in_window {
            for set in &entry.sets {
                let Ok(one_rep_max) = OneRepMaxEstimator::estimate(set.weight, set.reps, Decimal::ZERO)
                else {
                    continue;
                };
                best = Some(best.map_or(one_rep_max, |b| b.max(one_rep_max)));
                reached_target |= set.reps >= target_reps;
            }
        }

        let Some(basis) = best else {
            return Ok(Suggestion::NoSuggestion(NoSuggestionReason::NoRecentSets));
        };

        let mut weight = OneRepMaxEstimator::weight_for_target_reps(basis, target_reps)?;
        if reached_target {
            weight += self.config.overload_nudge;
        }
        let weight = round_up(weight, self.config.rounding_increment);

        let suggested_sets = in_window
            .iter()
            .max_by(|a, b| {
                a.performed_at
                    .cmp(&b.performed_at)
                    .then(a.sequence.cmp(&b.sequence))
            })
            .map(|latest| {
                latest
                    .sets
                    .iter()
                    .filter(|s| OneRepMaxEstimator::estimate(s.weight, s.reps, Decimal::ZERO).is_ok())
                    .count() as u32
            })
            .unwrap_or(0);

        Ok(Suggestion::Target(WeightSuggestion {
            exercise_id: exercise_id.to_string(),
            target_reps,
            weight,
            suggested_sets,
            basis_one_rep_max: basis.normalize(),
            nudged: reached_target,
        }))
    }

    fn window_start(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        as_of - Duration::days(self.config.window_days as i64)
    }
}

impl Default for TrainingProgressionService {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest multiple of `increment` at or above `value`
fn round_up(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value.normalize();
    }
    ((value / increment).ceil() * increment).normalize()
}
