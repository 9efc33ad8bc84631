//! Lift history access
//!
//! The engine reads history only through [`HistoryRepository`]: explicit batch
//! fetches that return id-indexed maps, so no computation ever triggers a
//! hidden per-row lookup.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{BodyweightMeasurement, ExerciseProfile, LiftEntry, LoadType};

/// Lift entry query filters
#[derive(Debug, Default, Clone)]
pub struct LiftEntryFilters {
    pub user_id: Option<String>,
    pub exercise_id: Option<String>,
    /// Inclusive lower bound on `performed_at`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `performed_at`
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LiftEntryFilters {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn exercise(mut self, exercise_id: &str) -> Self {
        self.exercise_id = Some(exercise_id.to_string());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &LiftEntry) -> bool {
        if let Some(ref user_id) = self.user_id {
            if &entry.user_id != user_id {
                return false;
            }
        }
        if let Some(ref exercise_id) = self.exercise_id {
            if &entry.exercise_id != exercise_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.performed_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.performed_at > to {
                return false;
            }
        }
        true
    }
}

/// Full history of one (user, exercise) pair, read under one transaction
#[derive(Debug, Clone)]
pub struct PairHistory {
    pub exercise_id: String,
    pub load_type: LoadType,
    /// Ordered by (`performed_at`, `sequence`)
    pub entries: Vec<LiftEntry>,
}

/// Batch read access to lift history and exercise reference data
pub trait HistoryRepository {
    /// Entries matching the filters, ordered by (`performed_at`, `sequence`)
    fn lift_entries(&self, filters: &LiftEntryFilters) -> Result<Vec<LiftEntry>>;

    /// Profiles for the requested ids; unknown ids are absent from the map
    fn exercise_profiles(&self, exercise_ids: &[String]) -> Result<HashMap<String, ExerciseProfile>>;

    /// All bodyweight measurements of a user, ordered by `measured_at`
    fn bodyweight_measurements(&self, user_id: &str) -> Result<Vec<BodyweightMeasurement>>;
}

/// In-memory history store
#[derive(Debug, Default, Clone)]
pub struct MemoryHistory {
    entries: Vec<LiftEntry>,
    profiles: HashMap<String, ExerciseProfile>,
    bodyweights: Vec<BodyweightMeasurement>,
    next_sequence: i64,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&mut self, profile: ExerciseProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Append an entry; a zero sequence gets the next creation sequence
    pub fn add_entry(&mut self, mut entry: LiftEntry) {
        if entry.sequence > 0 {
            self.next_sequence = self.next_sequence.max(entry.sequence);
        } else {
            self.next_sequence += 1;
            entry.sequence = self.next_sequence;
        }
        self.entries.push(entry);
    }

    pub fn add_bodyweight(&mut self, measurement: BodyweightMeasurement) {
        self.bodyweights.push(measurement);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoryRepository for MemoryHistory {
    fn lift_entries(&self, filters: &LiftEntryFilters) -> Result<Vec<LiftEntry>> {
        let mut entries: Vec<LiftEntry> = self
            .entries
            .iter()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect();

        entries.sort_by(|a, b| {
            a.performed_at
                .cmp(&b.performed_at)
                .then(a.sequence.cmp(&b.sequence))
        });

        if let Some(limit) = filters.limit {
            // Bounded scans keep the most recent entries
            let excess = entries.len().saturating_sub(limit);
            entries.drain(..excess);
        }

        Ok(entries)
    }

    fn exercise_profiles(&self, exercise_ids: &[String]) -> Result<HashMap<String, ExerciseProfile>> {
        Ok(exercise_ids
            .iter()
            .filter_map(|id| self.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    fn bodyweight_measurements(&self, user_id: &str) -> Result<Vec<BodyweightMeasurement>> {
        let mut measurements: Vec<BodyweightMeasurement> = self
            .bodyweights
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        measurements.sort_by_key(|m| m.measured_at);
        Ok(measurements)
    }
}
