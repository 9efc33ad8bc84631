//! Recent training activity analysis
//!
//! Builds an immutable [`ActivitySnapshot`] from a trailing window of lift
//! history. The snapshot is a value object: it is rebuilt per request and
//! never persisted.
//!
//! # Muscle workload
//!
//! Each entry with known muscle data contributes to every muscle it involves:
//!
//! ```text
//! base      = min(1, sets / 5)
//! recency   = max(0.1, 1 - days_since_log / 31)
//! role      = primary 1.0 | synergist 0.7 | stabilizer 0.4 | other 0.5
//! workload  = min(1, Σ base × recency × role)
//! ```
//!
//! Accumulation saturates: once a muscle reaches 1.0, further entries add
//! nothing visible.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::history::{HistoryRepository, LiftEntryFilters};
use crate::models::{ExerciseProfile, LiftEntry, MovementArchetype};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Snapshot of recent training load for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub user_id: String,

    /// End of the analysis window
    pub reference_time: DateTime<Utc>,

    /// Length of the trailing window in days
    pub window_days: u32,

    /// Decayed, clamped workload per muscle in [0, 1]
    pub muscle_workload: BTreeMap<String, f64>,

    /// Entry count per movement archetype
    pub archetype_frequency: BTreeMap<MovementArchetype, u32>,

    /// Distinct exercises logged inside the window
    pub recent_exercise_ids: BTreeSet<String>,

    /// Latest log time per muscle
    pub muscle_last_worked_at: BTreeMap<String, DateTime<Utc>>,

    /// Latest log time per exercise
    pub exercise_last_logged_at: BTreeMap<String, DateTime<Utc>>,
}

impl ActivitySnapshot {
    pub fn empty(user_id: &str, reference_time: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            reference_time,
            window_days,
            muscle_workload: BTreeMap::new(),
            archetype_frequency: BTreeMap::new(),
            recent_exercise_ids: BTreeSet::new(),
            muscle_last_worked_at: BTreeMap::new(),
            exercise_last_logged_at: BTreeMap::new(),
        }
    }

    /// Workload of a muscle; zero when it was not trained in the window
    pub fn workload(&self, muscle: &str) -> f64 {
        self.muscle_workload.get(muscle).copied().unwrap_or(0.0)
    }

    /// Fractional days since the muscle was last worked, from the logged dates only
    pub fn days_since_worked(&self, muscle: &str) -> Option<f64> {
        self.muscle_last_worked_at
            .get(muscle)
            .map(|at| fractional_days(self.reference_time - *at))
    }

    /// Muscles seen in the window whose workload is below `threshold`
    pub fn underworked_muscles(&self, threshold: f64) -> BTreeSet<String> {
        self.muscle_workload
            .iter()
            .filter(|(_, load)| **load < threshold)
            .map(|(muscle, _)| muscle.clone())
            .collect()
    }

    /// Sum of all archetype counts
    pub fn total_archetype_usage(&self) -> u32 {
        self.archetype_frequency.values().sum()
    }

    /// Whether the exercise was logged within `hours` before the reference time
    pub fn logged_within(&self, exercise_id: &str, hours: u32) -> bool {
        self.exercise_last_logged_at
            .get(exercise_id)
            .map(|at| self.reference_time - *at <= Duration::hours(hours as i64))
            .unwrap_or(false)
    }
}

/// Activity analysis engine
pub struct ActivityAnalyzer {
    config: AnalysisConfig,
    max_scan_entries: usize,
}

impl ActivityAnalyzer {
    /// Create new analyzer with default configuration
    pub fn new() -> Self {
        Self::with_config(AnalysisConfig::default(), usize::MAX)
    }

    /// Create new analyzer with custom configuration and scan bound
    pub fn with_config(config: AnalysisConfig, max_scan_entries: usize) -> Self {
        ActivityAnalyzer {
            config,
            max_scan_entries,
        }
    }

    /// Fetch the trailing window for a user and build a snapshot
    pub fn analyze<R: HistoryRepository + ?Sized>(
        &self,
        repo: &R,
        user_id: &str,
        reference_time: DateTime<Utc>,
    ) -> Result<ActivitySnapshot> {
        let filters = LiftEntryFilters::for_user(user_id)
            .between(self.window_start(reference_time), reference_time)
            .limit(self.max_scan_entries);
        let entries = repo.lift_entries(&filters)?;

        if entries.len() >= self.max_scan_entries {
            tracing::warn!(
                user_id,
                limit = self.max_scan_entries,
                "Activity scan hit the entry limit; oldest entries were ignored"
            );
        }

        let exercise_ids: Vec<String> = entries
            .iter()
            .map(|e| e.exercise_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles = repo.exercise_profiles(&exercise_ids)?;

        let snapshot = self.analyze_entries(user_id, &entries, &profiles, reference_time);

        tracing::debug!(
            user_id,
            entries = entries.len(),
            exercises = snapshot.recent_exercise_ids.len(),
            muscles = snapshot.muscle_workload.len(),
            "Activity snapshot built"
        );

        Ok(snapshot)
    }

    /// Build a snapshot from already-fetched history
    ///
    /// Entries outside the window are ignored, so callers may pass a superset.
    pub fn analyze_entries(
        &self,
        user_id: &str,
        entries: &[LiftEntry],
        profiles: &HashMap<String, ExerciseProfile>,
        reference_time: DateTime<Utc>,
    ) -> ActivitySnapshot {
        let window_start = self.window_start(reference_time);
        let mut snapshot = ActivitySnapshot::empty(user_id, reference_time, self.config.window_days);

        for entry in entries {
            if entry.user_id != user_id
                || entry.performed_at < window_start
                || entry.performed_at > reference_time
            {
                continue;
            }

            snapshot.recent_exercise_ids.insert(entry.exercise_id.clone());
            update_latest(
                &mut snapshot.exercise_last_logged_at,
                &entry.exercise_id,
                entry.performed_at,
            );

            let Some(profile) = profiles.get(&entry.exercise_id) else {
                continue;
            };

            if let Some(archetype) = profile.archetype {
                *snapshot.archetype_frequency.entry(archetype).or_insert(0) += 1;
            }

            let set_count = entry.sets.iter().filter(|s| s.reps > 0).count();
            if profile.muscles.is_empty() || set_count == 0 {
                continue;
            }

            let base_intensity = self.base_intensity(set_count);
            let recency = self.recency_factor(reference_time - entry.performed_at);

            for involvement in &profile.muscles {
                let contribution =
                    base_intensity * recency * self.config.role_weights.weight(involvement.role);
                let workload = snapshot
                    .muscle_workload
                    .entry(involvement.muscle.clone())
                    .or_insert(0.0);
                *workload = (*workload + contribution).clamp(0.0, 1.0);

                update_latest(
                    &mut snapshot.muscle_last_worked_at,
                    &involvement.muscle,
                    entry.performed_at,
                );
            }
        }

        snapshot
    }

    fn window_start(&self, reference_time: DateTime<Utc>) -> DateTime<Utc> {
        reference_time - Duration::days(self.config.window_days as i64)
    }

    fn base_intensity(&self, set_count: usize) -> f64 {
        (set_count as f64 / self.config.sets_for_full_intensity as f64).min(1.0)
    }

    fn recency_factor(&self, age: Duration) -> f64 {
        let days = fractional_days(age);
        (1.0 - days / self.config.window_days as f64).max(self.config.min_recency_factor)
    }
}

impl Default for ActivityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn fractional_days(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / SECONDS_PER_DAY
}

fn update_latest(map: &mut BTreeMap<String, DateTime<Utc>>, key: &str, at: DateTime<Utc>) {
    map.entry(key.to_string())
        .and_modify(|latest| {
            if at > *latest {
                *latest = at;
            }
        })
        .or_insert(at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::models::{LiftSet, LoadType, MuscleInvolvement, MuscleRole};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 18, 0, 0).unwrap()
    }

    fn profile(id: &str, archetype: Option<MovementArchetype>, muscles: Vec<(&str, MuscleRole)>) -> ExerciseProfile {
        ExerciseProfile {
            id: id.to_string(),
            name: id.to_string(),
            archetype,
            category: "barbell".to_string(),
            difficulty: 3,
            recovery_hours: 48,
            load_type: LoadType::Weighted,
            muscles: muscles
                .into_iter()
                .map(|(m, r)| MuscleInvolvement::new(m, r))
                .collect(),
        }
    }

    fn entry(exercise: &str, days_ago: i64, sets: usize) -> LiftEntry {
        LiftEntry::new(
            format!("{}-{}", exercise, days_ago),
            "u1",
            exercise,
            reference() - Duration::days(days_ago),
            vec![LiftSet::new(dec!(100), 5); sets],
        )
    }

    fn profiles() -> HashMap<String, ExerciseProfile> {
        let mut map = HashMap::new();
        map.insert(
            "bench".to_string(),
            profile(
                "bench",
                Some(MovementArchetype::Push),
                vec![("chest", MuscleRole::PrimaryMover), ("triceps", MuscleRole::Synergist)],
            ),
        );
        map.insert(
            "row".to_string(),
            profile(
                "row",
                Some(MovementArchetype::Pull),
                vec![("lats", MuscleRole::PrimaryMover), ("core", MuscleRole::Stabilizer)],
            ),
        );
        map.insert("mystery".to_string(), profile("mystery", None, vec![]));
        map
    }

    #[test]
    fn test_single_entry_workload() {
        let analyzer = ActivityAnalyzer::new();
        // 2 sets, logged today: base 0.4, recency 1.0
        let snapshot =
            analyzer.analyze_entries("u1", &[entry("bench", 0, 2)], &profiles(), reference());

        assert!((snapshot.workload("chest") - 0.4).abs() < 1e-9);
        assert!((snapshot.workload("triceps") - 0.28).abs() < 1e-9);
        assert_eq!(snapshot.workload("lats"), 0.0);
    }

    #[test]
    fn test_recency_decay_and_floor() {
        let analyzer = ActivityAnalyzer::new();

        let snapshot =
            analyzer.analyze_entries("u1", &[entry("bench", 10, 5)], &profiles(), reference());
        let expected = 1.0 - 10.0 / 31.0;
        assert!((snapshot.workload("chest") - expected).abs() < 1e-9);

        // 30 days ago: 1 - 30/31 ≈ 0.032, floored at 0.1
        let snapshot =
            analyzer.analyze_entries("u1", &[entry("bench", 30, 5)], &profiles(), reference());
        assert!((snapshot.workload("chest") - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_saturating_accumulation() {
        let analyzer = ActivityAnalyzer::new();
        let entries = vec![entry("bench", 0, 5), entry("bench", 1, 5), entry("bench", 2, 5)];
        let snapshot = analyzer.analyze_entries("u1", &entries, &profiles(), reference());

        assert_eq!(snapshot.workload("chest"), 1.0);
        assert_eq!(snapshot.workload("triceps"), 1.0);
    }

    #[test]
    fn test_archetypes_and_recent_set() {
        let analyzer = ActivityAnalyzer::new();
        let entries = vec![
            entry("bench", 1, 3),
            entry("bench", 3, 3),
            entry("row", 2, 3),
            entry("mystery", 2, 3),
            entry("unknown", 4, 3),
            entry("row", 45, 3),
        ];
        let snapshot = analyzer.analyze_entries("u1", &entries, &profiles(), reference());

        assert_eq!(snapshot.archetype_frequency.get(&MovementArchetype::Push), Some(&2));
        assert_eq!(snapshot.archetype_frequency.get(&MovementArchetype::Pull), Some(&1));
        assert_eq!(snapshot.total_archetype_usage(), 3);

        let recent: Vec<&str> = snapshot.recent_exercise_ids.iter().map(|s| s.as_str()).collect();
        assert_eq!(recent, vec!["bench", "mystery", "row", "unknown"]);
    }

    #[test]
    fn test_last_worked_is_latest_date() {
        let analyzer = ActivityAnalyzer::new();
        let entries = vec![entry("bench", 6, 3), entry("bench", 2, 3), entry("bench", 4, 3)];
        let snapshot = analyzer.analyze_entries("u1", &entries, &profiles(), reference());

        assert_eq!(
            snapshot.muscle_last_worked_at.get("chest"),
            Some(&(reference() - Duration::days(2)))
        );
        assert!((snapshot.days_since_worked("chest").unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(snapshot.days_since_worked("hamstrings"), None);
    }

    #[test]
    fn test_future_and_foreign_entries_ignored() {
        let analyzer = ActivityAnalyzer::new();
        let mut foreign = entry("bench", 1, 3);
        foreign.user_id = "u2".to_string();
        let future = entry("bench", -1, 3);

        let snapshot = analyzer.analyze_entries("u1", &[foreign, future], &profiles(), reference());
        assert!(snapshot.recent_exercise_ids.is_empty());
        assert!(snapshot.muscle_workload.is_empty());
    }

    #[test]
    fn test_logged_within() {
        let analyzer = ActivityAnalyzer::new();
        let entries = vec![entry("bench", 0, 3), entry("row", 3, 3)];
        let snapshot = analyzer.analyze_entries("u1", &entries, &profiles(), reference());

        assert!(snapshot.logged_within("bench", 24));
        assert!(!snapshot.logged_within("row", 24));
        assert!(!snapshot.logged_within("squat", 24));
    }

    #[test]
    fn test_analyze_reads_repository_window() {
        let mut history = MemoryHistory::new();
        for p in profiles().into_values() {
            history.add_profile(p);
        }
        history.add_entry(entry("bench", 1, 5));
        history.add_entry(entry("row", 40, 5));

        let snapshot = ActivityAnalyzer::new()
            .analyze(&history, "u1", reference())
            .unwrap();

        assert!(snapshot.recent_exercise_ids.contains("bench"));
        assert!(!snapshot.recent_exercise_ids.contains("row"));
        assert_eq!(snapshot.window_days, 31);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_workload_always_clamped(
            logs in prop::collection::vec((0i64..31, 0usize..12, 0usize..2), 0..60)
        ) {
            let analyzer = ActivityAnalyzer::new();
            let names = ["bench", "row"];
            let entries: Vec<LiftEntry> = logs
                .iter()
                .map(|(days, sets, which)| entry(names[*which], *days, *sets))
                .collect();

            let snapshot = analyzer.analyze_entries("u1", &entries, &profiles(), reference());

            for load in snapshot.muscle_workload.values() {
                prop_assert!(*load >= 0.0 && *load <= 1.0);
            }
        }
    }
}
