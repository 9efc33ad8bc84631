//! Exercise recommendations
//!
//! Ranks the exercises a user performed recently ("what to repeat next"),
//! filtering out those whose primary movers are still recovering and scoring
//! the rest on muscle balance, movement variety and difficulty progression.
//!
//! ```text
//! score = base + 3.0 × balance + 2.0 × diversity + 1.5 × difficulty
//! score × 0.5 when the exercise itself was logged inside the repeat window
//! ```
//!
//! The engine never logs per-candidate detail. Each call returns a
//! [`RecommendationTrace`] that the caller can hand to
//! [`crate::logging::emit_recommendation_trace`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::activity::{ActivityAnalyzer, ActivitySnapshot};
use crate::config::RecommendationConfig;
use crate::error::Result;
use crate::history::HistoryRepository;
use crate::models::{ExerciseProfile, MovementArchetype, MuscleRole};

/// A ranked exercise suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub exercise_id: String,
    pub exercise_name: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Why a candidate passed or failed the recovery filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    /// No profile exists; the exercise stays eligible
    MissingProfile,
    /// Profile lists no primary movers
    NoPrimaryMovers,
    /// A strict majority of primary movers is recovered
    MajorityRecovered,
    /// Half or more of the primary movers still need rest
    StillRecovering,
}

/// Recovery filter outcome for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub exercise_id: String,
    pub recovered_primary_movers: usize,
    pub primary_mover_count: usize,
    pub passed: bool,
    pub reason: RecoveryReason,
}

/// Score components for one candidate that passed the recovery filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub exercise_id: String,
    pub muscle_balance: f64,
    pub archetype_diversity: f64,
    pub difficulty_progression: f64,
    /// Score before the repeat penalty
    pub unpenalized: f64,
    pub repeat_penalty_applied: bool,
    pub total: f64,
}

/// Structured record of a recommendation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationTrace {
    pub candidate_count: usize,
    pub underworked_muscles: BTreeSet<String>,
    pub difficulty_target: f64,
    pub recovery: Vec<RecoveryDecision>,
    pub scores: Vec<ScoreBreakdown>,
}

/// Recommendation engine
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    /// Create new engine with default configuration
    pub fn new() -> Self {
        Self::with_config(RecommendationConfig::default())
    }

    /// Create new engine with custom configuration
    pub fn with_config(config: RecommendationConfig) -> Self {
        RecommendationEngine { config }
    }

    /// Analyze recent history and rank it in one call
    pub fn recommend_from_history<R: HistoryRepository + ?Sized>(
        &self,
        repo: &R,
        analyzer: &ActivityAnalyzer,
        user_id: &str,
        count: usize,
        reference_time: DateTime<Utc>,
    ) -> Result<(Vec<Recommendation>, RecommendationTrace)> {
        let snapshot = analyzer.analyze(repo, user_id, reference_time)?;
        let ids: Vec<String> = snapshot.recent_exercise_ids.iter().cloned().collect();
        let profiles = repo.exercise_profiles(&ids)?;
        Ok(self.recommend(user_id, count, &snapshot, &profiles))
    }

    /// Rank the snapshot's recent exercises
    ///
    /// Candidates are enumerated in id order; equal scores keep that order.
    pub fn recommend(
        &self,
        user_id: &str,
        count: usize,
        snapshot: &ActivitySnapshot,
        profiles: &HashMap<String, ExerciseProfile>,
    ) -> (Vec<Recommendation>, RecommendationTrace) {
        let mut trace = RecommendationTrace {
            candidate_count: snapshot.recent_exercise_ids.len(),
            difficulty_target: self.difficulty_target(snapshot, profiles),
            ..RecommendationTrace::default()
        };

        trace.underworked_muscles = snapshot.underworked_muscles(self.config.underworked_threshold);
        for profile in profiles.values() {
            for involvement in &profile.muscles {
                if self.is_underworked(snapshot, &involvement.muscle) {
                    trace.underworked_muscles.insert(involvement.muscle.clone());
                }
            }
        }

        let mut ranked: Vec<Recommendation> = Vec::new();

        for exercise_id in &snapshot.recent_exercise_ids {
            let profile = profiles.get(exercise_id);
            let decision = self.recovery_decision(exercise_id, profile, snapshot);
            let passed = decision.passed;
            trace.recovery.push(decision);
            if !passed {
                continue;
            }

            let (recommendation, breakdown) =
                self.score_candidate(exercise_id, profile, snapshot, trace.difficulty_target);
            trace.scores.push(breakdown);
            ranked.push(recommendation);
        }

        // sort_by is stable, so ties keep enumeration order
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(count);

        tracing::debug!(
            user_id,
            candidates = trace.candidate_count,
            returned = ranked.len(),
            "Recommendations ranked"
        );

        (ranked, trace)
    }

    fn is_underworked(&self, snapshot: &ActivitySnapshot, muscle: &str) -> bool {
        snapshot.workload(muscle) < self.config.underworked_threshold
    }

    fn recovery_decision(
        &self,
        exercise_id: &str,
        profile: Option<&ExerciseProfile>,
        snapshot: &ActivitySnapshot,
    ) -> RecoveryDecision {
        let Some(profile) = profile else {
            return RecoveryDecision {
                exercise_id: exercise_id.to_string(),
                recovered_primary_movers: 0,
                primary_mover_count: 0,
                passed: true,
                reason: RecoveryReason::MissingProfile,
            };
        };

        let required_days = profile.recovery_hours as f64 / 24.0;
        let mut primary_count = 0;
        let mut recovered = 0;
        for muscle in profile.primary_movers() {
            primary_count += 1;
            match snapshot.days_since_worked(muscle) {
                None => recovered += 1,
                Some(days) if days >= required_days => recovered += 1,
                Some(_) => {}
            }
        }

        let (passed, reason) = if primary_count == 0 {
            (true, RecoveryReason::NoPrimaryMovers)
        } else if recovered * 2 > primary_count {
            (true, RecoveryReason::MajorityRecovered)
        } else {
            (false, RecoveryReason::StillRecovering)
        };

        RecoveryDecision {
            exercise_id: exercise_id.to_string(),
            recovered_primary_movers: recovered,
            primary_mover_count: primary_count,
            passed,
            reason,
        }
    }

    fn score_candidate(
        &self,
        exercise_id: &str,
        profile: Option<&ExerciseProfile>,
        snapshot: &ActivitySnapshot,
        difficulty_target: f64,
    ) -> (Recommendation, ScoreBreakdown) {
        let mut reasons = Vec::new();

        let (muscle_balance, archetype_diversity, difficulty_progression) = match profile {
            Some(profile) => {
                let targeted = self.targeted_underworked(profile, snapshot);
                if !targeted.is_empty() {
                    reasons.push(format!("Targets underworked muscles: {}", targeted.join(", ")));
                }

                let diversity = self.archetype_diversity(profile.archetype, snapshot);
                if let Some(archetype) = profile.archetype {
                    if diversity >= 1.0 {
                        reasons.push(format!("Adds variety: few recent {} movements", archetype));
                    } else if diversity > 0.0 {
                        reasons.push(format!("Keeps {} volume in balance", archetype));
                    }
                }

                let difficulty = self.difficulty_progression(profile.difficulty, difficulty_target);
                reasons.push(format!(
                    "Difficulty {}/{} against a target of {:.1}",
                    profile.difficulty, self.config.max_difficulty, difficulty_target
                ));

                (self.muscle_balance(profile, snapshot), diversity, difficulty)
            }
            None => {
                reasons.push("No exercise profile; ranked on base score".to_string());
                (0.0, 0.0, 0.0)
            }
        };

        let unpenalized = self.config.base_score
            + self.config.muscle_balance_weight * muscle_balance
            + self.config.archetype_diversity_weight * archetype_diversity
            + self.config.difficulty_progression_weight * difficulty_progression;

        let repeat_penalty_applied =
            snapshot.logged_within(exercise_id, self.config.repeat_penalty_window_hours);
        let total = if repeat_penalty_applied {
            reasons.push(format!(
                "Already trained in the last {} hours",
                self.config.repeat_penalty_window_hours
            ));
            unpenalized * self.config.repeat_penalty
        } else {
            unpenalized
        };

        let recommendation = Recommendation {
            exercise_id: exercise_id.to_string(),
            exercise_name: profile
                .map(|p| p.name.clone())
                .unwrap_or_else(|| exercise_id.to_string()),
            score: total,
            reasons,
        };

        let breakdown = ScoreBreakdown {
            exercise_id: exercise_id.to_string(),
            muscle_balance,
            archetype_diversity,
            difficulty_progression,
            unpenalized,
            repeat_penalty_applied,
            total,
        };

        (recommendation, breakdown)
    }

    fn targeted_underworked(&self, profile: &ExerciseProfile, snapshot: &ActivitySnapshot) -> Vec<String> {
        profile
            .muscles
            .iter()
            .filter(|m| self.is_underworked(snapshot, &m.muscle))
            .map(|m| m.muscle.clone())
            .collect()
    }

    /// Role-weighted share of underworked muscles the exercise targets
    fn muscle_balance(&self, profile: &ExerciseProfile, snapshot: &ActivitySnapshot) -> f64 {
        if profile.muscles.is_empty() {
            return 0.0;
        }

        let mut weighted = 0.0;
        let mut underworked_primaries = 0;
        let mut underworked_total = 0;
        for involvement in &profile.muscles {
            if !self.is_underworked(snapshot, &involvement.muscle) {
                continue;
            }
            underworked_total += 1;
            weighted += self.config.role_weights.weight(involvement.role);
            if involvement.role == MuscleRole::PrimaryMover {
                underworked_primaries += 1;
            }
        }

        let mut score = weighted + self.config.primary_mover_bonus * underworked_primaries as f64;
        if underworked_total >= self.config.multi_muscle_bonus_threshold {
            score += self.config.multi_muscle_bonus;
        }

        score / profile.muscles.len() as f64
    }

    fn archetype_diversity(&self, archetype: Option<MovementArchetype>, snapshot: &ActivitySnapshot) -> f64 {
        let Some(archetype) = archetype else {
            return 0.0;
        };

        let total = snapshot.total_archetype_usage();
        if total == 0 {
            return 1.0;
        }

        let frequency = snapshot
            .archetype_frequency
            .get(&archetype)
            .copied()
            .unwrap_or(0);
        let relative = frequency as f64 / total as f64;
        let fair_share = 1.0 / MovementArchetype::COUNT as f64;

        if relative <= fair_share {
            1.0
        } else {
            (1.0 - self.config.archetype_overuse_slope * (relative - fair_share)).max(0.0)
        }
    }

    /// Average recent difficulty plus one step, capped at the maximum
    fn difficulty_target(
        &self,
        snapshot: &ActivitySnapshot,
        profiles: &HashMap<String, ExerciseProfile>,
    ) -> f64 {
        let difficulties: Vec<f64> = snapshot
            .recent_exercise_ids
            .iter()
            .filter_map(|id| profiles.get(id))
            .map(|p| p.difficulty as f64)
            .collect();

        if difficulties.is_empty() {
            return self.config.default_difficulty_target;
        }

        let average = difficulties.iter().sum::<f64>() / difficulties.len() as f64;
        (average + self.config.difficulty_step).min(self.config.max_difficulty)
    }

    fn difficulty_progression(&self, difficulty: u8, target: f64) -> f64 {
        (1.0 - self.config.difficulty_penalty_per_level * (difficulty as f64 - target).abs()).max(0.0)
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LiftEntry, LiftSet, LoadType, MuscleInvolvement};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 18, 0, 0).unwrap()
    }

    fn create_test_profile(
        id: &str,
        archetype: MovementArchetype,
        recovery_hours: u32,
        muscles: Vec<(&str, MuscleRole)>,
    ) -> ExerciseProfile {
        ExerciseProfile {
            id: id.to_string(),
            name: id.to_uppercase(),
            archetype: Some(archetype),
            category: "barbell".to_string(),
            difficulty: 3,
            recovery_hours,
            load_type: LoadType::Weighted,
            muscles: muscles
                .into_iter()
                .map(|(m, r)| MuscleInvolvement::new(m, r))
                .collect(),
        }
    }

    fn snapshot_for(
        entries: &[LiftEntry],
        profiles: &HashMap<String, ExerciseProfile>,
    ) -> ActivitySnapshot {
        ActivityAnalyzer::new().analyze_entries("u1", entries, profiles, reference())
    }

    fn logged(exercise: &str, age: Duration, weight: rust_decimal::Decimal) -> LiftEntry {
        LiftEntry::new(
            format!("{}-{}", exercise, age.num_minutes()),
            "u1",
            exercise,
            reference() - age,
            vec![LiftSet::new(weight, 5)],
        )
    }

    fn profile_map(profiles: Vec<ExerciseProfile>) -> HashMap<String, ExerciseProfile> {
        profiles.into_iter().map(|p| (p.id.clone(), p)).collect()
    }

    #[test]
    fn test_recovery_threshold() {
        let profiles = profile_map(vec![create_test_profile(
            "bench",
            MovementArchetype::Push,
            48,
            vec![("chest", MuscleRole::PrimaryMover)],
        )]);
        let engine = RecommendationEngine::new();

        let snapshot = snapshot_for(&[logged("bench", Duration::hours(36), dec!(100))], &profiles);
        let (recs, trace) = engine.recommend("u1", 5, &snapshot, &profiles);
        assert!(recs.is_empty());
        assert_eq!(trace.recovery[0].reason, RecoveryReason::StillRecovering);

        let snapshot = snapshot_for(
            &[logged("bench", Duration::minutes((2.1 * 24.0 * 60.0) as i64), dec!(100))],
            &profiles,
        );
        let (recs, _) = engine.recommend("u1", 5, &snapshot, &profiles);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].exercise_id, "bench");
    }

    #[test]
    fn test_strict_majority_of_primary_movers() {
        let profiles = profile_map(vec![
            create_test_profile(
                "bench",
                MovementArchetype::Push,
                48,
                vec![("chest", MuscleRole::PrimaryMover), ("triceps", MuscleRole::PrimaryMover)],
            ),
            create_test_profile(
                "dips",
                MovementArchetype::Push,
                48,
                vec![("triceps", MuscleRole::PrimaryMover)],
            ),
        ]);
        // triceps worked yesterday through dips, chest last worked 3 days ago
        let entries = vec![
            logged("bench", Duration::days(3), dec!(100)),
            logged("dips", Duration::days(1), dec!(20)),
        ];
        let snapshot = snapshot_for(&entries, &profiles);
        let (_, trace) = RecommendationEngine::new().recommend("u1", 5, &snapshot, &profiles);

        let bench = trace.recovery.iter().find(|d| d.exercise_id == "bench").unwrap();
        assert_eq!(bench.recovered_primary_movers, 1);
        assert_eq!(bench.primary_mover_count, 2);
        assert!(!bench.passed);
    }

    #[test]
    fn test_missing_profile_passes_with_base_score() {
        let profiles = HashMap::new();
        let snapshot = snapshot_for(&[logged("mystery", Duration::days(3), dec!(50))], &profiles);
        let (recs, trace) = RecommendationEngine::new().recommend("u1", 5, &snapshot, &profiles);

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].exercise_name, "mystery");
        assert_eq!(recs[0].score, 1.0);
        assert_eq!(trace.recovery[0].reason, RecoveryReason::MissingProfile);
    }

    #[test]
    fn test_recommendations_only_include_recent_exercises() {
        let profiles = profile_map(vec![
            create_test_profile("bench", MovementArchetype::Push, 0, vec![("chest", MuscleRole::PrimaryMover)]),
            create_test_profile("row", MovementArchetype::Pull, 0, vec![("lats", MuscleRole::PrimaryMover)]),
            create_test_profile("deadlift", MovementArchetype::Hinge, 0, vec![("glutes", MuscleRole::PrimaryMover)]),
        ]);
        let entries = vec![
            logged("bench", Duration::days(2), dec!(100)),
            logged("row", Duration::days(5), dec!(80)),
            logged("deadlift", Duration::days(45), dec!(180)),
        ];
        let snapshot = snapshot_for(&entries, &profiles);
        let (recs, _) = RecommendationEngine::new().recommend("u1", 10, &snapshot, &profiles);

        for rec in &recs {
            assert!(snapshot.recent_exercise_ids.contains(&rec.exercise_id));
        }
        assert!(recs.iter().all(|r| r.exercise_id != "deadlift"));
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn test_bench_and_squat_repeat_penalty() {
        let profiles = profile_map(vec![
            create_test_profile("bench", MovementArchetype::Push, 0, vec![("chest", MuscleRole::PrimaryMover)]),
            create_test_profile("squat", MovementArchetype::Squat, 0, vec![("quads", MuscleRole::PrimaryMover)]),
        ]);
        let engine = RecommendationEngine::new();

        let mut entries = vec![
            logged("bench", Duration::hours(30), dec!(100)),
            logged("squat", Duration::hours(30), dec!(150)),
        ];
        let snapshot = snapshot_for(&entries, &profiles);
        let (recs, trace) = engine.recommend("u1", 10, &snapshot, &profiles);
        let ids: Vec<&str> = recs.iter().map(|r| r.exercise_id.as_str()).collect();
        assert_eq!(ids, vec!["bench", "squat"]);
        assert!(trace.scores.iter().all(|s| !s.repeat_penalty_applied));

        entries.push(logged("squat", Duration::minutes(10), dec!(150)));
        let snapshot = snapshot_for(&entries, &profiles);
        let (recs, trace) = engine.recommend("u1", 10, &snapshot, &profiles);

        let squat = trace.scores.iter().find(|s| s.exercise_id == "squat").unwrap();
        let bench = trace.scores.iter().find(|s| s.exercise_id == "bench").unwrap();
        assert!(squat.repeat_penalty_applied);
        assert!(!bench.repeat_penalty_applied);
        assert!((squat.total - 0.5 * squat.unpenalized).abs() < 1e-9);
        assert_eq!(recs[0].exercise_id, "bench");
    }

    #[test]
    fn test_archetype_diversity_scoring() {
        let engine = RecommendationEngine::new();
        let profiles = profile_map(vec![
            create_test_profile("bench", MovementArchetype::Push, 0, vec![]),
            create_test_profile("row", MovementArchetype::Pull, 0, vec![]),
        ]);

        let empty = ActivitySnapshot::empty("u1", reference(), 31);
        assert_eq!(engine.archetype_diversity(Some(MovementArchetype::Push), &empty), 1.0);
        assert_eq!(engine.archetype_diversity(None, &empty), 0.0);

        // 3 push, 1 pull: push rel 0.75 → max(0, 1 - 3 × (0.75 - 1/6)) = 0
        let entries = vec![
            logged("bench", Duration::days(1), dec!(100)),
            logged("bench", Duration::days(2), dec!(100)),
            logged("bench", Duration::days(3), dec!(100)),
            logged("row", Duration::days(4), dec!(80)),
        ];
        let snapshot = snapshot_for(&entries, &profiles);
        assert_eq!(engine.archetype_diversity(Some(MovementArchetype::Push), &snapshot), 0.0);

        // pull rel 0.25 → 1 - 3 × (0.25 - 1/6) = 0.75
        let pull = engine.archetype_diversity(Some(MovementArchetype::Pull), &snapshot);
        assert!((pull - 0.75).abs() < 1e-9);
        assert_eq!(engine.archetype_diversity(Some(MovementArchetype::Hinge), &snapshot), 1.0);
    }

    #[test]
    fn test_muscle_balance_bonuses() {
        let engine = RecommendationEngine::new();
        let profile = create_test_profile(
            "deadlift",
            MovementArchetype::Hinge,
            0,
            vec![
                ("glutes", MuscleRole::PrimaryMover),
                ("hamstrings", MuscleRole::Synergist),
                ("core", MuscleRole::Stabilizer),
                ("forearms", MuscleRole::Other),
            ],
        );
        let snapshot = ActivitySnapshot::empty("u1", reference(), 31);

        // (1.0 + 0.7 + 0.4 + 0.5) + 0.5 × 1 primary + 0.5 multi-muscle = 3.6, over 4 muscles
        let balance = engine.muscle_balance(&profile, &snapshot);
        assert!((balance - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_difficulty_target_and_score() {
        let engine = RecommendationEngine::new();
        let empty = ActivitySnapshot::empty("u1", reference(), 31);
        assert_eq!(engine.difficulty_target(&empty, &HashMap::new()), 3.0);

        let mut hard = create_test_profile("snatch", MovementArchetype::Hinge, 0, vec![]);
        hard.difficulty = 5;
        let profiles = profile_map(vec![hard]);
        let snapshot = snapshot_for(&[logged("snatch", Duration::days(3), dec!(60))], &profiles);
        assert_eq!(engine.difficulty_target(&snapshot, &profiles), 5.0);

        assert!((engine.difficulty_progression(3, 3.5) - 0.9).abs() < 1e-9);
        assert!((engine.difficulty_progression(1, 5.0) - 0.2).abs() < 1e-9);
        assert_eq!(engine.difficulty_progression(1, 7.0), 0.0);
        assert_eq!(engine.difficulty_progression(5, 5.0), 1.0);
    }

    #[test]
    fn test_truncation_and_stable_ties() {
        let profiles = HashMap::new();
        let entries = vec![
            logged("c", Duration::days(3), dec!(10)),
            logged("a", Duration::days(3), dec!(10)),
            logged("b", Duration::days(3), dec!(10)),
        ];
        let snapshot = snapshot_for(&entries, &profiles);
        let (recs, trace) = RecommendationEngine::new().recommend("u1", 2, &snapshot, &profiles);

        let ids: Vec<&str> = recs.iter().map(|r| r.exercise_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(trace.candidate_count, 3);
        assert_eq!(trace.scores.len(), 3);
    }
}
