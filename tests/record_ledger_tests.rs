use chrono::{DateTime, Duration, TimeZone, Utc};
use liftrs::config::RecordConfig;
use liftrs::{
    ledger_digest, BodyweightMeasurement, Database, ExerciseProfile, HistoryRepository,
    LiftEntry, LiftEntryFilters, LiftSet, LoadType, MovementArchetype, MuscleInvolvement,
    MuscleRole, PairLockRegistry, PersonalRecordEntry, PrDetector, PrRecalculator, RecordKind,
    ReplayOutcome,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

/// Ledger rebuilds against an on-disk SQLite store

#[cfg(test)]
mod record_ledger_tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 6, 30, 0).unwrap()
    }

    fn create_test_db() -> (TempDir, Database) {
        let temp_dir = tempdir().unwrap();
        let mut db = Database::new(temp_dir.path().join("liftrs.db")).unwrap();
        db.store_exercise(&ExerciseProfile {
            id: "deadlift".to_string(),
            name: "Deadlift".to_string(),
            archetype: Some(MovementArchetype::Hinge),
            category: "barbell".to_string(),
            difficulty: 4,
            recovery_hours: 72,
            load_type: LoadType::Weighted,
            muscles: vec![
                MuscleInvolvement::new("glutes", MuscleRole::PrimaryMover),
                MuscleInvolvement::new("hamstrings", MuscleRole::PrimaryMover),
            ],
        })
        .unwrap();
        db.store_exercise(&ExerciseProfile {
            id: "chin_up".to_string(),
            name: "Chin-up".to_string(),
            archetype: Some(MovementArchetype::Pull),
            category: "bodyweight".to_string(),
            difficulty: 3,
            recovery_hours: 48,
            load_type: LoadType::WeightedBodyweight,
            muscles: vec![MuscleInvolvement::new("lats", MuscleRole::PrimaryMover)],
        })
        .unwrap();
        (temp_dir, db)
    }

    fn entry(id: &str, exercise: &str, day: i64, sets: &[(Decimal, u32)]) -> LiftEntry {
        LiftEntry::new(
            id,
            "u1",
            exercise,
            start() + Duration::days(day),
            sets.iter().map(|(w, r)| LiftSet::new(*w, *r)).collect(),
        )
    }

    fn seed_deadlifts(db: &mut Database) {
        let sessions = [
            ("d1", 0, vec![(dec!(140), 5), (dec!(150), 3)]),
            ("d2", 3, vec![(dec!(145), 5)]),
            ("d3", 7, vec![(dec!(145.05), 5), (dec!(160), 1)]),
            ("d4", 10, vec![(dec!(0), 5), (dec!(152.5), 3)]),
            ("d5", 14, vec![(dec!(130), 8)]),
        ];
        for (id, day, sets) in sessions {
            db.store_lift_entry(&entry(id, "deadlift", day, &sets)).unwrap();
        }
    }

    fn fresh_replay(db: &Database, exercise: &str) -> ReplayOutcome {
        let history = db
            .lift_entries(&LiftEntryFilters::for_user("u1").exercise(exercise))
            .unwrap();
        PrDetector::new().replay(&history, LoadType::Weighted, &[])
    }

    /// Replay that appends a row pointing at a missing entry, so the ledger write fails
    fn failing_replay(
        entries: &[LiftEntry],
        load_type: LoadType,
        bodyweights: &[BodyweightMeasurement],
    ) -> ReplayOutcome {
        let mut outcome = PrDetector::new().replay(entries, load_type, bodyweights);
        let mut bogus: PersonalRecordEntry = outcome.records[0].clone();
        bogus.id = "ghost:1rm".to_string();
        bogus.lift_entry_id = "ghost".to_string();
        outcome.records.push(bogus);
        outcome
    }

    fn dangling_supersedes(records: &[PersonalRecordEntry]) -> Vec<String> {
        records
            .iter()
            .filter(|r| {
                r.supersedes
                    .as_deref()
                    .map_or(false, |id| !records.iter().any(|other| other.id == id))
            })
            .map(|r| r.id.clone())
            .collect()
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let (_dir, mut db) = create_test_db();
        seed_deadlifts(&mut db);
        let recalculator = PrRecalculator::new();

        recalculator.recalculate_all(&mut db, "u1", "deadlift").unwrap();
        let first = db.load_records("u1", "deadlift").unwrap();
        let first_json = serde_json::to_vec(&first).unwrap();

        recalculator.recalculate_all(&mut db, "u1", "deadlift").unwrap();
        let second = db.load_records("u1", "deadlift").unwrap();

        assert!(!first.is_empty());
        assert_eq!(first_json, serde_json::to_vec(&second).unwrap());
        assert_eq!(ledger_digest(&first).unwrap(), ledger_digest(&second).unwrap());
    }

    #[test]
    fn test_ledger_matches_fresh_replay() {
        let (_dir, mut db) = create_test_db();
        seed_deadlifts(&mut db);
        let recalculator = PrRecalculator::new();
        let summary = recalculator.rebuild_user(&mut db, "u1").unwrap();

        let replay = fresh_replay(&db, "deadlift");

        assert_eq!(db.load_records("u1", "deadlift").unwrap(), replay.records);
        assert_eq!(summary.digests["deadlift"], ledger_digest(&replay.records).unwrap());

        // d3: 145.05 × 5 is inside the tolerance, 160 × 1 is a new single
        let d3: Vec<_> = replay
            .records
            .iter()
            .filter(|r| r.lift_entry_id == "d3")
            .map(|r| (r.kind, r.rep_count))
            .collect();
        assert_eq!(d3, vec![(RecordKind::RepSpecific, Some(1))]);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_ledger() {
        let (_dir, mut db) = create_test_db();
        seed_deadlifts(&mut db);
        let recalculator = PrRecalculator::new();
        recalculator.recalculate_all(&mut db, "u1", "deadlift").unwrap();
        let before = db.load_records("u1", "deadlift").unwrap();

        let result = db.recalculate_records("u1", "deadlift", failing_replay);

        assert!(result.is_err());
        assert_eq!(db.load_records("u1", "deadlift").unwrap(), before);
        let d1 = db.load_lift_entry("d1").unwrap().unwrap();
        assert!(d1.is_pr);
    }

    #[test]
    fn test_deleting_record_entry_promotes_earlier_best() {
        let (_dir, mut db) = create_test_db();
        seed_deadlifts(&mut db);
        let recalculator = PrRecalculator::new();
        recalculator.rebuild_user(&mut db, "u1").unwrap();

        let before = recalculator.current_records(&db, "u1", "deadlift").unwrap();
        assert_eq!(before.by_reps[&1].lift_entry_id, "d3");

        recalculator.delete_entry(&mut db, "d3").unwrap();

        let after = recalculator.current_records(&db, "u1", "deadlift").unwrap();
        assert!(!after.by_reps.contains_key(&1));
        assert!(db
            .load_records("u1", "deadlift")
            .unwrap()
            .iter()
            .all(|r| r.lift_entry_id != "d3" && r.supersedes.as_deref() != Some("d3:rep:1")));
    }

    #[test]
    fn test_delete_leaves_no_dangling_records() {
        let (_dir, mut db) = create_test_db();
        let recalculator = PrRecalculator::new();
        for (i, weight) in [dec!(100), dec!(110), dec!(120)].iter().enumerate() {
            recalculator
                .record_entry(&mut db, &entry(&format!("e{}", i + 1), "deadlift", i as i64, &[(*weight, 5)]))
                .unwrap();
        }

        recalculator.delete_entry(&mut db, "e2").unwrap();

        let stored = db.load_records("u1", "deadlift").unwrap();
        assert!(dangling_supersedes(&stored).is_empty());
        assert_eq!(stored, fresh_replay(&db, "deadlift").records);
    }

    #[test]
    fn test_failed_delete_keeps_entry_and_ledger() {
        let (_dir, mut db) = create_test_db();
        seed_deadlifts(&mut db);
        PrRecalculator::new()
            .recalculate_all(&mut db, "u1", "deadlift")
            .unwrap();
        let before = db.load_records("u1", "deadlift").unwrap();

        let result = db.delete_lift_entry("d2", failing_replay);

        assert!(result.is_err());
        assert!(db.load_lift_entry("d2").unwrap().is_some());
        assert_eq!(db.load_records("u1", "deadlift").unwrap(), before);
        assert!(db.load_lift_entry("d2").unwrap().unwrap().is_pr);
    }

    #[test]
    fn test_concurrent_rebuilds_of_one_pair_are_serialized() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("liftrs.db");
        {
            let mut db = Database::new(&path).unwrap();
            for day in 0..30 {
                let weight = Decimal::from(100 + (day * 7) % 40);
                db.store_lift_entry(&entry(&format!("d{}", day), "deadlift", day, &[(weight, 5)]))
                    .unwrap();
            }
        }

        let locks = Arc::new(PairLockRegistry::new());
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                let locks = Arc::clone(&locks);
                thread::spawn(move || {
                    let mut db = Database::new(&path).unwrap();
                    let recalculator = PrRecalculator::with_config(RecordConfig::default(), locks);
                    (0..20)
                        .map(|_| {
                            recalculator
                                .recalculate_all(&mut db, "u1", "deadlift")
                                .map(|outcome| ledger_digest(&outcome.records).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut digests = Vec::new();
        for worker in workers {
            for result in worker.join().unwrap() {
                digests.push(result.unwrap());
            }
        }

        let db = Database::new(&path).unwrap();
        let expected = ledger_digest(&fresh_replay(&db, "deadlift").records).unwrap();
        assert_eq!(digests.len(), 40);
        assert!(digests.iter().all(|d| *d == expected));
        assert_eq!(
            ledger_digest(&db.load_records("u1", "deadlift").unwrap()).unwrap(),
            expected
        );
    }

    #[test]
    fn test_concurrent_appends_and_user_rebuilds_stay_consistent() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("liftrs.db");
        Database::new(&path).unwrap();

        let writer = {
            let path = path.clone();
            thread::spawn(move || {
                let mut db = Database::new(&path).unwrap();
                let recalculator = PrRecalculator::new();
                for day in 0..15 {
                    let weight = Decimal::from(100 + day);
                    recalculator
                        .record_entry(&mut db, &entry(&format!("a{}", day), "deadlift", day, &[(weight, 3)]))
                        .unwrap();
                }
            })
        };
        let rebuilder = {
            let path = path.clone();
            thread::spawn(move || {
                let mut db = Database::new(&path).unwrap();
                let recalculator = PrRecalculator::new();
                for _ in 0..15 {
                    recalculator.rebuild_user(&mut db, "u1").unwrap();
                }
            })
        };
        writer.join().unwrap();
        rebuilder.join().unwrap();

        let db = Database::new(&path).unwrap();
        assert_eq!(
            db.load_records("u1", "deadlift").unwrap(),
            fresh_replay(&db, "deadlift").records
        );
    }

    #[test]
    fn test_bodyweight_exercise_uses_measurements() {
        let (_dir, mut db) = create_test_db();
        db.store_bodyweight(&BodyweightMeasurement {
            user_id: "u1".to_string(),
            measured_at: start() - Duration::days(1),
            weight: dec!(75),
        })
        .unwrap();
        db.store_bodyweight(&BodyweightMeasurement {
            user_id: "u1".to_string(),
            measured_at: start() + Duration::days(5),
            weight: dec!(78),
        })
        .unwrap();

        let recalculator = PrRecalculator::new();
        recalculator
            .record_entry(&mut db, &entry("c1", "chin_up", 0, &[(Decimal::ZERO, 8)]))
            .unwrap();
        let (_, outcome) = recalculator
            .record_entry(&mut db, &entry("c2", "chin_up", 6, &[(Decimal::ZERO, 8)]))
            .unwrap();

        // Same logged load, but 3 kg heavier lifter
        let c2: Vec<_> = outcome
            .records
            .iter()
            .filter(|r| r.lift_entry_id == "c2")
            .collect();
        assert_eq!(c2.len(), 2);
        assert_eq!(c2[0].weight, dec!(78));
    }

    #[test]
    fn test_reopened_store_keeps_ledger() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("liftrs.db");
        let digest = {
            let mut db = Database::new(&path).unwrap();
            seed_deadlifts(&mut db);
            let outcome = PrRecalculator::new()
                .recalculate_all(&mut db, "u1", "deadlift")
                .unwrap();
            ledger_digest(&outcome.records).unwrap()
        };

        let db = Database::new(&path).unwrap();
        let stored = db.load_records("u1", "deadlift").unwrap();
        assert_eq!(ledger_digest(&stored).unwrap(), digest);
        assert_eq!(db.get_stats().unwrap().entry_count, 5);
    }
}
