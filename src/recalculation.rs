//! Personal record ledger rebuilds
//!
//! The ledger is the only shared mutable state in the engine. Every change to
//! a pair's history ends in a full chronological replay written back in the
//! same transaction as the change itself. Writers of the same (user, exercise)
//! pair are serialized in-process through a [`PairLockRegistry`] and across
//! connections by SQLite's write lock.

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::config::RecordConfig;
use crate::database::Database;
use crate::error::{DatabaseError, LiftRsError, Result};
use crate::models::{BodyweightMeasurement, LiftEntry, LoadType};
use crate::records::{current_records, ledger_digest, CurrentRecords, PrDetector, ReplayOutcome};

type PairKey = (String, String);

/// One mutex per (user, exercise) pair, created on first use
#[derive(Debug, Default)]
pub struct PairLockRegistry {
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl PairLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every recalculator in the process
    pub fn global() -> Arc<PairLockRegistry> {
        static GLOBAL: OnceLock<Arc<PairLockRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PairLockRegistry::new())))
    }

    pub fn lock_for(&self, user_id: &str, exercise_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id.to_string(), exercise_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Outcome of rebuilding every ledger of a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub user_id: String,
    pub exercises: usize,
    pub records: usize,
    pub pr_entries: usize,
    /// Ledger digest per exercise
    pub digests: BTreeMap<String, String>,
}

/// Transactional ledger maintenance
pub struct PrRecalculator {
    detector: PrDetector,
    locks: Arc<PairLockRegistry>,
}

impl PrRecalculator {
    pub fn new() -> Self {
        Self::with_config(RecordConfig::default(), PairLockRegistry::global())
    }

    /// Recalculators writing to the same store must share `locks`
    pub fn with_config(config: RecordConfig, locks: Arc<PairLockRegistry>) -> Self {
        PrRecalculator {
            detector: PrDetector::with_config(config),
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<PairLockRegistry> {
        &self.locks
    }

    /// Rebuild one pair's ledger from its full history, all-or-nothing
    pub fn recalculate_all(
        &self,
        db: &mut Database,
        user_id: &str,
        exercise_id: &str,
    ) -> Result<ReplayOutcome> {
        let locks = self.pair_locks(user_id, [exercise_id]);
        let _guards = acquire(&locks, user_id)?;

        let span = tracing::info_span!("recalculate_records", user_id, exercise_id);
        let _enter = span.enter();

        let outcome = db
            .recalculate_records(user_id, exercise_id, |entries, load_type, bodyweights| {
                self.replay(entries, load_type, bodyweights)
            })
            .map_err(log_rollback)?;

        tracing::info!(
            records = outcome.records.len(),
            pr_entries = outcome.pr_entry_count(),
            "Ledger rebuilt"
        );

        Ok(outcome)
    }

    /// Rebuild every ledger of a user in one transaction
    ///
    /// Histories are read under the write lock and replayed in parallel; the
    /// new ledgers are written before the lock is released.
    pub fn rebuild_user(&self, db: &mut Database, user_id: &str) -> Result<RebuildSummary> {
        let exercise_ids = db.user_exercise_ids(user_id)?;
        let locks = self.pair_locks(user_id, exercise_ids.iter().map(String::as_str));
        let _guards = acquire(&locks, user_id)?;

        let span = tracing::info_span!("rebuild_user", user_id);
        let _enter = span.enter();

        let outcomes = db
            .recalculate_user_records(user_id, |histories, bodyweights| {
                histories
                    .par_iter()
                    .map(|h| self.replay(&h.entries, h.load_type, bodyweights))
                    .collect()
            })
            .map_err(log_rollback)?;

        let mut summary = RebuildSummary {
            user_id: user_id.to_string(),
            ..RebuildSummary::default()
        };
        for (exercise_id, outcome) in outcomes {
            summary.exercises += 1;
            summary.records += outcome.records.len();
            summary.pr_entries += outcome.pr_entry_count();
            summary
                .digests
                .insert(exercise_id, ledger_digest(&outcome.records)?);
        }

        tracing::info!(
            exercises = summary.exercises,
            records = summary.records,
            "User ledgers rebuilt"
        );

        Ok(summary)
    }

    /// Store a new entry and rebuild its pair
    pub fn record_entry(&self, db: &mut Database, entry: &LiftEntry) -> Result<(LiftEntry, ReplayOutcome)> {
        let locks = self.pair_locks(&entry.user_id, [entry.exercise_id.as_str()]);
        let _guards = acquire(&locks, &entry.user_id)?;

        let stored = db.store_lift_entry(entry)?;
        let outcome = db
            .recalculate_records(&stored.user_id, &stored.exercise_id, |entries, load_type, bodyweights| {
                self.replay(entries, load_type, bodyweights)
            })
            .map_err(log_rollback)?;
        Ok((stored, outcome))
    }

    /// Delete an entry and rebuild the pair it belonged to, atomically
    pub fn delete_entry(&self, db: &mut Database, entry_id: &str) -> Result<ReplayOutcome> {
        let entry = db
            .load_lift_entry(entry_id)?
            .ok_or_else(|| DatabaseError::NotFound {
                table: "lift_entries".to_string(),
                id: entry_id.to_string(),
            })?;
        let locks = self.pair_locks(&entry.user_id, [entry.exercise_id.as_str()]);
        let _guards = acquire(&locks, &entry.user_id)?;

        let (removed, outcome) = db
            .delete_lift_entry(entry_id, |entries, load_type, bodyweights| {
                self.replay(entries, load_type, bodyweights)
            })
            .map_err(log_rollback)?;

        tracing::debug!(entry_id, exercise_id = %removed.exercise_id, "Lift entry deleted");
        Ok(outcome)
    }

    /// Merge one exercise's history into another and rebuild both pairs, atomically
    pub fn reassign_exercise(
        &self,
        db: &mut Database,
        user_id: &str,
        from_exercise_id: &str,
        to_exercise_id: &str,
    ) -> Result<usize> {
        let locks = self.pair_locks(user_id, [from_exercise_id, to_exercise_id]);
        let _guards = acquire(&locks, user_id)?;

        let (moved, _, _) = db
            .reassign_exercise(user_id, from_exercise_id, to_exercise_id, |entries, load_type, bodyweights| {
                self.replay(entries, load_type, bodyweights)
            })
            .map_err(log_rollback)?;

        tracing::info!(
            user_id,
            from = from_exercise_id,
            to = to_exercise_id,
            moved,
            "Exercise history reassigned"
        );

        Ok(moved)
    }

    /// Live records of a pair as currently stored
    pub fn current_records(&self, db: &Database, user_id: &str, exercise_id: &str) -> Result<CurrentRecords> {
        Ok(current_records(&db.load_records(user_id, exercise_id)?))
    }
}

impl Default for PrRecalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PrRecalculator {
    fn replay(&self, entries: &[LiftEntry], load_type: LoadType, bodyweights: &[BodyweightMeasurement]) -> ReplayOutcome {
        self.detector.replay(entries, load_type, bodyweights)
    }

    /// Pair locks in a fixed (sorted, deduplicated) order
    fn pair_locks<'a>(
        &self,
        user_id: &str,
        exercise_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Arc<Mutex<()>>> {
        exercise_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|exercise_id| self.locks.lock_for(user_id, exercise_id))
            .collect()
    }
}

fn acquire<'a>(locks: &'a [Arc<Mutex<()>>], user_id: &str) -> Result<Vec<MutexGuard<'a, ()>>> {
    locks
        .iter()
        .map(|lock| {
            lock.lock()
                .map_err(|_| LiftRsError::Internal(format!("pair lock poisoned for {}", user_id)))
        })
        .collect()
}

fn log_rollback(err: LiftRsError) -> LiftRsError {
    tracing::error!(error = %err, severity = ?err.severity(), "Ledger rebuild rolled back");
    err
}
