//! Personal record detection
//!
//! Records are never authored directly. The ledger for a (user, exercise)
//! pair is whatever a forward replay of that pair's history produces:
//!
//! - **Rep-specific**: for rep counts 1..=10, an entry's best load at that rep
//!   count beats the current record at the same count by more than 0.1.
//! - **Overall**: an entry's best estimated 1RM beats the current overall
//!   record by more than 0.1.
//!
//! An entry is a PR when it produced at least one ledger row. Each entry is
//! compared only against strictly earlier entries, ordered by
//! (`performed_at`, `sequence`).
//!
//! The tolerance is measured against the standing record, which only moves
//! when a record is set: 100, then 100.08, then 100.15 records the first and
//! the third lift, since 100.15 clears 100 + 0.1 even though 100.08 was lifted
//! in between.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use crate::config::RecordConfig;
use crate::error::{DatabaseError, Result};
use crate::models::{
    BodyweightMeasurement, LiftEntry, LoadType, PersonalRecordEntry, RecordKind,
};
use crate::one_rep_max::OneRepMaxEstimator;

/// Derived PR flags for one lift entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPrFlag {
    pub entry_id: String,
    pub is_pr: bool,
    pub pr_count: u32,
}

/// Result of replaying one (user, exercise) history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// Ledger rows in replay order
    pub records: Vec<PersonalRecordEntry>,

    /// One flag per replayed entry, in replay order
    pub entry_flags: Vec<EntryPrFlag>,

    /// Overall 1RM record standing after each entry
    pub running_best: Vec<Option<Decimal>>,
}

impl ReplayOutcome {
    pub fn pr_entry_count(&self) -> usize {
        self.entry_flags.iter().filter(|f| f.is_pr).count()
    }
}

/// The live (not superseded) records of a pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentRecords {
    pub by_reps: BTreeMap<u32, PersonalRecordEntry>,
    pub overall: Option<PersonalRecordEntry>,
}

struct ValidSet {
    reps: u32,
    load: Decimal,
    one_rep_max: Decimal,
}

/// Chronological PR replay
pub struct PrDetector {
    config: RecordConfig,
}

impl PrDetector {
    pub fn new() -> Self {
        Self::with_config(RecordConfig::default())
    }

    pub fn with_config(config: RecordConfig) -> Self {
        PrDetector { config }
    }

    /// Replay the full history of one (user, exercise) pair
    ///
    /// `entries` may arrive in any order; they are replayed by
    /// (`performed_at`, `sequence`, `id`). Exercises whose load type has no
    /// one-rep max never produce records.
    pub fn replay(
        &self,
        entries: &[LiftEntry],
        load_type: LoadType,
        bodyweights: &[BodyweightMeasurement],
    ) -> ReplayOutcome {
        let mut ordered: Vec<&LiftEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| {
            a.performed_at
                .cmp(&b.performed_at)
                .then(a.sequence.cmp(&b.sequence))
                .then(a.id.cmp(&b.id))
        });

        let mut outcome = ReplayOutcome::default();

        if !load_type.supports_one_rep_max() {
            for entry in ordered {
                outcome.entry_flags.push(EntryPrFlag {
                    entry_id: entry.id.clone(),
                    is_pr: false,
                    pr_count: 0,
                });
                outcome.running_best.push(None);
            }
            return outcome;
        }

        let mut rep_best: BTreeMap<u32, (Decimal, String)> = BTreeMap::new();
        let mut overall_best: Option<(Decimal, String)> = None;

        for entry in ordered {
            let sets = self.valid_sets(entry, load_type, bodyweights);
            let mut rows = Vec::new();

            for (reps, set) in self.best_per_rep_count(&sets) {
                let prior = rep_best.get(&reps).cloned();
                if self.beats(set.load, prior.as_ref().map(|(load, _)| *load)) {
                    let row = self.record_row(
                        entry,
                        RecordKind::RepSpecific,
                        Some(reps),
                        set,
                        prior.map(|(_, id)| id),
                    );
                    rep_best.insert(reps, (set.load, row.id.clone()));
                    rows.push(row);
                }
            }

            if let Some(best) = best_one_rep_max(&sets) {
                let prior = overall_best.clone();
                if self.beats(best.one_rep_max, prior.as_ref().map(|(value, _)| *value)) {
                    let row = self.record_row(
                        entry,
                        RecordKind::OverallOneRepMax,
                        None,
                        best,
                        prior.map(|(_, id)| id),
                    );
                    overall_best = Some((best.one_rep_max, row.id.clone()));
                    rows.push(row);
                }
            }

            outcome.entry_flags.push(EntryPrFlag {
                entry_id: entry.id.clone(),
                is_pr: !rows.is_empty(),
                pr_count: rows.len() as u32,
            });
            outcome
                .running_best
                .push(overall_best.as_ref().map(|(value, _)| *value));
            outcome.records.extend(rows);
        }

        outcome
    }

    /// Sets with a computable 1RM; the rest are dropped
    fn valid_sets(
        &self,
        entry: &LiftEntry,
        load_type: LoadType,
        bodyweights: &[BodyweightMeasurement],
    ) -> Vec<ValidSet> {
        let offset = OneRepMaxEstimator::offset_for(load_type, bodyweights, entry.performed_at);

        entry
            .sets
            .iter()
            .filter_map(|set| {
                OneRepMaxEstimator::estimate(set.weight, set.reps, offset)
                    .ok()
                    .map(|one_rep_max| ValidSet {
                        reps: set.reps,
                        load: set.weight + offset,
                        one_rep_max,
                    })
            })
            .collect()
    }

    fn best_per_rep_count<'a>(&self, sets: &'a [ValidSet]) -> BTreeMap<u32, &'a ValidSet> {
        let mut best: BTreeMap<u32, &ValidSet> = BTreeMap::new();
        for set in sets.iter().filter(|s| s.reps <= self.config.max_tracked_reps) {
            best.entry(set.reps)
                .and_modify(|current| {
                    if set.load > current.load {
                        *current = set;
                    }
                })
                .or_insert(set);
        }
        best
    }

    fn beats(&self, candidate: Decimal, prior: Option<Decimal>) -> bool {
        match prior {
            Some(prior) => candidate > prior + self.config.tolerance,
            None => true,
        }
    }

    fn record_row(
        &self,
        entry: &LiftEntry,
        kind: RecordKind,
        rep_count: Option<u32>,
        set: &ValidSet,
        supersedes: Option<String>,
    ) -> PersonalRecordEntry {
        PersonalRecordEntry {
            id: record_id(&entry.id, kind, rep_count),
            user_id: entry.user_id.clone(),
            exercise_id: entry.exercise_id.clone(),
            lift_entry_id: entry.id.clone(),
            kind,
            rep_count,
            weight: set.load.normalize(),
            value: set.one_rep_max.normalize(),
            supersedes,
            achieved_at: entry.performed_at,
        }
    }
}

impl Default for PrDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic ledger id: the same history always yields the same ids
pub fn record_id(entry_id: &str, kind: RecordKind, rep_count: Option<u32>) -> String {
    match (kind, rep_count) {
        (RecordKind::RepSpecific, Some(reps)) => format!("{}:rep:{}", entry_id, reps),
        (RecordKind::RepSpecific, None) => format!("{}:rep", entry_id),
        (RecordKind::OverallOneRepMax, _) => format!("{}:1rm", entry_id),
    }
}

/// SHA-256 over the canonical JSON encoding of a ledger
pub fn ledger_digest(records: &[PersonalRecordEntry]) -> Result<String> {
    let canonical = serde_json::to_vec(records)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Records not superseded by a later row
pub fn current_records(records: &[PersonalRecordEntry]) -> CurrentRecords {
    let superseded: HashSet<&str> = records
        .iter()
        .filter_map(|r| r.supersedes.as_deref())
        .collect();

    let mut current = CurrentRecords::default();
    for record in records.iter().filter(|r| !superseded.contains(r.id.as_str())) {
        match (record.kind, record.rep_count) {
            (RecordKind::RepSpecific, Some(reps)) => {
                current.by_reps.insert(reps, record.clone());
            }
            (RecordKind::OverallOneRepMax, _) => current.overall = Some(record.clone()),
            (RecordKind::RepSpecific, None) => {}
        }
    }
    current
}

fn best_one_rep_max(sets: &[ValidSet]) -> Option<&ValidSet> {
    sets.iter().fold(None, |best: Option<&ValidSet>, set| match best {
        Some(current) if current.one_rep_max >= set.one_rep_max => Some(current),
        _ => Some(set),
    })
}
