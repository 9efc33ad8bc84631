use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{DatabaseError, LiftRsError, Result};
use crate::history::{HistoryRepository, LiftEntryFilters, PairHistory};
use crate::models::{
    BodyweightMeasurement, ExerciseProfile, LiftEntry, LiftSet, LoadType, MovementArchetype,
    MuscleInvolvement, MuscleRole, PersonalRecordEntry, RecordKind,
};
use crate::records::ReplayOutcome;

/// SQLite allows at most 999 bound variables in older builds
const MAX_BATCH_IDS: usize = 500;

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Reference store for profiles, lift history and the record ledger
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&mut self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exercises (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                archetype TEXT,
                category TEXT NOT NULL,
                difficulty INTEGER NOT NULL,
                recovery_hours INTEGER NOT NULL,
                load_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exercise_muscles (
                exercise_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                muscle TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (exercise_id, position),
                FOREIGN KEY (exercise_id) REFERENCES exercises (id) ON DELETE CASCADE
            );

            -- No foreign key to exercises: history may reference unknown profiles
            CREATE TABLE IF NOT EXISTS lift_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                exercise_id TEXT NOT NULL,
                performed_at INTEGER NOT NULL,
                sequence INTEGER NOT NULL UNIQUE,
                notes TEXT,
                is_pr INTEGER NOT NULL DEFAULT 0,
                pr_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS lift_sets (
                entry_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                weight TEXT NOT NULL,
                reps INTEGER NOT NULL,
                PRIMARY KEY (entry_id, position),
                FOREIGN KEY (entry_id) REFERENCES lift_entries (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS bodyweight_measurements (
                user_id TEXT NOT NULL,
                measured_at INTEGER NOT NULL,
                weight TEXT NOT NULL,
                PRIMARY KEY (user_id, measured_at)
            );

            CREATE TABLE IF NOT EXISTS personal_records (
                id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                exercise_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                lift_entry_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                rep_count INTEGER,
                weight TEXT NOT NULL,
                value TEXT NOT NULL,
                supersedes TEXT,
                achieved_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, exercise_id, id),
                FOREIGN KEY (lift_entry_id) REFERENCES lift_entries (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_entries_user_time
                ON lift_entries (user_id, performed_at, sequence);
            CREATE INDEX IF NOT EXISTS idx_entries_pair_time
                ON lift_entries (user_id, exercise_id, performed_at, sequence);
            CREATE INDEX IF NOT EXISTS idx_records_pair
                ON personal_records (user_id, exercise_id, position);
            "#,
        )?;

        Ok(())
    }

    /// Writer transaction holding the database write lock from its first statement
    fn write_transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Insert or replace an exercise profile and its muscle list
    pub fn store_exercise(&mut self, profile: &ExerciseProfile) -> Result<()> {
        let tx = self.write_transaction()?;

        tx.execute(
            r#"
            INSERT INTO exercises (id, name, archetype, category, difficulty, recovery_hours, load_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                archetype = excluded.archetype,
                category = excluded.category,
                difficulty = excluded.difficulty,
                recovery_hours = excluded.recovery_hours,
                load_type = excluded.load_type
            "#,
            params![
                profile.id,
                profile.name,
                profile.archetype.map(|a| a.label()),
                profile.category,
                profile.difficulty,
                profile.recovery_hours,
                profile.load_type.as_db_str(),
            ],
        )?;

        tx.execute(
            "DELETE FROM exercise_muscles WHERE exercise_id = ?1",
            params![profile.id],
        )?;
        for (position, involvement) in profile.muscles.iter().enumerate() {
            tx.execute(
                "INSERT INTO exercise_muscles (exercise_id, position, muscle, role) VALUES (?1, ?2, ?3, ?4)",
                params![
                    profile.id,
                    position as i64,
                    involvement.muscle,
                    involvement.role.as_db_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Store a new lift entry
    ///
    /// A positive `sequence` on the input is kept; zero means "assign the next
    /// creation sequence". Derived PR flags are not taken from the input; they
    /// start cleared and are only written by a ledger rebuild.
    pub fn store_lift_entry(&mut self, entry: &LiftEntry) -> Result<LiftEntry> {
        if entry.id.trim().is_empty() || entry.user_id.trim().is_empty() {
            return Err(LiftRsError::Validation(
                "lift entries need a non-empty id and user id".to_string(),
            ));
        }

        let tx = self.write_transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM lift_entries WHERE id = ?1",
                params![entry.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(DatabaseError::Duplicate {
                table: "lift_entries".to_string(),
                key: entry.id.clone(),
            }
            .into());
        }

        let sequence: i64 = if entry.sequence > 0 {
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM lift_entries WHERE sequence = ?1",
                    params![entry.sequence],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(DatabaseError::Duplicate {
                    table: "lift_entries".to_string(),
                    key: format!("sequence {}", entry.sequence),
                }
                .into());
            }
            entry.sequence
        } else {
            tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM lift_entries",
                [],
                |row| row.get(0),
            )?
        };

        tx.execute(
            r#"
            INSERT INTO lift_entries (id, user_id, exercise_id, performed_at, sequence, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.id,
                entry.user_id,
                entry.exercise_id,
                entry.performed_at.timestamp_micros(),
                sequence,
                entry.notes,
            ],
        )?;

        for (position, set) in entry.sets.iter().enumerate() {
            tx.execute(
                "INSERT INTO lift_sets (entry_id, position, weight, reps) VALUES (?1, ?2, ?3, ?4)",
                params![entry.id, position as i64, set.weight.to_string(), set.reps],
            )?;
        }

        tx.commit()?;

        let mut stored = entry.clone();
        stored.sequence = sequence;
        stored.is_pr = false;
        stored.pr_count = 0;
        Ok(stored)
    }

    /// Insert or replace a bodyweight reading
    pub fn store_bodyweight(&mut self, measurement: &BodyweightMeasurement) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO bodyweight_measurements (user_id, measured_at, weight)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                measurement.user_id,
                measurement.measured_at.timestamp_micros(),
                measurement.weight.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Load a single entry with its sets
    pub fn load_lift_entry(&self, entry_id: &str) -> Result<Option<LiftEntry>> {
        load_entry(&self.conn, entry_id)
    }

    /// Remove an entry and rebuild its pair's ledger in the same transaction
    ///
    /// The entry's sets and the ledger rows it sourced go with it. If the
    /// rebuild fails nothing is removed.
    pub fn delete_lift_entry<F>(&mut self, entry_id: &str, replay: F) -> Result<(LiftEntry, ReplayOutcome)>
    where
        F: Fn(&[LiftEntry], LoadType, &[BodyweightMeasurement]) -> ReplayOutcome,
    {
        let tx = self.write_transaction()?;

        let entry = load_entry(&tx, entry_id)?.ok_or_else(|| DatabaseError::NotFound {
            table: "lift_entries".to_string(),
            id: entry_id.to_string(),
        })?;
        tx.execute("DELETE FROM lift_entries WHERE id = ?1", params![entry_id])?;

        let outcome = rebuild_pair(&tx, &entry.user_id, &entry.exercise_id, &replay)?;
        tx.commit()?;

        Ok((entry, outcome))
    }

    /// Move every entry of a user from one exercise to another and rebuild
    /// both ledgers in the same transaction
    ///
    /// Returns the number of moved entries and the source and target replays.
    pub fn reassign_exercise<F>(
        &mut self,
        user_id: &str,
        from_exercise_id: &str,
        to_exercise_id: &str,
        replay: F,
    ) -> Result<(usize, ReplayOutcome, ReplayOutcome)>
    where
        F: Fn(&[LiftEntry], LoadType, &[BodyweightMeasurement]) -> ReplayOutcome,
    {
        let tx = self.write_transaction()?;
        let moved = tx.execute(
            "UPDATE lift_entries SET exercise_id = ?3 WHERE user_id = ?1 AND exercise_id = ?2",
            params![user_id, from_exercise_id, to_exercise_id],
        )?;

        let from_outcome = rebuild_pair(&tx, user_id, from_exercise_id, &replay)?;
        let to_outcome = rebuild_pair(&tx, user_id, to_exercise_id, &replay)?;
        tx.commit()?;

        Ok((moved, from_outcome, to_outcome))
    }

    /// Exercises that have history or ledger rows for a user
    pub fn user_exercise_ids(&self, user_id: &str) -> Result<Vec<String>> {
        exercise_ids_for_user(&self.conn, user_id)
    }

    /// Rebuild the ledger of one pair inside a single transaction
    ///
    /// History is read, replayed and written back under the same write lock;
    /// any failure rolls everything back and the previous ledger stays.
    pub fn recalculate_records<F>(
        &mut self,
        user_id: &str,
        exercise_id: &str,
        replay: F,
    ) -> Result<ReplayOutcome>
    where
        F: Fn(&[LiftEntry], LoadType, &[BodyweightMeasurement]) -> ReplayOutcome,
    {
        let tx = self.write_transaction()?;
        let outcome = rebuild_pair(&tx, user_id, exercise_id, &replay)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Rebuild every ledger of a user inside a single transaction
    ///
    /// All histories are read under the write lock and handed to
    /// `replay_all` at once, which must return one outcome per history in
    /// the same order.
    pub fn recalculate_user_records<F>(
        &mut self,
        user_id: &str,
        replay_all: F,
    ) -> Result<Vec<(String, ReplayOutcome)>>
    where
        F: FnOnce(&[PairHistory], &[BodyweightMeasurement]) -> Vec<ReplayOutcome>,
    {
        let tx = self.write_transaction()?;

        let exercise_ids = exercise_ids_for_user(&tx, user_id)?;
        let profiles = fetch_profiles(&tx, &exercise_ids)?;
        let bodyweights = fetch_bodyweights(&tx, user_id)?;

        let mut histories = Vec::with_capacity(exercise_ids.len());
        for exercise_id in exercise_ids {
            let entries = fetch_entries(
                &tx,
                &LiftEntryFilters::for_user(user_id).exercise(&exercise_id),
            )?;
            histories.push(PairHistory {
                load_type: profiles
                    .get(&exercise_id)
                    .map(|p| p.load_type)
                    .unwrap_or(LoadType::Weighted),
                exercise_id,
                entries,
            });
        }

        let outcomes = replay_all(&histories, &bodyweights);
        if outcomes.len() != histories.len() {
            return Err(LiftRsError::Internal(format!(
                "replay returned {} outcomes for {} histories",
                outcomes.len(),
                histories.len()
            )));
        }

        for (history, outcome) in histories.iter().zip(&outcomes) {
            write_ledger(&tx, user_id, &history.exercise_id, outcome)
                .map_err(|e| rebuild_failed(user_id, &history.exercise_id, e))?;
        }
        tx.commit()?;

        Ok(histories
            .into_iter()
            .map(|h| h.exercise_id)
            .zip(outcomes)
            .collect())
    }

    /// Ledger rows of a pair in replay order
    pub fn load_records(&self, user_id: &str, exercise_id: &str) -> Result<Vec<PersonalRecordEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, exercise_id, lift_entry_id, kind, rep_count,
                   weight, value, supersedes, achieved_at
            FROM personal_records
            WHERE user_id = ?1 AND exercise_id = ?2
            ORDER BY position
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id, exercise_id], |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("user_id")?,
                    row.get::<_, String>("exercise_id")?,
                    row.get::<_, String>("lift_entry_id")?,
                    row.get::<_, String>("kind")?,
                    row.get::<_, Option<u32>>("rep_count")?,
                    row.get::<_, String>("weight")?,
                    row.get::<_, String>("value")?,
                    row.get::<_, Option<String>>("supersedes")?,
                    row.get::<_, i64>("achieved_at")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, user_id, exercise_id, lift_entry_id, kind, rep_count, weight, value, supersedes, achieved_at)|
                 -> Result<PersonalRecordEntry> {
                    Ok(PersonalRecordEntry {
                        id,
                        user_id,
                        exercise_id,
                        lift_entry_id,
                        kind: RecordKind::from_db_str(&kind)?,
                        rep_count,
                        weight: parse_decimal(&weight)?,
                        value: parse_decimal(&value)?,
                        supersedes,
                        achieved_at: timestamp_from_micros(achieved_at)?,
                    })
                },
            )
            .collect()
    }

    /// Row counts per table
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            exercise_count: count("exercises")?,
            entry_count: count("lift_entries")?,
            bodyweight_count: count("bodyweight_measurements")?,
            record_count: count("personal_records")?,
        })
    }
}

impl HistoryRepository for Database {
    fn lift_entries(&self, filters: &LiftEntryFilters) -> Result<Vec<LiftEntry>> {
        fetch_entries(&self.conn, filters)
    }

    fn exercise_profiles(&self, exercise_ids: &[String]) -> Result<HashMap<String, ExerciseProfile>> {
        fetch_profiles(&self.conn, exercise_ids)
    }

    fn bodyweight_measurements(&self, user_id: &str) -> Result<Vec<BodyweightMeasurement>> {
        fetch_bodyweights(&self.conn, user_id)
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub exercise_count: usize,
    pub entry_count: usize,
    pub bodyweight_count: usize,
    pub record_count: usize,
}

const ENTRY_SELECT: &str = r#"
    SELECT id, user_id, exercise_id, performed_at, sequence, notes, is_pr, pr_count
    FROM lift_entries
"#;

fn entry_header_from_row(row: &rusqlite::Row) -> rusqlite::Result<(LiftEntry, i64)> {
    let performed_at: i64 = row.get("performed_at")?;
    let entry = LiftEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        exercise_id: row.get("exercise_id")?,
        performed_at: DateTime::<Utc>::default(),
        sequence: row.get("sequence")?,
        sets: Vec::new(),
        notes: row.get("notes")?,
        is_pr: row.get("is_pr")?,
        pr_count: row.get("pr_count")?,
    };
    Ok((entry, performed_at))
}

fn load_entry(conn: &Connection, entry_id: &str) -> Result<Option<LiftEntry>> {
    let header = conn
        .query_row(
            &format!("{} WHERE id = ?1", ENTRY_SELECT),
            params![entry_id],
            entry_header_from_row,
        )
        .optional()?;

    match header {
        Some(header) => {
            let mut entries = attach_sets(conn, vec![header])?;
            Ok(entries.pop())
        }
        None => Ok(None),
    }
}

fn exercise_ids_for_user(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT exercise_id FROM lift_entries WHERE user_id = ?1
        UNION
        SELECT exercise_id FROM personal_records WHERE user_id = ?1
        ORDER BY exercise_id
        "#,
    )?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn fetch_entries(conn: &Connection, filters: &LiftEntryFilters) -> Result<Vec<LiftEntry>> {
    let mut sql = format!("{} WHERE 1 = 1", ENTRY_SELECT);
    let mut values: Vec<Value> = Vec::new();

    if let Some(ref user_id) = filters.user_id {
        sql.push_str(" AND user_id = ?");
        values.push(Value::Text(user_id.clone()));
    }
    if let Some(ref exercise_id) = filters.exercise_id {
        sql.push_str(" AND exercise_id = ?");
        values.push(Value::Text(exercise_id.clone()));
    }
    if let Some(from) = filters.from {
        sql.push_str(" AND performed_at >= ?");
        values.push(Value::Integer(from.timestamp_micros()));
    }
    if let Some(to) = filters.to {
        sql.push_str(" AND performed_at <= ?");
        values.push(Value::Integer(to.timestamp_micros()));
    }

    // Bounded scans keep the most recent entries, then flip back to chronological
    let descending = filters.limit.is_some();
    if let Some(limit) = filters.limit {
        sql.push_str(" ORDER BY performed_at DESC, sequence DESC LIMIT ?");
        values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
    } else {
        sql.push_str(" ORDER BY performed_at, sequence");
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut headers = stmt
        .query_map(params_from_iter(values), entry_header_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if descending {
        headers.reverse();
    }

    attach_sets(conn, headers)
}

fn attach_sets(conn: &Connection, headers: Vec<(LiftEntry, i64)>) -> Result<Vec<LiftEntry>> {
    let ids: Vec<String> = headers.iter().map(|(e, _)| e.id.clone()).collect();
    let mut sets: HashMap<String, Vec<LiftSet>> = HashMap::new();

    for chunk in ids.chunks(MAX_BATCH_IDS) {
        let sql = format!(
            "SELECT entry_id, weight, reps FROM lift_sets WHERE entry_id IN ({}) ORDER BY entry_id, position",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (entry_id, weight, reps) in rows {
            sets.entry(entry_id)
                .or_default()
                .push(LiftSet::new(parse_decimal(&weight)?, reps));
        }
    }

    headers
        .into_iter()
        .map(|(mut entry, performed_at)| -> Result<LiftEntry> {
            entry.performed_at = timestamp_from_micros(performed_at)?;
            entry.sets = sets.remove(&entry.id).unwrap_or_default();
            Ok(entry)
        })
        .collect()
}

fn fetch_profiles(conn: &Connection, exercise_ids: &[String]) -> Result<HashMap<String, ExerciseProfile>> {
    let mut profiles = HashMap::new();

    for chunk in exercise_ids.chunks(MAX_BATCH_IDS) {
        let sql = format!(
            r#"
            SELECT id, name, archetype, category, difficulty, recovery_hours, load_type
            FROM exercises WHERE id IN ({})
            "#,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("name")?,
                    row.get::<_, Option<String>>("archetype")?,
                    row.get::<_, String>("category")?,
                    row.get::<_, u8>("difficulty")?,
                    row.get::<_, u32>("recovery_hours")?,
                    row.get::<_, String>("load_type")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (id, name, archetype, category, difficulty, recovery_hours, load_type) in rows {
            let archetype = archetype
                .as_deref()
                .map(MovementArchetype::from_db_str)
                .transpose()?;
            profiles.insert(
                id.clone(),
                ExerciseProfile {
                    id,
                    name,
                    archetype,
                    category,
                    difficulty,
                    recovery_hours,
                    load_type: LoadType::from_db_str(&load_type)?,
                    muscles: Vec::new(),
                },
            );
        }

        let sql = format!(
            "SELECT exercise_id, muscle, role FROM exercise_muscles WHERE exercise_id IN ({}) ORDER BY exercise_id, position",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let muscles = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (exercise_id, muscle, role) in muscles {
            if let Some(profile) = profiles.get_mut(&exercise_id) {
                profile
                    .muscles
                    .push(MuscleInvolvement::new(muscle, MuscleRole::from_db_str(&role)?));
            }
        }
    }

    Ok(profiles)
}

fn fetch_bodyweights(conn: &Connection, user_id: &str) -> Result<Vec<BodyweightMeasurement>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT user_id, measured_at, weight FROM bodyweight_measurements
        WHERE user_id = ?1 ORDER BY measured_at
        "#,
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(user_id, measured_at, weight)| -> Result<BodyweightMeasurement> {
            Ok(BodyweightMeasurement {
                user_id,
                measured_at: timestamp_from_micros(measured_at)?,
                weight: parse_decimal(&weight)?,
            })
        })
        .collect()
}

/// Read, replay and rewrite one pair's ledger inside an open transaction
fn rebuild_pair<F>(tx: &Transaction, user_id: &str, exercise_id: &str, replay: &F) -> Result<ReplayOutcome>
where
    F: Fn(&[LiftEntry], LoadType, &[BodyweightMeasurement]) -> ReplayOutcome,
{
    let entries = fetch_entries(tx, &LiftEntryFilters::for_user(user_id).exercise(exercise_id))?;
    let load_type = fetch_profiles(tx, &[exercise_id.to_string()])?
        .get(exercise_id)
        .map(|p| p.load_type)
        .unwrap_or(LoadType::Weighted);
    let bodyweights = fetch_bodyweights(tx, user_id)?;

    let outcome = replay(&entries, load_type, &bodyweights);

    write_ledger(tx, user_id, exercise_id, &outcome)
        .map_err(|e| rebuild_failed(user_id, exercise_id, e))?;
    Ok(outcome)
}

fn rebuild_failed(user_id: &str, exercise_id: &str, err: LiftRsError) -> DatabaseError {
    DatabaseError::RebuildFailed {
        user_id: user_id.to_string(),
        exercise_id: exercise_id.to_string(),
        reason: err.to_string(),
    }
}

/// Delete the pair's ledger, insert the replayed rows and refresh entry flags
fn write_ledger(
    tx: &Transaction,
    user_id: &str,
    exercise_id: &str,
    outcome: &ReplayOutcome,
) -> Result<()> {
    tx.execute(
        "DELETE FROM personal_records WHERE user_id = ?1 AND exercise_id = ?2",
        params![user_id, exercise_id],
    )?;

    for (position, record) in outcome.records.iter().enumerate() {
        tx.execute(
            r#"
            INSERT INTO personal_records (
                id, user_id, exercise_id, position, lift_entry_id, kind, rep_count,
                weight, value, supersedes, achieved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.id,
                user_id,
                exercise_id,
                position as i64,
                record.lift_entry_id,
                record.kind.as_db_str(),
                record.rep_count,
                record.weight.normalize().to_string(),
                record.value.normalize().to_string(),
                record.supersedes,
                record.achieved_at.timestamp_micros(),
            ],
        )?;
    }

    tx.execute(
        "UPDATE lift_entries SET is_pr = 0, pr_count = 0 WHERE user_id = ?1 AND exercise_id = ?2",
        params![user_id, exercise_id],
    )?;
    for flag in outcome.entry_flags.iter().filter(|f| f.is_pr) {
        tx.execute(
            "UPDATE lift_entries SET is_pr = 1, pr_count = ?2 WHERE id = ?1",
            params![flag.entry_id, flag.pr_count],
        )?;
    }

    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| DatabaseError::Serialization(format!("Invalid decimal '{}': {}", s, e)).into())
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| DatabaseError::Serialization(format!("Invalid timestamp: {}", micros)).into())
}

// String conversion of model enums for database storage
impl MovementArchetype {
    pub fn from_db_str(s: &str) -> std::result::Result<Self, DatabaseError> {
        match s {
            "push" => Ok(MovementArchetype::Push),
            "pull" => Ok(MovementArchetype::Pull),
            "squat" => Ok(MovementArchetype::Squat),
            "hinge" => Ok(MovementArchetype::Hinge),
            "carry" => Ok(MovementArchetype::Carry),
            "core" => Ok(MovementArchetype::Core),
            _ => Err(DatabaseError::Serialization(format!("Unknown archetype: {}", s))),
        }
    }
}

impl MuscleRole {
    pub fn from_db_str(s: &str) -> std::result::Result<Self, DatabaseError> {
        match s {
            "primary_mover" => Ok(MuscleRole::PrimaryMover),
            "synergist" => Ok(MuscleRole::Synergist),
            "stabilizer" => Ok(MuscleRole::Stabilizer),
            "other" => Ok(MuscleRole::Other),
            _ => Err(DatabaseError::Serialization(format!("Unknown muscle role: {}", s))),
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            MuscleRole::PrimaryMover => "primary_mover",
            MuscleRole::Synergist => "synergist",
            MuscleRole::Stabilizer => "stabilizer",
            MuscleRole::Other => "other",
        }
    }
}

impl LoadType {
    pub fn from_db_str(s: &str) -> std::result::Result<Self, DatabaseError> {
        match s {
            "weighted" => Ok(LoadType::Weighted),
            "bodyweight" => Ok(LoadType::Bodyweight),
            "weighted_bodyweight" => Ok(LoadType::WeightedBodyweight),
            "timed" => Ok(LoadType::Timed),
            "distance" => Ok(LoadType::Distance),
            _ => Err(DatabaseError::Serialization(format!("Unknown load type: {}", s))),
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            LoadType::Weighted => "weighted",
            LoadType::Bodyweight => "bodyweight",
            LoadType::WeightedBodyweight => "weighted_bodyweight",
            LoadType::Timed => "timed",
            LoadType::Distance => "distance",
        }
    }
}

impl RecordKind {
    pub fn from_db_str(s: &str) -> std::result::Result<Self, DatabaseError> {
        match s {
            "rep_specific" => Ok(RecordKind::RepSpecific),
            "overall_1rm" => Ok(RecordKind::OverallOneRepMax),
            _ => Err(DatabaseError::Serialization(format!("Unknown record kind: {}", s))),
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            RecordKind::RepSpecific => "rep_specific",
            RecordKind::OverallOneRepMax => "overall_1rm",
        }
    }
}
