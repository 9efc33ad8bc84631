use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Movement patterns used to measure training variety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementArchetype {
    Push,
    Pull,
    Squat,
    Hinge,
    Carry,
    Core,
}

impl MovementArchetype {
    /// Number of archetypes; a perfectly balanced week touches each one 1/COUNT of the time
    pub const COUNT: usize = 6;

    pub fn label(&self) -> &'static str {
        match self {
            MovementArchetype::Push => "push",
            MovementArchetype::Pull => "pull",
            MovementArchetype::Squat => "squat",
            MovementArchetype::Hinge => "hinge",
            MovementArchetype::Carry => "carry",
            MovementArchetype::Core => "core",
        }
    }
}

impl fmt::Display for MovementArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How a muscle is involved in an exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuscleRole {
    PrimaryMover,
    Synergist,
    Stabilizer,
    Other,
}

impl fmt::Display for MuscleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuscleRole::PrimaryMover => write!(f, "primary mover"),
            MuscleRole::Synergist => write!(f, "synergist"),
            MuscleRole::Stabilizer => write!(f, "stabilizer"),
            MuscleRole::Other => write!(f, "other"),
        }
    }
}

/// How load is expressed for an exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    /// External load only (barbell, dumbbell, machine)
    Weighted,
    /// Bodyweight only, logged weight is usually zero
    Bodyweight,
    /// Bodyweight plus added external load (weighted pull-up, dip belt)
    WeightedBodyweight,
    /// Held for time (plank, dead hang)
    Timed,
    /// Covered for distance (sled push, farmer walk for meters)
    Distance,
}

impl LoadType {
    /// Bodyweight flagged exercises add the lifter's bodyweight to the logged load
    pub fn is_bodyweight(&self) -> bool {
        matches!(self, LoadType::Bodyweight | LoadType::WeightedBodyweight)
    }

    /// Only rep-based loading can be extrapolated to a one-rep max
    pub fn supports_one_rep_max(&self) -> bool {
        !matches!(self, LoadType::Timed | LoadType::Distance)
    }
}

/// A muscle and the role it plays in an exercise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuscleInvolvement {
    pub muscle: String,
    pub role: MuscleRole,
}

impl MuscleInvolvement {
    pub fn new(muscle: impl Into<String>, role: MuscleRole) -> Self {
        Self {
            muscle: muscle.into(),
            role,
        }
    }
}

/// Static reference metadata for an exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseProfile {
    /// Unique exercise identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Movement pattern, if known
    pub archetype: Option<MovementArchetype>,

    /// Free-form category ("barbell", "machine", ...)
    pub category: String,

    /// Difficulty level from 1 (easiest) to 5 (hardest)
    pub difficulty: u8,

    /// Hours the primary movers need before they count as recovered
    pub recovery_hours: u32,

    /// How load is logged for this exercise
    pub load_type: LoadType,

    /// Ordered muscle involvements
    pub muscles: Vec<MuscleInvolvement>,
}

impl ExerciseProfile {
    /// Muscles listed as primary movers, in profile order
    pub fn primary_movers(&self) -> impl Iterator<Item = &str> {
        self.muscles
            .iter()
            .filter(|m| m.role == MuscleRole::PrimaryMover)
            .map(|m| m.muscle.as_str())
    }
}

/// A single set within a lift entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftSet {
    /// Logged external load
    pub weight: Decimal,

    /// Completed repetitions
    pub reps: u32,
}

impl LiftSet {
    pub fn new(weight: Decimal, reps: u32) -> Self {
        Self { weight, reps }
    }
}

/// A logged training session for one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftEntry {
    /// Unique identifier for the entry
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Exercise performed
    pub exercise_id: String,

    /// When the session was performed
    pub performed_at: DateTime<Utc>,

    /// Creation order, breaks ties between entries with equal timestamps
    pub sequence: i64,

    /// Ordered sets
    pub sets: Vec<LiftSet>,

    /// Optional free-text note
    pub notes: Option<String>,

    /// Derived: set by the record rebuild only
    pub is_pr: bool,

    /// Derived: number of ledger rows sourced from this entry
    pub pr_count: u32,
}

impl LiftEntry {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        exercise_id: impl Into<String>,
        performed_at: DateTime<Utc>,
        sets: Vec<LiftSet>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            exercise_id: exercise_id.into(),
            performed_at,
            sequence: 0,
            sets,
            notes: None,
            is_pr: false,
            pr_count: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Kind of personal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Best weight at an exact repetition count
    #[serde(rename = "rep_specific")]
    RepSpecific,
    /// Best estimated one-rep max
    #[serde(rename = "overall_1rm")]
    OverallOneRepMax,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::RepSpecific => write!(f, "rep_specific"),
            RecordKind::OverallOneRepMax => write!(f, "overall_1rm"),
        }
    }
}

/// A row of the personal record ledger; always derived from lift history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalRecordEntry {
    /// Deterministic identifier derived from source entry, kind and rep count
    pub id: String,

    pub user_id: String,

    pub exercise_id: String,

    /// Lift entry the record was set in
    pub lift_entry_id: String,

    pub kind: RecordKind,

    /// Rep count for rep-specific records
    pub rep_count: Option<u32>,

    /// Effective load of the record set (logged weight plus bodyweight offset)
    pub weight: Decimal,

    /// Estimated one-rep max of the record set
    pub value: Decimal,

    /// Record this one replaced, if any
    pub supersedes: Option<String>,

    pub achieved_at: DateTime<Utc>,
}

/// A bodyweight reading used to resolve bodyweight offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyweightMeasurement {
    pub user_id: String,
    pub measured_at: DateTime<Utc>,
    pub weight: Decimal,
}
