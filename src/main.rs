use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use liftrs::error::ErrorSeverity;
use liftrs::{
    emit_recommendation_trace, LiftRsError, init_logging, ActivityAnalyzer, BodyweightMeasurement, Database,
    EngineConfig, ExerciseProfile, LiftEntry, LiftSet, PairLockRegistry, PrRecalculator,
    RecommendationEngine, Suggestion, TrainingProgressionService,
};

/// liftrs - Strength training intelligence CLI
///
/// Recommends what to train next, keeps a personal record ledger that is
/// always rebuilt from history, and suggests next-session weights.
#[derive(Parser)]
#[command(name = "liftrs")]
#[command(version = "0.1.0")]
#[command(about = "Strength training intelligence CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides the database path from the config
    #[arg(short, long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import exercises, lift history and bodyweights from a JSON bundle
    Import {
        /// Input file path
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show recent muscle workload and movement variety
    Analyze {
        #[arg(short, long)]
        user: String,

        /// Reference time (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Rank exercises to train next
    Recommend {
        #[arg(short, long)]
        user: String,

        /// Number of recommendations
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Reference time (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Personal record ledger maintenance
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Suggest a weight for the next session
    Suggest {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        exercise: String,

        /// Target repetitions
        #[arg(short, long, default_value = "5")]
        reps: u32,

        /// Reference time (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Configure application settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// Rebuild ledgers from full history
    Rebuild {
        #[arg(short, long)]
        user: String,

        /// Only rebuild this exercise
        #[arg(short, long)]
        exercise: Option<String>,
    },

    /// Show the current records of an exercise
    Show {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        exercise: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

/// JSON import bundle
#[derive(Debug, Deserialize)]
struct ImportBundle {
    #[serde(default)]
    exercises: Vec<ExerciseProfile>,
    #[serde(default)]
    entries: Vec<ImportEntry>,
    #[serde(default)]
    bodyweights: Vec<BodyweightMeasurement>,
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    #[serde(default)]
    id: Option<String>,
    user_id: String,
    exercise_id: String,
    performed_at: DateTime<Utc>,
    sets: Vec<LiftSet>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Muscle")]
    muscle: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Days since")]
    days_since: String,
}

#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Exercise")]
    exercise: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Why")]
    reasons: String,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Record")]
    kind: String,
    #[tabled(rename = "Load")]
    weight: Decimal,
    #[tabled(rename = "Est. 1RM")]
    value: Decimal,
    #[tabled(rename = "Achieved")]
    achieved_at: String,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        report_error(&err);
        std::process::exit(1);
    }
}

/// Print engine errors with their user-facing message; anything else with its context chain
fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<LiftRsError>() {
        Some(lift_err) => {
            match lift_err.severity() {
                ErrorSeverity::Critical | ErrorSeverity::Error => {
                    tracing::error!(error = %err, severity = ?lift_err.severity(), "Command failed")
                }
                ErrorSeverity::Warning => tracing::warn!(error = %err, "Command failed"),
            }
            eprintln!("{} {}", "Error:".red().bold(), lift_err.user_message());
            if lift_err.is_retryable() {
                eprintln!("{}", "The database was busy; retrying may succeed.".yellow());
            }
        }
        None => eprintln!("{} {:#}", "Error:".red().bold(), err),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load_or_default(),
    };

    let mut log_config = config.logging.clone();
    log_config.level = log_config.level.raised_by(cli.verbose);
    init_logging(&log_config)?;

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.storage.database_path.clone());

    match cli.command {
        Commands::Import { file } => import_bundle(&config, &db_path, &file)?,

        Commands::Analyze { user, at } => {
            let db = open_database(&db_path)?;
            let analyzer = analyzer(&config);
            let snapshot = analyzer.analyze(&db, &user, at.unwrap_or_else(Utc::now))?;

            println!(
                "{}",
                format!("Activity for {} over the last {} days", user, snapshot.window_days)
                    .blue()
                    .bold()
            );

            let rows: Vec<WorkloadRow> = snapshot
                .muscle_workload
                .iter()
                .map(|(muscle, workload)| WorkloadRow {
                    muscle: muscle.clone(),
                    workload: format!("{:.2}", workload),
                    days_since: snapshot
                        .days_since_worked(muscle)
                        .map(|d| format!("{:.1}", d))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));

            for (archetype, count) in &snapshot.archetype_frequency {
                println!("  {:<8} {}", archetype.to_string().cyan(), count);
            }
            let underworked = snapshot.underworked_muscles(config.recommendation.underworked_threshold);
            if !underworked.is_empty() {
                let list: Vec<&str> = underworked.iter().map(|m| m.as_str()).collect();
                println!("{} {}", "Underworked:".yellow(), list.join(", "));
            }
        }

        Commands::Recommend { user, count, at } => {
            let db = open_database(&db_path)?;
            let engine = RecommendationEngine::with_config(config.recommendation.clone());
            let (recommendations, trace) = engine.recommend_from_history(
                &db,
                &analyzer(&config),
                &user,
                count,
                at.unwrap_or_else(Utc::now),
            )?;
            emit_recommendation_trace(&user, &trace);

            if recommendations.is_empty() {
                println!(
                    "{}",
                    "No recommendations: nothing recent is recovered yet".yellow()
                );
                return Ok(());
            }

            let rows: Vec<RecommendationRow> = recommendations
                .iter()
                .enumerate()
                .map(|(i, rec)| RecommendationRow {
                    rank: i + 1,
                    exercise: rec.exercise_name.clone(),
                    score: format!("{:.2}", rec.score),
                    reasons: rec.reasons.join("\n"),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::Records { action } => {
            let mut db = open_database(&db_path)?;
            let recalculator = recalculator(&config);

            match action {
                RecordsAction::Rebuild { user, exercise: Some(exercise) } => {
                    let outcome = recalculator.recalculate_all(&mut db, &user, &exercise)?;
                    println!(
                        "{} {} records, {} PR sessions",
                        "✓ Rebuilt".green(),
                        outcome.records.len(),
                        outcome.pr_entry_count()
                    );
                    println!("  digest {}", liftrs::ledger_digest(&outcome.records)?.dimmed());
                }
                RecordsAction::Rebuild { user, exercise: None } => {
                    let summary = recalculator.rebuild_user(&mut db, &user)?;
                    println!(
                        "{} {} exercises, {} records",
                        "✓ Rebuilt".green(),
                        summary.exercises,
                        summary.records
                    );
                    for (exercise, digest) in &summary.digests {
                        println!("  {:<20} {}", exercise, digest.dimmed());
                    }
                }
                RecordsAction::Show { user, exercise } => {
                    let current = recalculator.current_records(&db, &user, &exercise)?;
                    let mut rows: Vec<RecordRow> = current
                        .by_reps
                        .values()
                        .map(|r| RecordRow {
                            kind: format!("{} reps", r.rep_count.unwrap_or_default()),
                            weight: r.weight,
                            value: r.value,
                            achieved_at: r.achieved_at.format("%Y-%m-%d").to_string(),
                        })
                        .collect();
                    if let Some(overall) = &current.overall {
                        rows.push(RecordRow {
                            kind: "overall 1RM".to_string(),
                            weight: overall.weight,
                            value: overall.value,
                            achieved_at: overall.achieved_at.format("%Y-%m-%d").to_string(),
                        });
                    }

                    if rows.is_empty() {
                        println!("{}", "No records yet".yellow());
                    } else {
                        println!("{}", Table::new(rows).with(Style::rounded()));
                    }
                }
            }
        }

        Commands::Suggest { user, exercise, reps, at } => {
            let db = open_database(&db_path)?;
            let service = TrainingProgressionService::with_config(
                config.progression.clone(),
                config.storage.max_scan_entries,
            );

            match service.suggest_next_weight(&db, &user, &exercise, reps, at.unwrap_or_else(Utc::now))? {
                Suggestion::Target(s) => {
                    println!(
                        "{} {} × {} for {} sets",
                        "Next session:".green().bold(),
                        s.weight,
                        s.target_reps,
                        s.suggested_sets
                    );
                    println!("  based on an estimated 1RM of {}", s.basis_one_rep_max);
                }
                Suggestion::NoSuggestion(reason) => {
                    println!("{} {}", "No suggestion:".yellow(), reason);
                }
            }
        }

        Commands::Config { action } => {
            let path = cli.config.clone().unwrap_or_else(EngineConfig::default_config_path);
            match action {
                ConfigAction::Init { force } => {
                    if path.exists() && !force {
                        anyhow::bail!(
                            "Config file already exists: {} (use --force to overwrite)",
                            path.display()
                        );
                    }
                    EngineConfig::default().save_to_file(&path)?;
                    println!("{} {}", "✓ Wrote".green(), path.display());
                }
                ConfigAction::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
            }
        }
    }

    Ok(())
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn analyzer(config: &EngineConfig) -> ActivityAnalyzer {
    ActivityAnalyzer::with_config(config.analysis.clone(), config.storage.max_scan_entries)
}

fn recalculator(config: &EngineConfig) -> PrRecalculator {
    PrRecalculator::with_config(config.records.clone(), PairLockRegistry::global())
}

fn import_bundle(config: &EngineConfig, db_path: &Path, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let bundle: ImportBundle =
        serde_json::from_str(&content).with_context(|| "Failed to parse import bundle")?;

    let mut db = open_database(db_path)?;
    println!("{}", "Importing training data...".green().bold());

    for profile in &bundle.exercises {
        db.store_exercise(profile)?;
    }
    for measurement in &bundle.bodyweights {
        db.store_bodyweight(measurement)?;
    }

    let mut users = BTreeSet::new();
    for item in bundle.entries {
        let mut entry = LiftEntry::new(
            item.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            item.user_id,
            item.exercise_id,
            item.performed_at,
            item.sets,
        );
        entry.notes = item.notes;
        users.insert(entry.user_id.clone());
        db.store_lift_entry(&entry)?;
    }

    let recalculator = recalculator(config);
    for user in &users {
        recalculator.rebuild_user(&mut db, user)?;
    }

    println!(
        "  {} exercises, {} bodyweights, {} users",
        bundle.exercises.len(),
        bundle.bodyweights.len(),
        users.len()
    );
    println!("{}", "✓ Import completed successfully".green());
    Ok(())
}
