//! CLI for ecoplan.
//!
//! Computes budget- and effort-constrained recommendations from an action
//! catalog, records accept/decline feedback into the persisted preference
//! scores and keeps simple feedback statistics next to them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ecoplan_core::{Bounds, Catalog, Feedback, RecommendationPlan};
use ecoplan_optimizer::{Objective, Optimizer, SolverConfig};
use ecoplan_preference::{
    FeedbackReport, JsonFileStore, PreferenceConfig, PreferenceSession, RewardPolicy, StateStore,
    DEFAULT_LEARNING_RATE,
};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const DATA_DIR_ENV: &str = "ECOPLAN_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "data";
const STATE_FILE_NAME: &str = "ecoplan.preferences.json";
const STATS_FILE_NAME: &str = "ecoplan.stats.json";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend actions for a budget and an effort ceiling
    Recommend {
        /// Monetary budget
        #[arg(long, allow_negative_numbers = true)]
        budget: f64,

        /// Maximum effort units
        #[arg(long, allow_negative_numbers = true)]
        max_effort: f64,

        /// Catalog file (`{id: {name, benefit, cost, effort}}`); built-in catalog if omitted
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Weight benefits by the learned preference scores
        #[arg(long)]
        personalize: bool,

        /// Path to the preference state file
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Solve time limit in milliseconds
        #[arg(long, default_value = "2000")]
        time_limit_ms: u64,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record which recommended actions were accepted or declined
    Feedback {
        /// Accepted action ids
        #[arg(long, num_args = 1..)]
        accept: Vec<String>,

        /// Declined action ids
        #[arg(long, num_args = 1..)]
        decline: Vec<String>,

        /// Catalog file used to flag unknown ids
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Learning rate of the moving average
        #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
        learning_rate: f64,

        /// Path to the preference state file
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Path to the stats file
        #[arg(long)]
        stats_file: Option<PathBuf>,
    },
    /// Show the persisted preference scores
    Scores {
        /// Path to the preference state file
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Show the action catalog
    Catalog {
        /// Catalog file; built-in catalog if omitted
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct FeedbackStats {
    total_feedback: u64,
    accepted: BTreeMap<String, u64>,
    declined: BTreeMap<String, u64>,
    #[serde(with = "time::serde::iso8601")]
    last_updated: OffsetDateTime,
}

impl Default for FeedbackStats {
    fn default() -> Self {
        Self {
            total_feedback: 0,
            accepted: BTreeMap::new(),
            declined: BTreeMap::new(),
            last_updated: OffsetDateTime::now_utc(),
        }
    }
}

impl FeedbackStats {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path)?;
        let stats = serde_json::from_reader(file)?;
        Ok(stats)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    fn update(&mut self, feedback: &Feedback) {
        self.total_feedback += 1;
        let bucket = if feedback.is_accepted() {
            &mut self.accepted
        } else {
            &mut self.declined
        };
        *bucket.entry(feedback.action_id.clone()).or_insert(0) += 1;
        self.last_updated = OffsetDateTime::now_utc();
    }
}

#[derive(Serialize, Debug)]
struct RecommendResponse<'a> {
    request: Bounds,
    response: BTreeMap<String, u32>,
    total_benefit: f64,
    total_cost: f64,
    total_effort: u64,
    objective: &'a str,
}

fn data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn resolve(path: Option<PathBuf>, file_name: &str) -> PathBuf {
    path.unwrap_or_else(|| data_dir().join(file_name))
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        None => Ok(Catalog::builtin()),
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open catalog {}", path.display()))?;
            Catalog::from_json_reader(file)
                .with_context(|| format!("Invalid catalog {}", path.display()))
        }
    }
}

/// Builds the ordered feedback batch: accepted ids first, then declined ones.
fn feedback_batch(accept: &[String], decline: &[String]) -> Result<Vec<Feedback>> {
    let accepted: HashSet<&str> = accept.iter().map(String::as_str).collect();
    if let Some(conflict) = decline.iter().find(|id| accepted.contains(id.as_str())) {
        bail!("Action '{}' is both accepted and declined", conflict);
    }
    if accept.is_empty() && decline.is_empty() {
        bail!("No feedback given: use --accept and/or --decline");
    }

    Ok(accept
        .iter()
        .map(Feedback::accepted)
        .chain(decline.iter().map(Feedback::declined))
        .collect())
}

fn recommend(
    catalog: &Catalog,
    bounds: &Bounds,
    personalize: bool,
    state_file: &Path,
    time_limit: Duration,
) -> Result<RecommendationPlan> {
    let config = SolverConfig {
        time_limit,
        objective: if personalize {
            Objective::Personalized
        } else {
            Objective::Benefit
        },
        ..SolverConfig::default()
    };
    let optimizer = Optimizer::new(config);

    if personalize {
        let store = JsonFileStore::new(state_file);
        let session = PreferenceSession::open(store, PreferenceConfig::default())
            .with_context(|| {
                format!("Failed to load preference state {}", state_file.display())
            })?;
        let model = session.model();
        Ok(optimizer.optimize_with(catalog, bounds, &model)?)
    } else {
        Ok(optimizer.optimize(catalog, bounds)?)
    }
}

fn print_plan(catalog: &Catalog, bounds: &Bounds, plan: &RecommendationPlan) {
    println!(
        "Recommended actions (budget {}, max effort {}):",
        bounds.budget, bounds.max_effort
    );
    if plan.is_empty() {
        println!("  (nothing fits within these bounds)");
    }
    for (id, count) in plan.recommended() {
        let name = catalog.get(id).map_or(id, |a| a.name.as_str());
        println!("  {} [{}] x{}", name, id, count);
    }
    println!(
        "Total: benefit {:.1}, cost {:.2}, effort {}",
        plan.total_benefit, plan.total_cost, plan.total_effort
    );
}

fn record_feedback(
    batch: &[Feedback],
    learning_rate: f64,
    state_file: &Path,
    stats_file: &Path,
) -> Result<FeedbackReport> {
    let config = PreferenceConfig {
        learning_rate,
        rewards: RewardPolicy::default(),
    };
    let session = PreferenceSession::open(JsonFileStore::new(state_file), config)
        .with_context(|| {
            format!("Failed to load preference state {}", state_file.display())
        })?;

    let report = match session.record_feedback(batch) {
        Ok(report) => report,
        Err(first) if first.is_retryable() => {
            tracing::warn!(error = %first, "retrying preference persist once");
            session
                .retry_persist()
                .with_context(|| {
                    format!("Failed to save preference state {}", state_file.display())
                })?
                .unwrap_or(FeedbackReport {
                    changes: Vec::new(),
                })
        }
        Err(e) => return Err(e).context("Failed to save preference state"),
    };

    update_stats(stats_file, batch)?;
    Ok(report)
}

fn sidecar_lock(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(OsString::new, OsString::from);
    name.push(".lock");
    path.with_file_name(name)
}

/// Adds `batch` to the stats file while holding its sidecar lock.
fn update_stats(stats_file: &Path, batch: &[Feedback]) -> Result<()> {
    let lock_path = sidecar_lock(stats_file);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open stats lock {}", lock_path.display()))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write().context("Failed to lock stats")?;

    let mut stats = FeedbackStats::load(stats_file).unwrap_or_else(|e| {
        eprintln!(
            "Warning: failed to read stats from {:?}; starting fresh: {}",
            stats_file, e
        );
        FeedbackStats::default()
    });
    for feedback in batch {
        stats.update(feedback);
    }
    stats.save(stats_file).context("Failed to save stats")?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Recommend {
            budget,
            max_effort,
            catalog,
            personalize,
            state_file,
            time_limit_ms,
            json,
        } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let bounds = Bounds::new(budget, max_effort).context("Invalid request")?;
            let state_file = resolve(state_file, STATE_FILE_NAME);
            let plan = recommend(
                &catalog,
                &bounds,
                personalize,
                &state_file,
                Duration::from_millis(time_limit_ms),
            )?;

            if json {
                let response = RecommendResponse {
                    request: bounds,
                    response: plan.to_response(),
                    total_benefit: plan.total_benefit,
                    total_cost: plan.total_cost,
                    total_effort: plan.total_effort,
                    objective: if personalize { "personalized" } else { "benefit" },
                };
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_plan(&catalog, &bounds, &plan);
            }
        }
        Commands::Feedback {
            accept,
            decline,
            catalog,
            learning_rate,
            state_file,
            stats_file,
        } => {
            let batch = feedback_batch(&accept, &decline)?;
            let catalog = load_catalog(catalog.as_deref())?;
            for feedback in batch.iter().filter(|f| !catalog.contains(&f.action_id)) {
                tracing::warn!(
                    action_id = %feedback.action_id,
                    "feedback for action not in catalog"
                );
            }

            let state_file = resolve(state_file, STATE_FILE_NAME);
            let stats_file = resolve(stats_file, STATS_FILE_NAME);
            let report = record_feedback(&batch, learning_rate, &state_file, &stats_file)?;

            for change in &report.changes {
                println!(
                    "{}: {:+.4} -> {:+.4} (reward {:+})",
                    change.action_id, change.before, change.after, change.reward
                );
            }
            println!("State saved to {}", state_file.display());
        }
        Commands::Scores { state_file } => {
            let state_file = resolve(state_file, STATE_FILE_NAME);
            let scores = JsonFileStore::new(&state_file).load().with_context(|| {
                format!("Failed to load preference state {}", state_file.display())
            })?;
            if scores.is_empty() {
                println!("No preference state yet (cold start).");
            }
            for (id, score) in &scores {
                println!("{}\t{:+.4}", id, score);
            }
        }
        Commands::Catalog { catalog } => {
            let catalog = load_catalog(catalog.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&catalog.to_specs())?);
        }
    }

    Ok(())
}
