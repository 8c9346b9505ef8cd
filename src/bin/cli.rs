//! tracededup CLI - Run duplicate resolution against a SQLite capture store
//!
//! Usage:
//!   tracededup-cli run --db <path> [--routes a,b] [--threshold 6] [--dry-run]
//!   tracededup-cli status --db <path> [--routes a,b]
//!   tracededup-cli import --db <path> <records.json>

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracededup::{
    store::sqlite::RouteFlagCount, DedupConfig, DedupEngine, Record, RouteScope, RunMode,
    RunSummary, SqliteStore,
};

#[derive(Parser)]
#[command(name = "tracededup-cli")]
#[command(about = "Flag superseded captures along linear routes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset flags, resolve duplicates and persist the result
    Run {
        /// SQLite database holding the captures table
        #[arg(long)]
        db: PathBuf,

        /// JSON config file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only process these routes (comma separated)
        #[arg(long, value_delimiter = ',')]
        routes: Option<Vec<String>>,

        /// Maximum linear-position gap for two captures to be compared
        #[arg(long)]
        threshold: Option<f64>,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Identifiers per persist batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Run everything, then roll back
        #[arg(long)]
        dry_run: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show obsolete counts per route
    Status {
        #[arg(long)]
        db: PathBuf,

        #[arg(long, value_delimiter = ',')]
        routes: Option<Vec<String>>,
    },

    /// Load records from a JSON array into the database
    Import {
        #[arg(long)]
        db: PathBuf,

        /// JSON file containing an array of records
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let result = match cli.command {
        Commands::Run {
            db,
            config,
            routes,
            threshold,
            workers,
            batch_size,
            dry_run,
            json,
        } => load_config(config, routes, threshold, workers, batch_size).and_then(|config| {
            let mode = if dry_run {
                RunMode::DryRun
            } else {
                RunMode::Commit
            };
            run(&db, config, mode, json)
        }),
        Commands::Status { db, routes } => status(&db, routes),
        Commands::Import { db, file } => import(&db, &file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    routes: Option<Vec<String>>,
    threshold: Option<f64>,
    workers: Option<usize>,
    batch_size: Option<usize>,
) -> Result<DedupConfig, String> {
    let mut config = match path {
        Some(path) => DedupConfig::from_json_file(&path).map_err(|e| e.to_string())?,
        None => DedupConfig::default(),
    };
    if routes.is_some() {
        config.routes = routes;
    }
    if let Some(threshold) = threshold {
        config.distance_threshold = threshold;
    }
    if workers.is_some() {
        config.workers = workers;
    }
    if let Some(batch_size) = batch_size {
        config.batch_size = batch_size;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn open_store(db: &Path) -> Result<SqliteStore, String> {
    let path = db
        .to_str()
        .ok_or_else(|| format!("database path is not valid UTF-8: {}", db.display()))?;
    SqliteStore::open(path).map_err(|e| e.to_string())
}

fn run(db: &Path, config: DedupConfig, mode: RunMode, json: bool) -> Result<ExitCode, String> {
    let store = open_store(db)?;
    let mut engine = DedupEngine::new(store, config);
    let summary = engine.execute(mode).map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        print_summary(&summary);
    }

    if summary.routes_failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "=".repeat(60));
    println!("RUN SUMMARY ({:?})", summary.mode);
    println!("{}", "=".repeat(60));
    println!("  Status:            {:?}", summary.status);
    println!("  Flags reset:       {}", summary.records_reset);
    println!("  Records loaded:    {}", summary.records_loaded);
    println!("  Routes processed:  {}", summary.routes_processed);
    println!("  Routes skipped:    {}", summary.routes_skipped.len());
    println!("  Routes failed:     {}", summary.routes_failed.len());
    println!("  Duplicate ids:     {}", summary.duplicate_ids);
    println!(
        "  Pairs evaluated:   {} ({} skipped)",
        summary.pairs_evaluated, summary.pairs_skipped
    );
    println!("  Records flagged:   {}", summary.records_flagged);
    println!(
        "  Rows updated:      {} in {} batch(es)",
        summary.rows_updated, summary.batches
    );
    println!("  Elapsed:           {}ms", summary.elapsed_ms);

    if !summary.decisions.is_empty() {
        println!("\n  Decisions:");
        for (reason, count) in &summary.decisions {
            println!("    {:<20} {}", reason.as_str(), count);
        }
    }

    let notable: Vec<_> = summary
        .routes_skipped
        .iter()
        .filter(|s| !matches!(s.reason, tracededup::SkipReason::TooFewRecords { .. }))
        .collect();
    if !notable.is_empty() {
        println!("\n  Skipped routes:");
        for skipped in notable {
            println!("    {} - {}", skipped.route_id, skipped.reason);
        }
    }

    for failed in &summary.routes_failed {
        println!("  [FAILED] {} - {}", failed.route_id, failed.message);
    }
}

fn status(db: &Path, routes: Option<Vec<String>>) -> Result<ExitCode, String> {
    let store = open_store(db)?;
    let scope = match routes {
        Some(routes) => RouteScope::routes(routes),
        None => RouteScope::All,
    };
    let counts: Vec<RouteFlagCount> = store.flag_counts(&scope).map_err(|e| e.to_string())?;

    println!("{:<24} {:>10} {:>10}", "route", "records", "obsolete");
    for count in &counts {
        println!(
            "{:<24} {:>10} {:>10}",
            count.route_id, count.total, count.obsolete
        );
    }
    let total: usize = counts.iter().map(|c| c.total).sum();
    let obsolete: usize = counts.iter().map(|c| c.obsolete).sum();
    println!("{:<24} {:>10} {:>10}", "TOTAL", total, obsolete);
    Ok(ExitCode::SUCCESS)
}

fn import(db: &Path, file: &Path) -> Result<ExitCode, String> {
    let content = fs::read_to_string(file).map_err(|e| format!("{}: {}", file.display(), e))?;
    let records: Vec<Record> =
        serde_json::from_str(&content).map_err(|e| format!("{}: {}", file.display(), e))?;
    let mut store = open_store(db)?;
    let inserted = store.insert_records(&records).map_err(|e| e.to_string())?;
    println!("Imported {} records into {}", inserted, db.display());
    Ok(ExitCode::SUCCESS)
}
