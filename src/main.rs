//! Binary entry point for searchkeep.
//!
//! Operator CLI over the storage layer: save, inspect, evict, repair, and
//! migrate stored search results.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use searchkeep::config::{BackendKind, StorageSettings};
use searchkeep::models::{Identifier, RecordSummary};
use searchkeep::observability::{self, LogFormat, LoggingConfig};
use searchkeep::storage::{MigrationOptions, ResultStorage, StorageBackend, migrate, resolve};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

/// Searchkeep - persistent storage for web search results.
#[derive(Parser)]
#[command(name = "searchkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SEARCHKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Log format: pretty or json.
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Override the configured backend: file, kv, or memory.
    #[arg(short, long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Save a search result.
    Save {
        /// The query text.
        query: String,

        /// JSON payload file, or `-` for stdin.
        #[arg(short, long, default_value = "-")]
        payload: String,
    },

    /// Print a stored record as JSON.
    Get {
        /// Record identifier.
        id: String,
    },

    /// List stored records, most recent first.
    List {
        /// Maximum number of records (default: configured page size).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Number of records to skip.
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Only records saved for exactly this query.
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Delete a record.
    Delete {
        /// Record identifier.
        id: String,
    },

    /// Remove records older than the retention window.
    Cleanup {
        /// Retention in days (default: configured `retention_days`).
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Repair state left behind by interrupted writes.
    Reconcile,

    /// Copy every record from one backend into another.
    Migrate {
        /// Source backend: file, kv, or memory.
        #[arg(long)]
        from: String,

        /// Destination backend: file, kv, or memory.
        #[arg(long)]
        to: String,

        /// Records per page.
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Report what would be copied without writing.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let format = match cli.log_format.as_deref().map(str::parse::<LogFormat>).transpose() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("Invalid log format: {e}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = observability::init(LoggingConfig::from_env(cli.verbose, format)) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads settings from file and environment, then applies CLI overrides.
fn load_settings(cli: &Cli) -> anyhow::Result<StorageSettings> {
    let mut settings = StorageSettings::load(cli.config.as_deref())?;
    if let Some(backend) = &cli.backend {
        settings.backend = backend.parse()?;
    }
    Ok(settings)
}

/// Resolves a backend, telling the operator when results will not persist.
fn open(settings: &StorageSettings) -> anyhow::Result<(StorageBackend, bool)> {
    let resolved = resolve(settings)
        .with_context(|| format!("failed to open {} backend", settings.backend))?;
    if resolved.degraded {
        eprintln!("warning: redis unavailable, using in-memory storage; nothing will be kept");
    }
    Ok((resolved.backend, resolved.degraded))
}

/// Runs the selected command.
fn run_command(command: Commands, settings: &StorageSettings) -> anyhow::Result<()> {
    match command {
        Commands::Save { query, payload } => {
            let (storage, _) = open(settings)?;
            let payload = read_payload(&payload)?;
            let id = storage.save(&query, &payload)?;
            println!("{id}");
        },
        Commands::Get { id } => {
            let (storage, _) = open(settings)?;
            let id = Identifier::parse(&id)?;
            let Some(record) = storage.get(&id)? else {
                bail!("no record with identifier {id}");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        },
        Commands::List {
            limit,
            offset,
            query,
        } => {
            let (storage, _) = open(settings)?;
            let summaries = match query {
                Some(query) => storage.list_by_query(&query)?,
                None => storage.list(limit.unwrap_or(settings.page_size), offset)?,
            };
            print_summaries(&summaries);
        },
        Commands::Delete { id } => {
            let (storage, _) = open(settings)?;
            let id = Identifier::parse(&id)?;
            if storage.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No record with identifier {id}");
            }
        },
        Commands::Cleanup { days } => {
            let (storage, _) = open(settings)?;
            let max_age = days.map_or_else(
                || settings.retention(),
                |d| chrono::Duration::days(i64::from(d)),
            );
            let removed = storage.cleanup(max_age)?;
            println!("Removed {removed} record(s) older than {} day(s)", max_age.num_days());
        },
        Commands::Reconcile => {
            let (storage, _) = open(settings)?;
            let repaired = storage.reconcile()?;
            println!("Repaired {repaired} inconsistenc(ies)");
        },
        Commands::Migrate {
            from,
            to,
            batch_size,
            dry_run,
        } => cmd_migrate(settings, &from, &to, batch_size, dry_run)?,
    }

    Ok(())
}

/// Migrate command.
fn cmd_migrate(
    settings: &StorageSettings,
    from: &str,
    to: &str,
    batch_size: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let from: BackendKind = from.parse()?;
    let to: BackendKind = to.parse()?;
    if from == to {
        bail!("source and destination are both {from}");
    }

    let (source, source_degraded) = open(&settings.clone().with_backend(from))?;
    let (destination, destination_degraded) = open(&settings.clone().with_backend(to))?;
    if source_degraded || destination_degraded {
        bail!("refusing to migrate while redis is unavailable");
    }

    let options = MigrationOptions::new()
        .with_batch_size(batch_size)
        .with_dry_run(dry_run);
    let report = migrate(&source, &destination, &options)?;

    let verb = if dry_run { "Would migrate" } else { "Migrated" };
    println!(
        "{verb} {} record(s), skipped {}, failed {}",
        report.migrated,
        report.skipped,
        report.failed.len()
    );
    for failure in &report.failed {
        eprintln!("  {}: {}", failure.identifier, failure.error);
    }

    if report.is_clean() {
        Ok(())
    } else {
        bail!("{} record(s) failed to migrate", report.failed.len())
    }
}

/// Reads a JSON payload from a file or stdin.
fn read_payload(source: &str) -> anyhow::Result<Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };

    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn print_summaries(summaries: &[RecordSummary]) {
    if summaries.is_empty() {
        println!("No stored results");
        return;
    }
    for summary in summaries {
        println!(
            "{}\t{}\t{}",
            summary.identifier,
            summary.created_at.to_rfc3339(),
            summary.query
        );
    }
}
