//! CLI entry point for the parking availability monitor.
//!
//! Provides subcommands for running one poll cycle, refreshing carpark
//! metadata, recomputing hourly aggregates, and exporting snapshots to CSV.
//! Scheduling is external: cron (or similar) invokes `poll` at whatever
//! cadence is wanted, and the lock file keeps overlapping invocations out.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use parkmon_service::aggregate;
use parkmon_service::config::{self, Config};
use parkmon_service::db;
use parkmon_service::export;
use parkmon_service::ingest::wilson;
use parkmon_service::logging::{self, DataSource, LogLevel};
use parkmon_service::model::PollError;
use parkmon_service::poll::{self, CycleLock};

#[derive(Parser)]
#[command(name = "parkmon")]
#[command(about = "Polls parking bay availability and derives utilization stats", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Optional log file (appended to; console output always on)
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one poll cycle: fetch, normalize, store
    Poll {
        /// Also recompute today's hourly aggregates after storing
        #[arg(long, default_value_t = false)]
        aggregate: bool,

        /// Lock file guarding against overlapping cycles
        #[arg(long, default_value = poll::DEFAULT_LOCK_PATH)]
        lock: String,
    },
    /// Fetch carpark metadata and upsert it (run once before polling,
    /// then whenever the operator's carpark list changes)
    RefreshMetadata,
    /// Recompute hourly aggregates for a date (defaults to today, local time)
    Aggregate {
        /// Date to recompute, YYYY-MM-DD in the provider's local time
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Export stored snapshots to CSV
    Export {
        /// Range start, inclusive (RFC 3339, e.g. 2026-08-01T00:00:00Z)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Range end, exclusive
        #[arg(long)]
        to: DateTime<Utc>,

        /// Output CSV path
        #[arg(short, long, default_value = "snapshots.csv")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    logging::init_logger(LogLevel::Info, cli.log_file.as_deref(), true);

    if let Err(e) = run(&cli) {
        logging::error(DataSource::System, None, &e.to_string());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), PollError> {
    // Configuration problems are fatal at startup, never mid-cycle.
    let config = Config::load_from_path(&cli.config)?;

    let mut db_client = db::connect(&config::database_url()?)?;
    db::ensure_schema(&mut db_client)?;

    match &cli.command {
        Commands::Poll { aggregate, lock } => {
            let _lock = CycleLock::acquire(lock)?;
            let http = wilson::build_client(config.api.timeout_secs)?;
            let report = poll::run_cycle(&mut db_client, &http, &config, Utc::now(), *aggregate)?;
            logging::info(
                DataSource::System,
                None,
                &format!(
                    "cycle {} at {}: {} stored, {} skipped",
                    report.state,
                    report.scraped_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    report.stored,
                    report.skipped
                ),
            );
        }
        Commands::RefreshMetadata => {
            let http = wilson::build_client(config.api.timeout_secs)?;
            poll::run_metadata_refresh(&mut db_client, &http, &config)?;
        }
        Commands::Aggregate { date } => {
            let date = match date {
                Some(d) => *d,
                None => aggregate::local_date(Utc::now(), config.aggregation.utc_offset_hours)?,
            };
            let written = aggregate::compute_and_store_all(
                &mut db_client,
                date,
                config.aggregation.utc_offset_hours,
            )?;
            logging::info(
                DataSource::Database,
                None,
                &format!("wrote {} aggregate rows for {}", written, date),
            );
        }
        Commands::Export { from, to, output } => {
            if to <= from {
                return Err(PollError::InvalidConfiguration(format!(
                    "export range is empty: {} is not after {}",
                    to, from
                )));
            }
            export::export_csv(&mut db_client, *from, *to, output)?;
        }
    }

    Ok(())
}
