//! Marine Observation Ingestion Service - CLI
//!
//! Builds hourly JSON Lines files of marine observations from NOAA CO-OPS,
//! NDBC buoys and SMN stations:
//! 1. Backfills a date range, resumable after a crash or kill
//! 2. Collects the most recent publishable hour (cron friendly)
//! 3. Audits a day of output for missing expected fields
//! 4. Bundles a day or month of hour files into a tar.gz
//!
//! Usage:
//!   marinemon backfill --start 2024-05-01 --end 2024-05-03
//!   marinemon realtime --remove-nulls
//!   marinemon verify --date 2024-05-01 [--station 44013]
//!   marinemon archive --month 2024-05
//!
//! Environment:
//!   SMN_API_TOKEN - bearer token for the SMN service (a .env file works)
//!   RUST_LOG      - log filter override
//!
//! Exit codes: 0 success, 1 fatal error, 2 verification found discrepancies.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use clap::{Args, Parser, Subcommand};

use marinemon_service::archive::{self, TarGzArchiver};
use marinemon_service::config::{AppConfig, DEFAULT_CONFIG_PATH};
use marinemon_service::driver::Driver;
use marinemon_service::error::{ConfigError, Result};
use marinemon_service::http::HttpClient;
use marinemon_service::logging;
use marinemon_service::output::OutputStore;
use marinemon_service::stations::StationRegistry;
use marinemon_service::verify;

#[derive(Parser)]
#[command(name = "marinemon")]
#[command(about = "Hourly marine observation ingestion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH, help = "Configuration file")]
    config: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every hour of a date range (UTC, both ends inclusive)
    Backfill {
        #[arg(long, help = "First day, YYYY-MM-DD")]
        start: NaiveDate,

        #[arg(long, help = "Last day, YYYY-MM-DD")]
        end: NaiveDate,

        #[arg(long, help = "Omit null-valued fields from records")]
        remove_nulls: bool,
    },

    /// Ingest the most recent hour every source has published
    Realtime {
        #[arg(long, help = "Omit null-valued fields from records")]
        remove_nulls: bool,
    },

    /// Check a day of hour files against each station's expected fields
    Verify {
        #[arg(long, help = "Day to verify, YYYY-MM-DD")]
        date: NaiveDate,

        #[arg(long, help = "Only this station")]
        station: Option<String>,
    },

    /// Bundle a day or a month of hour files and remove the originals
    Archive(ArchiveArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ArchiveArgs {
    #[arg(long, help = "Day to bundle, YYYY-MM-DD")]
    day: Option<NaiveDate>,

    #[arg(long, value_parser = parse_month, help = "Month to bundle, YYYY-MM")]
    month: Option<(i32, u32)>,
}

fn parse_month(s: &str) -> std::result::Result<(i32, u32), String> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .map_err(|_| format!("expected YYYY-MM, got '{}'", s))?;
    Ok((date.year(), date.month()))
}

fn build_driver(config: AppConfig) -> Result<Driver> {
    let registry = StationRegistry::load(&config.stations_file)?;
    tracing::info!(stations = registry.len(), file = %config.stations_file.display(), "loaded station registry");
    let client = HttpClient::new(&config.http)
        .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {}", e)))?;
    Ok(Driver::from_config(config, registry, Arc::new(client)))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Backfill {
            start,
            end,
            remove_nulls,
        } => {
            config.remove_nulls |= remove_nulls;
            build_driver(config)?.run_backfill(start, end)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Realtime { remove_nulls } => {
            config.remove_nulls |= remove_nulls;
            build_driver(config)?.run_realtime()?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Verify { date, station } => {
            let registry = StationRegistry::load(&config.stations_file)?;
            let stations = match &station {
                Some(id) => {
                    let found = registry
                        .find(id)
                        .ok_or_else(|| ConfigError::Invalid(format!("station '{}' is not in the registry", id)))?;
                    vec![found.clone()]
                }
                None => registry.stations().to_vec(),
            };
            let output = OutputStore::new(config.output_dir.clone(), config.product.clone());
            let day = verify::verify_day(&output, &stations, date)?;
            day.log();
            Ok(if day.discrepancies() > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Archive(ArchiveArgs { day, month }) => {
            let output = OutputStore::new(config.output_dir.clone(), config.product.clone());
            let bundle = match (day, month) {
                (Some(day), _) => archive::archive_day(&TarGzArchiver, &output, day)?,
                (None, Some((year, month))) => archive::archive_month(&TarGzArchiver, &output, year, month)?,
                (None, None) => unreachable!("clap requires --day or --month"),
            };
            println!("{}", bundle.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(1)
        }
    }
}
