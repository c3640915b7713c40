//! chaika-sync: Unsynced trip acknowledgment tool
//!
//! Lists trips whose reports have not yet been picked up downstream and
//! acknowledges them once they have.
//!
//! ## Usage
//! ```text
//! chaika-sync list
//! chaika-sync ack <route_id> <start_time_rfc3339>
//! ```
//!
//! Usage errors exit with status 2, an unknown trip with status 1.
//!
//! ## Configuration
//! - CHAIKA_CONFIG: Path to a YAML config file (optional)
//! - CHAIKA__STORAGE__TYPE: `memory` or `sqlite`
//! - CHAIKA__STORAGE__SQLITE__PATH: SQLite database file
//! - CHAIKA_LOG: Log filter (default: info)
//!
//! Ctrl-C cancels the running command.

use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use chaika_reports::config::Config;
use chaika_reports::storage::init_storage;
use chaika_reports::utils::bootstrap::{init_tracing, shutdown_token};
use chaika_reports::{RepositoryError, SalesRepository, TripId};

#[derive(Debug, Parser)]
#[command(name = "chaika-sync")]
#[command(about = "List and acknowledge unsynced trips")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every unsynced trip as one JSON object per line
    List,

    /// Remove a trip from the unsynced set
    Ack {
        /// Route identifier
        route_id: String,

        /// Trip start time, RFC 3339
        #[arg(value_parser = parse_start_time)]
        start_time: DateTime<Utc>,
    },
}

fn parse_start_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(None)?;
    let session = init_storage(&config.storage).await?;
    let repo = SalesRepository::new(session);
    let cancel = shutdown_token();

    match cli.command {
        Command::List => {
            let trips = repo.get_unsynced_trips(&cancel).await?;
            for trip in &trips {
                println!("{}", serde_json::to_string(trip)?);
            }
            info!(count = trips.len(), "Listed unsynced trips");
        }
        Command::Ack {
            route_id,
            start_time,
        } => {
            let trip_id = TripId::new(route_id.as_str(), start_time);
            match repo.delete_synced_trip(&trip_id, &cancel).await {
                Ok(()) => {
                    info!(route_id = %trip_id.route_id, start_time = %trip_id.start_time, "Trip acknowledged");
                }
                Err(RepositoryError::TripNotFound) => {
                    error!(route_id = %trip_id.route_id, start_time = %trip_id.start_time, "No such unsynced trip");
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
