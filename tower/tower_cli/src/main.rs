use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tower_control::{
    sort_flights, ClearanceOutcome, OperationType, ReportWindow, SortKey, Tower, TowerConfig,
    TowerTelemetry,
};

#[derive(Parser, Debug)]
#[command(name = "tower", version, about = "Control tower queueing and clearance workstation")]
struct Cli {
    /// Tower configuration file. Built-in defaults apply when it is absent.
    #[arg(long, global = true, default_value = "tower.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Checks the reference data files and starts with empty queues.
    Import,
    /// Lists imported flight plans.
    List {
        /// Sort column: flight, etd, kind or priority.
        #[arg(long, default_value = "flight")]
        by: SortKey,
    },
    /// Appends a flight to the takeoff or landing queue.
    Enqueue {
        /// `takeoff` (`decolagem`) or `landing` (`pouso`).
        operation: OperationType,
        #[arg(long)]
        flight: String,
    },
    /// Decides on the head of a queue for a runway.
    Authorize {
        /// `takeoff` (`decolagem`) or `landing` (`pouso`).
        operation: OperationType,
        #[arg(long)]
        runway: String,
    },
    /// Shows runways, queue heads, notices and weather.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Writes a shift report over the audit trail.
    Report {
        /// Earliest event included (RFC3339).
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Latest event included (RFC3339).
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Commands::Import => handle_import(&config),
        Commands::List { by } => {
            let tower = open_tower(&config)?;
            let mut flights = tower.directory().flights();
            sort_flights(&mut flights, by);
            for flight in flights {
                println!(
                    "{} | {} -> {} | ETD {} | ETA {} | {} | {} | prio {} | rwy {}",
                    flight.code,
                    flight.origin,
                    flight.destination,
                    flight.etd,
                    flight.eta,
                    flight.aircraft,
                    flight.kind,
                    flight.priority,
                    flight.preferred_runway
                );
            }
            Ok(())
        }
        Commands::Enqueue { operation, flight } => {
            let tower = open_tower(&config)?;
            let queued = tower
                .enqueue(operation, &flight)
                .with_context(|| format!("queueing {flight} for {operation}"))?;
            println!(
                "{} queued for {operation} (seq {}, {} waiting){}",
                queued.entry.flight_code,
                queued.seq,
                tower.queue_len(operation),
                if queued.entry.emergency { " EMERGENCY" } else { "" }
            );
            Ok(())
        }
        Commands::Authorize { operation, runway } => {
            let tower = open_tower(&config)?;
            let outcome = tower
                .evaluate(operation, &runway)
                .with_context(|| format!("evaluating {operation} on runway {runway}"))?;
            println!("{outcome}");
            if let ClearanceOutcome::Cleared { .. } = outcome {
                println!("{} remaining in {operation} queue", tower.queue_len(operation));
            }
            Ok(())
        }
        Commands::Status { json } => {
            let tower = open_tower(&config)?;
            let status = tower.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            println!("Runways:");
            for (runway, state) in &status.runways {
                println!("  {runway}: {state}");
            }
            for (operation, queue) in [
                (OperationType::Takeoff, &status.takeoff),
                (OperationType::Landing, &status.landing),
            ] {
                println!("{operation} queue ({} waiting):", queue.len);
                for queued in &queue.next {
                    println!("  #{} {}", queued.seq, queued.entry.to_line());
                }
            }
            println!("Notices:");
            for notice in &status.restrictions {
                println!("  {}", notice.text);
            }
            println!("Weather:");
            for observation in &status.weather {
                println!("  {}", observation.text);
            }
            Ok(())
        }
        Commands::Report { from, to, json } => {
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    bail!("--from {from} is after --to {to}");
                }
            }
            let tower = open_tower(&config)?;
            let (report, path) = tower.write_shift_report(ReportWindow { from, to })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            eprintln!("report written to {}", path.display());
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<TowerConfig> {
    if path.exists() {
        TowerConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(TowerConfig::default())
    }
}

fn open_tower(config: &TowerConfig) -> Result<Tower> {
    let telemetry = TowerTelemetry::from_config(config).context("opening ops and event logs")?;
    Tower::builder()
        .config(config.clone())
        .telemetry(telemetry)
        .build()
        .context("opening tower state")
}

fn handle_import(config: &TowerConfig) -> Result<()> {
    if let Some(missing) = config.required_files().into_iter().find(|path| !path.exists()) {
        bail!("required file {} not found", missing.display());
    }
    let tower = open_tower(config)?;
    tower.reset_queues()?;
    println!(
        "imported {} flight plans; takeoff and landing queues are empty",
        tower.directory().flights().len()
    );
    Ok(())
}
