//! Operator CLI for the civic lifecycle engine
//!
//! Runs against a RocksDB state directory.
//!
//! # Usage
//!
//! ```bash
//! # One SLA sweep, printing the escalations it raised
//! civic-lifecycle --state-path ./civic-state sweep
//!
//! # Sweep every 15 minutes until interrupted
//! civic-lifecycle --state-path ./civic-state sweep --every-minutes 15
//!
//! # SLA table in force, or one report's deadline
//! civic-lifecycle sla
//! civic-lifecycle sla --report <REPORT_ID>
//!
//! # Audit trail and workload
//! civic-lifecycle timeline <REPORT_ID>
//! civic-lifecycle workload
//!
//! # Custom configuration
//! CIVIC_SLA_URGENT_HOURS=12 civic-lifecycle --config ./engine.toml sweep
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use civic_lifecycle::state::RocksStore;
use civic_lifecycle::{Engine, EngineConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the RocksDB state directory
    #[arg(long, default_value = "./civic-state")]
    state_path: PathBuf,

    /// TOML config file (defaults come from CIVIC_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the urgent-priority SLA budget in hours
    #[arg(long)]
    urgent_hours: Option<u32>,

    /// Override the high-priority SLA budget in hours
    #[arg(long)]
    high_hours: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Escalate open reports past their SLA deadline
    Sweep {
        /// Repeat the sweep at this interval instead of exiting
        #[arg(long)]
        every_minutes: Option<u64>,
    },
    /// Show the SLA table, or the deadline of one report
    Sla {
        #[arg(long)]
        report: Option<String>,
    },
    /// Print a report's audit trail
    Timeline { report_id: String },
    /// Print active assignments per worker
    Workload,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::from_env(),
    };
    if let Some(h) = args.urgent_hours {
        config.sla.urgent_hours = h;
    }
    if let Some(h) = args.high_hours {
        config.sla.high_hours = h;
    }
    config.validate()?;
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("civic_lifecycle=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    tracing::info!(
        "State path: {}, SLA hours (low/medium/high/urgent): {}/{}/{}/{}",
        args.state_path.display(),
        config.sla.low_hours,
        config.sla.medium_hours,
        config.sla.high_hours,
        config.sla.urgent_hours
    );

    let store = RocksStore::open(&args.state_path)
        .with_context(|| format!("opening state at {}", args.state_path.display()))?;
    let engine = Engine::new(store.shared(), config);

    match args.command {
        Command::Sweep { every_minutes } => match every_minutes {
            None => print_json(&engine.sweep_sla_breaches()?)?,
            Some(minutes) => {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(minutes.max(1) * 60));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let sweep = engine.sweep_sla_breaches()?;
                            for escalation in &sweep.escalated {
                                println!("{}", serde_json::to_string(escalation)?);
                            }
                        }
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("Interrupted, stopping sweeps");
                            break;
                        }
                    }
                }
            }
        },
        Command::Sla { report } => match report {
            Some(report_id) => print_json(&engine.sla_status(&report_id)?)?,
            None => print_json(&engine.sla_policy().table())?,
        },
        Command::Timeline { report_id } => print_json(&engine.timeline(&report_id)?)?,
        Command::Workload => print_json(&engine.workload_overview()?)?,
    }

    Ok(())
}
