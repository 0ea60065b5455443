use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::path::{Path, PathBuf};
use tally_cli::config::ProfileConfig;
use tally_cli::output::JobReport;
use tally_cli::workload;
use tally_core::stats::{
    aggregate_by_name, aggregate_per_client, decode_trackers, encode_trackers, Tracker,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tally: interval statistics for load-generation jobs
///
/// Jobs are described by TOML profiles. Every worker thread keeps one tracker
/// of each kind; at the end trackers are merged per client and per job.
///
/// Example usage:
///   tally run -P profiles/example.toml
///   tally run -P profiles/example.toml --set job.duration=2m --set job.seed=7
///   tally run -P profiles/example.toml --set realtime.address=10.0.0.5:3003
///   tally inspect results/stats.bin --aggregate
#[derive(Parser)]
#[command(name = "tally")]
#[command(version, about = "Interval statistics for load-generation jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic load job
    Run {
        /// Path to TOML profile
        #[arg(short = 'P', long, required = true)]
        profile: PathBuf,

        /// Override a profile value using dot notation (repeatable)
        ///
        /// Examples:
        ///   --set job.threads_per_client=8
        ///   --set job.collection_interval=10s
        ///   --set workload.error_ratio=0.05
        ///   --set output.stats_file=/tmp/stats.bin
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Print the trackers stored in a stats file
    Inspect {
        file: PathBuf,

        /// Merge trackers per display name before printing
        #[arg(long)]
        aggregate: bool,
    },

    /// Print the JSON schema of job profiles
    Schema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run { profile, set } => run_job(&profile, &set),
        Commands::Inspect { file, aggregate } => inspect(&file, aggregate),
        Commands::Schema => {
            let schema = schema_for!(ProfileConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn run_job(profile_path: &Path, set: &[String]) -> Result<()> {
    tracing::info!("Loading profile: {}", profile_path.display());
    let profile = ProfileConfig::load(profile_path, set)?;

    tracing::info!("=== Job Configuration ===");
    tracing::info!("Name: {}", profile.job.name);
    if let Some(desc) = &profile.job.description {
        tracing::info!("Description: {}", desc);
    }
    if let Some(seed) = profile.job.seed {
        tracing::info!("Seed: {} (reproducible mode)", seed);
    }
    tracing::info!("Duration: {:?}", profile.job.duration);
    tracing::info!(
        "Clients: {} x {} threads, {}s intervals{}",
        profile.job.clients,
        profile.job.threads_per_client,
        profile.collection_interval_secs(),
        if profile.job.simulated_time { " (simulated time)" } else { "" }
    );

    let run = workload::run_job(&profile)?;

    if let Some(path) = &profile.output.stats_file {
        let bytes = encode_trackers(&run.trackers)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write stats file {}", path.display()))?;
        tracing::info!("{} trackers written to {}", run.trackers.len(), path.display());
    }

    let per_client = aggregate_per_client(&run.trackers)?;
    let per_job = aggregate_by_name(&per_client)?;

    let report = JobReport::new(
        &run.identity.job_id,
        &profile.job.name,
        &run.identity.client_ids,
        profile.total_threads(),
        profile.collection_interval_secs(),
        run.started_at,
        run.elapsed,
        &per_job,
        if profile.output.per_client { &per_client[..] } else { &[] },
    );
    report.print_human();

    if let Some(path) = &profile.output.file {
        report.write_json(path)?;
    }

    Ok(())
}

fn inspect(path: &Path, aggregate: bool) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let trackers = decode_trackers(&bytes)
        .with_context(|| format!("{} is not a tally stats file", path.display()))?;

    let trackers = if aggregate { aggregate_by_name(&trackers)? } else { trackers };
    for tracker in &trackers {
        println!(
            "[{} / {}] {} ({} intervals of {}s)",
            tracker.client_id(),
            tracker.thread_id(),
            tracker.summary_string(),
            tracker.num_intervals(),
            tracker.collection_interval_secs()
        );
    }
    Ok(())
}
