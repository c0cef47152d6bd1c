//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest crawl
//! orchestration engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_harvest::config::{load_config_with_hash, load_credentials, load_job_spec, Config};
use sumi_harvest::output::{load_job_progress, print_progress, JsonLinesSink};
use sumi_harvest::storage::{open_storage, CheckpointStore};
use sumi_harvest::{Engine, JobId};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a crawl orchestration engine
///
/// Sumi-Harvest drives bulk fetch jobs to completion under bounded
/// concurrency, per-domain rate limits and leased credentials. Progress is
/// checkpointed, so an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Job file to submit (may be repeated)
    #[arg(short, long = "job", value_name = "FILE")]
    jobs: Vec<PathBuf>,

    /// Credential file to upload before any job starts
    #[arg(short, long, value_name = "FILE")]
    credentials: Option<PathBuf>,

    /// Resume unfinished jobs from the checkpoint database
    #[arg(long, conflicts_with = "status")]
    resume: bool,

    /// Show progress of every job in the database and exit
    #[arg(long)]
    status: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.status {
        return handle_status(&config);
    }

    if cli.jobs.is_empty() && !cli.resume {
        anyhow::bail!("nothing to do: pass --job FILE or --resume");
    }

    handle_run(config, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --status mode: prints every job recorded in the database
fn handle_status(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open checkpoint database")?;

    let jobs = store.list_jobs()?;
    if jobs.is_empty() {
        println!("No jobs recorded");
    }
    for job in &jobs {
        let progress = load_job_progress(&store, job)?;
        println!("Job {}", job.id);
        print_progress(&job.name, &progress);
        println!();
    }

    Ok(())
}

/// Handles the main run: recover, submit, and wait for every job
async fn handle_run(config: Config, cli: &Cli) -> anyhow::Result<()> {
    let store = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open checkpoint database")?;
    let sink = JsonLinesSink::open(Path::new(&config.output.results_path))
        .await
        .with_context(|| format!("failed to open {}", config.output.results_path))?;
    tracing::info!("Writing results to {}", config.output.results_path);

    let engine = Engine::with_http(config, store, Arc::new(sink))?;

    if let Some(path) = &cli.credentials {
        let specs = load_credentials(path)
            .with_context(|| format!("failed to load credentials from {}", path.display()))?;
        for spec in specs {
            engine.upload_credential(spec)?;
        }
    }

    let mut jobs: Vec<(JobId, String)> = Vec::new();

    if cli.resume {
        for id in engine.recover()? {
            jobs.push((id, id.to_string()));
        }
        tracing::info!("Recovered {} unfinished job(s)", jobs.len());
    }

    for path in &cli.jobs {
        let spec = load_job_spec(path)
            .with_context(|| format!("failed to load job from {}", path.display()))?;
        let name = spec.name.clone();
        let id = engine.submit(spec)?;
        jobs.push((id, name));
    }

    let waited = async {
        let mut finished = Vec::new();
        for (id, name) in &jobs {
            finished.push((name, engine.wait(*id).await?));
        }
        Ok::<_, sumi_harvest::HarvestError>(finished)
    };

    tokio::select! {
        finished = waited => {
            for (name, progress) in finished? {
                print_progress(name, &progress);
                println!();
            }
            engine.shutdown().await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; checkpointing and stopping");
            engine.shutdown().await;
            for (id, name) in &jobs {
                print_progress(name, &engine.status(*id)?);
                println!();
            }
            println!("Run again with --resume to continue");
        }
    }

    Ok(())
}
