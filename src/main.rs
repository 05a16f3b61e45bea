use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use station_resupply::{AppConfig, PersistedModels, Pipeline, SystemClock, io};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "station-resupply")]
#[command(about = "Flag bike stations whose demand outruns the seasonal forecast")]
struct Args {
    /// Additional configuration file, applied over the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train, score and write the flagged daily table
    Run {
        /// Hourly rentals CSV (station_id, timestamp, rent_count)
        #[arg(long)]
        input: PathBuf,
        /// Destination of the flagged daily table
        #[arg(long)]
        output: PathBuf,
        /// Persist the fitted models here
        #[arg(long, conflicts_with = "load_models")]
        save_models: Option<PathBuf>,
        /// Score with previously saved models instead of training
        #[arg(long)]
        load_models: Option<PathBuf>,
        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Fit both model families and persist them
    Train {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        models: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("station_resupply=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    let pipeline = Pipeline::new(&config).context("Failed to set up pipeline")?;

    match args.command {
        Command::Run {
            input,
            output,
            save_models,
            load_models,
            summary,
        } => run(
            &pipeline,
            &input,
            &output,
            save_models.as_deref(),
            load_models.as_deref(),
            summary.as_deref(),
        ),
        Command::Train { input, models } => train(&pipeline, &input, &models),
    }
}

fn run(
    pipeline: &Pipeline,
    input: &Path,
    output: &Path,
    save_models: Option<&Path>,
    load_models: Option<&Path>,
    summary_path: Option<&Path>,
) -> Result<()> {
    let events = io::read_events(input)?;

    let result = match load_models {
        Some(path) => {
            let persisted = PersistedModels::load(path)
                .with_context(|| format!("Failed to load models from {}", path.display()))?;
            tracing::info!("{}", persisted.summary());
            pipeline.run_with_models(events, persisted.into_trained())?
        }
        None => pipeline.run(events)?,
    };

    if let Some(path) = save_models {
        let training_range = result
            .summary
            .split
            .map(|split| split.train)
            .context("Run produced no training range")?;
        let persisted = PersistedModels::new(&result.models, training_range, &SystemClock);
        persisted
            .save(path)
            .with_context(|| format!("Failed to save models to {}", path.display()))?;
        tracing::info!("{}", persisted.summary());
    }

    io::write_table(output, &result.table)?;
    if let Some(path) = summary_path {
        io::write_summary(path, &result.summary)?;
    }

    tracing::info!(
        station_days = result.summary.station_days,
        recommended = result.summary.recommended,
        "Done"
    );
    Ok(())
}

fn train(pipeline: &Pipeline, input: &Path, models: &Path) -> Result<()> {
    let events = io::read_events(input)?;

    let prepared = pipeline.prepare(events)?;
    let trained = pipeline.train(&prepared);

    let persisted = PersistedModels::new(&trained, prepared.split.train, &SystemClock);
    persisted
        .save(models)
        .with_context(|| format!("Failed to save models to {}", models.display()))?;
    tracing::info!("{}", persisted.summary());
    Ok(())
}
