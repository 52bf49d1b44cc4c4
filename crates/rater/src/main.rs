//! Rater CLI - estimate held-out board game ratings from CSV files

use anyhow::{Context, Result};
use boardgame_rater::{
    init_logging, CsvEstimateWriter, CsvSource, EstimateSink, Pipeline, QuerySource,
    RaterConfig, RatingSource,
};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rater")]
#[command(about = "Estimate board game ratings with ALS completion and user-space neighbors", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, help = "CSV of historical ratings")]
    train: PathBuf,

    #[arg(long, help = "CSV of (user, game) pairs to estimate")]
    queries: PathBuf,

    #[arg(long, help = "Where to write the estimates CSV")]
    output: PathBuf,

    #[arg(long, env = "RATER_CONFIG", help = "Extra configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the factor initialization seed")]
    seed: Option<u64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    let mut config =
        RaterConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(seed) = cli.seed {
        config.als.seed = seed;
    }

    init_logging(&config.logging)?;
    info!("Starting rater");

    let records = CsvSource::from_path(&cli.train, config.io.clone())
        .and_then(|mut source| source.read_ratings())
        .with_context(|| format!("Failed to read ratings from {}", cli.train.display()))?;

    let queries = CsvSource::from_path(&cli.queries, config.io.clone())
        .and_then(|mut source| source.read_queries())
        .with_context(|| format!("Failed to read queries from {}", cli.queries.display()))?;

    let pipeline = Pipeline::new(config.clone())?;
    let report = pipeline.run(&records, &queries)?;

    CsvEstimateWriter::create(&cli.output, config.io.clone())
        .and_then(|mut writer| writer.write_estimates(&report.rows))
        .with_context(|| format!("Failed to write estimates to {}", cli.output.display()))?;

    println!(
        "{}",
        serde_json::json!({
            "output": cli.output.display().to_string(),
            "queries": report.rows.len(),
            "estimated": report.estimated(),
            "undefined": report.undefined,
            "failed": report.failures.len(),
            "training_users": report.training_users,
            "items": report.items,
            "final_als_error": report.als_errors.last(),
        })
    );

    Ok(())
}
