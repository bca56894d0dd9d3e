//! cdx-imbalance command line.
//!
//! Usage:
//!   cdx-imbalance run --trades <csv> [--reference <csv>] [--config <json>]
//!   cdx-imbalance urls --date 2025-06-03 [--sequences 4]

use anyhow::{Context, Result};
use cdx_core::Config;
use cdx_ingestion::{
    dtcc, load_reference_csv, DtccReader, Normalizer, ProductFilter, ReferenceProvider,
    ReferenceSeries,
};
use cdx_pipeline::{init_logging, Pipeline, RunReport};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "cdx-imbalance")]
#[command(about = "Order imbalance from public CDS index trade reports", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify and aggregate a repository CSV
    Run(RunArgs),
    /// Print the public file URLs for a date
    Urls(UrlArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Repository CSV (slice or cumulative, unzipped)
    #[arg(long)]
    trades: PathBuf,
    /// Reference levels CSV (timestamp,instrument_id,level[,basis])
    #[arg(long)]
    reference: Option<PathBuf>,
    /// JSON configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override classifier.threshold_bps
    #[arg(long)]
    threshold_bps: Option<f64>,
    /// Override aggregation.bucket_width_minutes
    #[arg(long)]
    bucket_minutes: Option<u32>,
    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    /// Override logging.level
    #[arg(long)]
    log_level: Option<String>,
    /// Keep amendments and cancels as separate reports
    #[arg(long)]
    no_amendments: bool,
}

#[derive(Args)]
struct UrlArgs {
    /// Trade date (YYYY-MM-DD)
    #[arg(long)]
    date: NaiveDate,
    /// Asset class segment of the file name
    #[arg(long)]
    asset_class: Option<String>,
    /// Also list intraday slices 1..=N
    #[arg(long, default_value_t = 0)]
    sequences: u32,
    /// JSON configuration (base URLs)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Urls(args) => urls(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(threshold) = args.threshold_bps {
        config.classifier.threshold_bps = threshold;
    }
    if let Some(minutes) = args.bucket_minutes {
        config.aggregation.bucket_width_minutes = minutes;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.no_amendments {
        config.source.resolve_amendments = false;
    }
    config.validate().context("invalid configuration")?;
    init_logging(&config.logging);

    let mut series = ReferenceSeries::from_config(&config.classifier);
    if let Some(path) = &args.reference {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let normalizer = Normalizer::from_config(&config);
        load_reference_csv(BufReader::new(file), &mut series, &normalizer, &config)
            .with_context(|| format!("reading reference levels {}", path.display()))?;
    }

    let file = File::open(&args.trades)
        .with_context(|| format!("opening {}", args.trades.display()))?;
    let reader = DtccReader::new(BufReader::new(file), &config.conversion)
        .with_context(|| format!("reading {}", args.trades.display()))?;
    let filter = ProductFilter::from_config(&config.source)?;

    let report = run_pipeline(&config, series, reader, &filter)?;
    let json = report.to_json_pretty()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_pipeline<P, I>(config: &Config, provider: P, records: I, filter: &ProductFilter) -> Result<RunReport>
where
    P: ReferenceProvider,
    I: IntoIterator<Item = cdx_core::Result<dtcc::DtccRecord>>,
{
    let pipeline = Pipeline::new(config, provider)?;
    Ok(pipeline.run_records(records, filter, config.source.resolve_amendments))
}

fn urls(args: UrlArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let source = &config.source;
    let asset_class = args.asset_class.as_deref().unwrap_or(&source.asset_class);

    println!("{}", dtcc::eod_cumulative_url(&source.eod_base_url, asset_class, args.date));
    for sequence in 1..=args.sequences {
        println!("{}", dtcc::slice_url(&source.slice_base_url, asset_class, args.date, sequence));
    }
    Ok(())
}
