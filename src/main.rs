use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tour_architect::ingestion::{load_tours, TourStats};
use tour_architect::{
    init_tracing, AppConfig, BatchControl, PlaceResolver, Resolution, TourArchitect,
    TourCollection,
};

#[derive(Parser, Debug)]
#[command(name = "tour-architect")]
#[command(about = "Rebuilds raw tours into 7-block itineraries and geocodes their places")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and enrich every valid tour in a file
    Enrich {
        input: PathBuf,
        /// Write the collection here instead of Tour_Export_<millis>.json
        #[arg(long)]
        out: Option<PathBuf>,
        /// Previous export; its destinations are skipped and kept in the output
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Let every tour get a fresh user schema
        #[arg(long)]
        no_lock_schema: bool,
    },
    /// Check a tour file and print summary statistics
    Validate { input: PathBuf },
    /// Geocode a single place name through the provider chain
    Resolve {
        query: String,
        /// Location hint such as the tour destination
        #[arg(long, env = "RESOLVE_CONTEXT")]
        context: Option<String>,
    },
    /// Print the effective configuration without secrets
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();

    match cli.command {
        Command::Enrich {
            input,
            out,
            resume,
            no_lock_schema,
        } => {
            if no_lock_schema {
                config.lock_schema = false;
            }
            enrich(&config, input, out, resume).await
        }
        Command::Validate { input } => {
            let batch = load_tours(&input)
                .with_context(|| format!("failed to read tours from {}", input.display()))?;
            let stats = TourStats::compute(&batch.tours);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "valid": batch.tours.len(),
                    "rejected": batch.rejected,
                    "stats": stats,
                }))?
            );
            Ok(())
        }
        Command::Resolve { query, context } => {
            let resolver = PlaceResolver::from_config(&config)?;
            match resolver.resolve_in_context(&query, context.as_deref()).await {
                Resolution::Found(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Resolution::NotFound => eprintln!("no geographic data for \"{query}\""),
            }
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.public_profile())?);
            Ok(())
        }
    }
}

async fn enrich(
    config: &AppConfig,
    input: PathBuf,
    out: Option<PathBuf>,
    resume: Option<PathBuf>,
) -> Result<()> {
    let batch = load_tours(&input)
        .with_context(|| format!("failed to read tours from {}", input.display()))?;
    if batch.rejected > 0 {
        warn!(rejected = batch.rejected, "some tours were missing required fields");
    }
    info!(tours = batch.tours.len(), "starting enrichment");

    let mut collection = match &resume {
        Some(path) => TourCollection::load(path)
            .with_context(|| format!("failed to load previous export {}", path.display()))?,
        None => TourCollection::new(),
    };

    let architect =
        TourArchitect::from_config(config).context("failed to initialize the pipeline")?;
    let control = BatchControl::new().on_progress(|current, total| {
        info!(current, total, "processing tour");
    });

    let cancel = control.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current tour");
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let report = architect
        .process_batch(&batch.tours, &mut collection, &control)
        .await;

    let path = match out {
        Some(path) => {
            collection.write_to(&path)?;
            path
        }
        None => collection.export(&std::env::current_dir()?)?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "export": path.display().to_string(),
            "rejected": batch.rejected,
            "report": report,
        }))?
    );
    Ok(())
}
