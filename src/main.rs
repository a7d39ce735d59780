use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sketch_digits::data_loader::MnistDataSet;
use sketch_digits::preprocess::{grid_from_image, parse_pixel_string};
use sketch_digits::storage::ScoreStore;
use sketch_digits::training::{rescore, run_scenarios};
use sketch_digits::{Config, FileStore, Predictor};

#[derive(Parser)]
#[command(name = "sketch-digits")]
#[command(about = "Train and query a three-layer perceptron for handwritten digits")]
struct Cli {
    /// YAML config file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train every scenario, score it on the test set and save the weights
    Train,

    /// Re-score stored weights against the test set
    Evaluate,

    /// Classify one sketch with every stored scenario
    Query {
        /// File holding comma-separated ink intensities
        #[arg(long, conflicts_with = "image")]
        pixels: Option<PathBuf>,

        /// Image of a dark digit on a light background
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Print the stored test scores
    Scores,

    /// Serve sketch queries over HTTP
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sketch_digits=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let store = FileStore::new(&config.storage.dir);

    match cli.command {
        Commands::Train => {
            let most_records = config.scenarios.iter().map(|s| s.records).max().unwrap_or(0);
            let data = MnistDataSet::load(&config.data, most_records, &config.network)?;
            let reports = run_scenarios(&config, &data, &store)?;
            for (id, report) in reports.iter().enumerate() {
                println!(
                    "scenario {id}: {} records x {} epochs -> {}",
                    report.scenario.records, report.scenario.epochs, report.accuracy
                );
            }
        }
        Commands::Evaluate => {
            let test_data = MnistDataSet::load_test(&config.data, &config.network)?;
            for (id, accuracy) in rescore(&config, &test_data, &store)?.iter().enumerate() {
                println!("scenario {id}: {accuracy}");
            }
        }
        Commands::Query { pixels, image } => {
            let grid = match (pixels, image) {
                (Some(path), None) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    parse_pixel_string(text.trim())?
                }
                (None, Some(path)) => grid_from_image(&path, &config.image)?,
                _ => bail!("pass exactly one of --pixels or --image"),
            };
            let predictor = Predictor::load(config, &store)?;
            let response = predictor.process_grid(&grid)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Scores => {
            for (id, score) in store.load_scores()?.iter().enumerate() {
                println!("scenario {id}: {score}");
            }
        }
        Commands::Serve { addr } => {
            let predictor = Predictor::load(config, &store)?;
            info!(scenarios = predictor.scenario_count(), "weights loaded");
            sketch_digits::server::serve(predictor, addr).await?;
        }
    }

    Ok(())
}
