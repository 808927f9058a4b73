mod config;
mod data;
mod error;
mod features;
mod ml;
mod web;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::ServiceConfig;
use data::TrainingDataSource;
use ml::{ModelStore, Predictor, Trainer};
use web::{start_server, AppState};

#[derive(Parser)]
#[command(name = "trading-ml-service")]
#[command(author = "Trading Bot")]
#[command(version)]
#[command(about = "Machine learning service for crypto price-direction predictions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP prediction service
    Serve {
        /// Port override (default: ML_SERVICE_PORT or 8001)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Train a model once and exit
    Train {
        /// Trading pair symbol
        #[arg(short, long, default_value = "ETHUSDT")]
        symbol: String,
        /// Candle timeframe
        #[arg(short, long, default_value = "1h")]
        timeframe: String,
        /// Historical periods to fetch
        #[arg(short, long, default_value = "500")]
        lookback: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServiceConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            run_server(config).await?;
        }
        Commands::Train {
            symbol,
            timeframe,
            lookback,
        } => {
            run_training(config, &symbol, &timeframe, lookback).await?;
        }
    }

    Ok(())
}

async fn run_server(config: ServiceConfig) -> Result<()> {
    info!("Trading ML Service v{}", env!("CARGO_PKG_VERSION"));

    let store = ModelStore::new(config.model_dir.clone());
    let data_source = TrainingDataSource::new(config.database_url.clone());

    let mut predictor = Predictor::new(store.clone());
    predictor.load_model(&config.default_symbol, &config.default_timeframe);

    let trainer = Trainer::new(
        data_source,
        store,
        config.label_look_ahead,
        config.label_threshold,
    );

    let state = AppState {
        predictor: Arc::new(RwLock::new(predictor)),
        trainer: Arc::new(trainer),
    };

    start_server(state, &config.host, config.port).await
}

async fn run_training(
    config: ServiceConfig,
    symbol: &str,
    timeframe: &str,
    lookback: usize,
) -> Result<()> {
    let store = ModelStore::new(config.model_dir.clone());
    let data_source = TrainingDataSource::new(config.database_url.clone());
    let trainer = Trainer::new(
        data_source,
        store,
        config.label_look_ahead,
        config.label_threshold,
    );

    let outcome = trainer.train(symbol, timeframe, lookback).await?;

    info!(
        "training complete: accuracy {:.4}, {} train / {} test samples",
        outcome.accuracy, outcome.training_samples, outcome.test_samples
    );
    info!("model saved to {}", outcome.model_path.display());

    Ok(())
}
