use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use dish_forecast::{
    commands::{
        forecast::{self, ForecastArgs},
        list_dishes, run,
        train::{self, TrainArgs},
    },
    config::PipelineConfig,
    context::AppContext,
    sales_data::DEFAULT_SALES_CSV,
};
use log::info;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const DEFAULT_OUTPUT_DIR: &str = "forecasts";

#[derive(Parser)]
#[command(name = "dish_forecast")]
#[command(about = "Per-dish restaurant sales forecasting with a trend + gradient boosting hybrid")]
struct Cli {
    /// Base directory for the registry and model artifacts (overrides MODEL_DIR)
    #[arg(long = "model-dir", value_name = "PATH", global = true)]
    model_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Restaurant address used for geocoding and weather
    #[arg(long)]
    address: Option<String>,
    /// Tenant store; filters sales and uses a per-store model directory
    #[arg(long = "store-id")]
    store_id: Option<i64>,
}

#[derive(Args, Clone)]
struct TrainOptions {
    /// Sales CSV used when no database is available
    #[arg(long = "sales-csv", value_name = "PATH", default_value = DEFAULT_SALES_CSV)]
    sales_csv: PathBuf,
    /// Retrain dishes that already have a registry entry
    #[arg(long = "retrain-all")]
    retrain_all: bool,
    /// Train dishes one at a time on the main thread
    #[arg(long)]
    debug: bool,
}

#[derive(Args, Clone)]
struct ForecastOptions {
    /// First forecast date (YYYY-MM-DD); defaults to the day after the last sale
    #[arg(long = "start-date")]
    start_date: Option<NaiveDate>,
    /// Number of days to forecast
    #[arg(long)]
    horizon: Option<usize>,
    /// Directory for forecast CSV files
    #[arg(long = "output-dir", value_name = "PATH", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Include per-group attribution columns
    #[arg(long)]
    attribution: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train champion models for every dish
    Train {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: TrainOptions,
    },
    /// Forecast dishes from the trained registry
    Forecast {
        /// Dish to forecast (repeatable); every registered dish when omitted
        #[arg(long = "dish")]
        dishes: Vec<String>,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: ForecastOptions,
    },
    /// Train, then forecast every dish
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        train: TrainOptions,
        #[command(flatten)]
        forecast: ForecastOptions,
    },
    /// List registered dishes with their champion and MAE
    Dishes {
        #[arg(long = "store-id")]
        store_id: Option<i64>,
    },
}

fn train_args(source: &SourceArgs, options: TrainOptions) -> TrainArgs {
    TrainArgs {
        address: source.address.clone(),
        sales_csv: options.sales_csv,
        store_id: source.store_id,
        retrain_all: options.retrain_all,
        debug: options.debug,
    }
}

fn forecast_args(dishes: Vec<String>, source: &SourceArgs, options: ForecastOptions) -> ForecastArgs {
    ForecastArgs {
        dishes,
        start_date: options.start_date,
        horizon: options.horizon,
        address: source.address.clone(),
        store_id: source.store_id,
        output_dir: options.output_dir,
        with_attribution: options.attribution,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { model_dir, command } = Cli::parse();

    let settings: HashMap<String, String> = env::vars().collect();
    let mut config = PipelineConfig::from_settings_map(&settings)?;
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }
    let database_url = env::var("DATABASE_URL").ok();
    let app_context = AppContext::initialize(database_url, config).await?;
    info!(
        "Starting dish forecaster (database: {})",
        if app_context.has_database() { "configured" } else { "CSV fallback" }
    );

    match command {
        Commands::Train { source, options } => {
            train::run(&app_context, &train_args(&source, options)).await?;
        }
        Commands::Forecast {
            dishes,
            source,
            options,
        } => {
            forecast::run(&app_context, &forecast_args(dishes, &source, options)).await?;
        }
        Commands::Run {
            source,
            train,
            forecast,
        } => {
            let train = train_args(&source, train);
            let forecast = forecast_args(Vec::new(), &source, forecast);
            run::run(&app_context, &train, &forecast).await?;
        }
        Commands::Dishes { store_id } => {
            list_dishes::run(&app_context, store_id)?;
        }
    }

    Ok(())
}
