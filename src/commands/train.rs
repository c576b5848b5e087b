use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::booster::ModelFamily;
use crate::context::AppContext;
use crate::models::{DishHistory, Location};
use crate::optimizer::round_to;
use crate::orchestrator::{train_all, BatchOptions, BatchReport};
use crate::registry::write_json;
use crate::sales_data::{aggregate_sales, date_range, load_sales};
use crate::training_status::TrainingStatusSnapshot;
use crate::weather::load_training_weather;

pub const LEADERBOARD_FILE: &str = "leaderboard.csv";
pub const TRAINING_SUMMARY_FILE: &str = "training_summary.json";

#[derive(Debug, Clone)]
pub struct TrainArgs {
    pub address: Option<String>,
    pub sales_csv: PathBuf,
    pub store_id: Option<i64>,
    pub retrain_all: bool,
    pub debug: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainingSummary<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    location: &'a Location,
    model_dir: &'a Path,
    status: TrainingStatusSnapshot,
    #[serde(flatten)]
    report: &'a BatchReport,
}

#[derive(Serialize)]
struct LeaderboardRow<'a> {
    dish: &'a str,
    champion: &'a str,
    champion_mae: Option<f64>,
    xgboost_mae: Option<f64>,
    catboost_mae: Option<f64>,
    lightgbm_mae: Option<f64>,
    folds: usize,
    fallback_reason: Option<&'a str>,
}

pub async fn run(app: &AppContext, args: &TrainArgs) -> Result<BatchReport> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    let status = app.status().clone();
    let model_dir = app.model_dir(args.store_id);
    info!("Training run {} into {}", run_id, model_dir.display());

    status.set_phase("Loading sales");
    let records = load_sales(app, args.store_id, &args.sales_csv).await?;
    let sales = aggregate_sales(&records);
    let Some((first, last)) = date_range(&sales) else {
        return Err(anyhow!("No sales data found"));
    };
    info!(
        "Loaded {} dishes spanning {} to {}",
        sales.len(),
        first.format("%Y-%m-%d"),
        last.format("%Y-%m-%d")
    );

    status.set_phase("Resolving location");
    let location = app.resolve_location(args.address.as_deref(), args.store_id).await;

    status.set_phase("Loading weather");
    let weather = load_training_weather(app, &location, first, last).await?;

    let histories: Vec<DishHistory> = sales
        .iter()
        .map(|(dish, days)| DishHistory::from_sales(dish, days, &weather))
        .collect();

    let options = BatchOptions {
        country_code: location.country_code.clone(),
        model_dir: model_dir.clone(),
        sequential: args.debug,
        retrain_all: args.retrain_all,
    };
    let config = app.config().clone();
    let worker_status = status.clone();
    let report = tokio::task::spawn_blocking(move || train_all(histories, &config, &options, &worker_status))
        .await
        .context("Training task panicked")??;
    status.set_phase("Finished");

    print_report(&report);
    write_leaderboard(&leaderboard_path(&model_dir), &report)?;
    let summary = TrainingSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        location: &location,
        model_dir: &model_dir,
        status: status.snapshot(),
        report: &report,
    };
    write_json(&model_dir.join(TRAINING_SUMMARY_FILE), &summary)?;
    info!(
        "Training run {} finished: {} trained, {} failed, {} skipped",
        run_id,
        report.results.len(),
        report.errors.len(),
        report.skipped.len()
    );
    Ok(report)
}

fn print_report(report: &BatchReport) {
    println!("\n=== Leaderboard ===");
    for line in report.leaderboard() {
        println!("{}", line);
    }
    if !report.errors.is_empty() {
        println!("\n=== Errors ===");
        for error in &report.errors {
            println!("{}: {}", error.dish, error.error);
        }
    }
}

fn leaderboard_path(model_dir: &Path) -> PathBuf {
    model_dir.join(LEADERBOARD_FILE)
}

/// One row per trained dish with each family's cross-validated MAE.
pub fn write_leaderboard(path: &Path, report: &BatchReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut results: Vec<_> = report.results.iter().collect();
    results.sort_by(|a, b| a.dish.cmp(&b.dish));
    for result in results {
        let family_mae = |family: ModelFamily| {
            result
                .searches
                .iter()
                .find(|outcome| outcome.family == family)
                .map(|outcome| outcome.best_mae)
                .filter(|value| value.is_finite())
                .map(|value| round_to(value, 4))
        };
        writer.serialize(LeaderboardRow {
            dish: &result.dish,
            champion: result.champion.label(),
            champion_mae: result.champion_mae,
            xgboost_mae: family_mae(ModelFamily::XGBoost),
            catboost_mae: family_mae(ModelFamily::CatBoost),
            lightgbm_mae: family_mae(ModelFamily::LightGBM),
            folds: result.fold_count,
            fallback_reason: result.fallback_reason.as_deref(),
        })?;
    }
    writer.flush()?;
    if report.results.is_empty() {
        warn!("No dishes were trained in this run");
    }
    Ok(())
}
