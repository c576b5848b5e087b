use anyhow::Result;
use log::info;

use super::forecast::{self, ForecastArgs};
use super::train::{self, TrainArgs};
use crate::context::AppContext;

/// Trains every dish, then forecasts the same set.
pub async fn run(app: &AppContext, train_args: &TrainArgs, forecast_args: &ForecastArgs) -> Result<()> {
    let report = train::run(app, train_args).await?;
    info!(
        "Training complete ({} trained, {} skipped); forecasting",
        report.results.len(),
        report.skipped.len()
    );
    forecast::run(app, forecast_args).await?;
    Ok(())
}
