use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::AppContext;
use crate::forecaster::ForecastError;
use crate::models::WeatherValues;
use crate::registry::{safe_filename, DishForecast, ForecastRequest, ModelStore};
use crate::weather::forecast_weather;

pub const FORECAST_SUMMARY_FILE: &str = "forecast_summary.csv";

#[derive(Debug, Clone)]
pub struct ForecastArgs {
    /// Dishes to forecast; every registered dish when empty.
    pub dishes: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub horizon: Option<usize>,
    pub address: Option<String>,
    pub store_id: Option<i64>,
    pub output_dir: PathBuf,
    pub with_attribution: bool,
}

#[derive(Serialize)]
struct ForecastRow {
    date: NaiveDate,
    trend_prediction: f64,
    combined_prediction: f64,
    lower_bound: f64,
    upper_bound: f64,
    seasonality: Option<f64>,
    holiday: Option<f64>,
    weather: Option<f64>,
    lags_trend: Option<f64>,
    residual_base: Option<f64>,
}

pub async fn run(app: &AppContext, args: &ForecastArgs) -> Result<Vec<DishForecast>> {
    let config = app.config();
    let horizon = args.horizon.unwrap_or(config.forecast_horizon);
    let store = Arc::new(app.model_store(args.store_id));

    let dishes: Vec<String> = if args.dishes.is_empty() {
        store
            .list_dishes()?
            .into_iter()
            .map(|(dish, _)| dish)
            .collect()
    } else {
        args.dishes.clone()
    };
    if dishes.is_empty() {
        return Err(anyhow!("No trained dishes found in {}", store.dir().display()));
    }

    let start_date = match args.start_date {
        Some(date) => date,
        None => default_start_date(&store, &dishes),
    };
    info!(
        "Forecasting {} dishes for {} days from {}",
        dishes.len(),
        horizon,
        start_date.format("%Y-%m-%d")
    );

    let location = app.resolve_location(args.address.as_deref(), args.store_id).await;
    let weather = forecast_weather(
        app.http_client(),
        &location,
        start_date,
        horizon,
        &config.retry,
        &app.caches().forecast_weather,
    )
    .await;
    if weather.is_empty() {
        warn!("No forecast weather available; models use their historical mean weather");
    }

    let with_attribution = args.with_attribution;
    let worker_store = Arc::clone(&store);
    let results = tokio::task::spawn_blocking(move || {
        forecast_dishes(&worker_store, &dishes, start_date, horizon, &weather, with_attribution)
    })
    .await
    .context("Forecast task panicked")?;

    let mut forecasts = Vec::with_capacity(results.len());
    for (dish, result) in results {
        match result {
            Ok(forecast) => forecasts.push(forecast),
            Err(err) => error!("Forecast failed for {}: {}", dish, err),
        }
    }
    if forecasts.is_empty() {
        return Err(anyhow!("Every dish forecast failed"));
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    for forecast in &forecasts {
        let path = args
            .output_dir
            .join(format!("forecast_{}.csv", safe_filename(&forecast.dish)));
        write_dish_forecast(&path, forecast)?;
    }
    let summary_path = args.output_dir.join(FORECAST_SUMMARY_FILE);
    write_forecast_summary(&summary_path, &forecasts)?;
    info!(
        "Wrote {} dish forecasts and {}",
        forecasts.len(),
        summary_path.display()
    );
    Ok(forecasts)
}

/// Day after the most recent stored sale, or today when no snapshot exists.
fn default_start_date(store: &ModelStore, dishes: &[String]) -> NaiveDate {
    dishes
        .iter()
        .filter_map(|dish| store.recent_sales(dish).ok())
        .filter_map(|snapshot| snapshot.last_date())
        .max()
        .map(|last| last + Duration::days(1))
        .unwrap_or_else(|| Local::now().date_naive())
}

/// Forecasts dishes in parallel, each seeded with its stored recent sales.
pub fn forecast_dishes(
    store: &ModelStore,
    dishes: &[String],
    start_date: NaiveDate,
    horizon: usize,
    weather: &BTreeMap<NaiveDate, WeatherValues>,
    with_attribution: bool,
) -> Vec<(String, Result<DishForecast, ForecastError>)> {
    dishes
        .par_iter()
        .map(|dish| {
            let result = store.recent_sales(dish).and_then(|snapshot| {
                if let Some(last) = snapshot.last_date() {
                    if last + Duration::days(1) < start_date {
                        warn!(
                            "{}: recent sales end {} but forecast starts {}",
                            dish,
                            last.format("%Y-%m-%d"),
                            start_date.format("%Y-%m-%d")
                        );
                    }
                }
                let request = ForecastRequest {
                    start_date,
                    horizon,
                    recent_sales: snapshot.quantities(),
                    weather: weather.clone(),
                    with_attribution,
                };
                store.forecast_dish(dish, &request)
            });
            (dish.clone(), result)
        })
        .collect()
}

pub fn write_dish_forecast(path: &Path, forecast: &DishForecast) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for point in &forecast.points {
        let attribution = point.attribution.as_ref();
        writer.serialize(ForecastRow {
            date: point.date,
            trend_prediction: point.trend_prediction,
            combined_prediction: point.combined_prediction,
            lower_bound: point.lower_bound,
            upper_bound: point.upper_bound,
            seasonality: attribution.map(|a| a.seasonality),
            holiday: attribution.map(|a| a.holiday),
            weather: attribution.map(|a| a.weather),
            lags_trend: attribution.map(|a| a.lags_trend),
            residual_base: attribution.map(|a| a.residual_base),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Date by dish table of combined predictions.
pub fn write_forecast_summary(path: &Path, forecasts: &[DishForecast]) -> Result<()> {
    let mut table: BTreeMap<NaiveDate, BTreeMap<&str, f64>> = BTreeMap::new();
    for forecast in forecasts {
        for point in &forecast.points {
            table
                .entry(point.date)
                .or_default()
                .insert(forecast.dish.as_str(), point.combined_prediction);
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut header = vec!["date".to_string()];
    header.extend(forecasts.iter().map(|forecast| forecast.dish.clone()));
    writer.write_record(&header)?;
    for (date, values) in &table {
        let mut record = vec![date.format("%Y-%m-%d").to_string()];
        record.extend(forecasts.iter().map(|forecast| {
            values
                .get(forecast.dish.as_str())
                .map(|value| format!("{:.2}", value))
                .unwrap_or_default()
        }));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
