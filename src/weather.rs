use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{coordinate_key, CoordinateKey, KeyedCache};
use crate::config::WeatherFailurePolicy;
use crate::context::AppContext;
use crate::models::{Location, WeatherReading, WeatherTable, WeatherValues, WEATHER_FIELDS, WEATHER_FIELD_COUNT};
use crate::retry::{retry_db_operation, retry_with_backoff, RetryPolicy};

const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const MAX_FORECAST_DAYS: usize = 16;

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    daily: OpenMeteoDaily,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

/// Parses the `daily` block of an Open-Meteo response into a date-keyed table.
pub fn parse_daily(body: &str) -> Result<WeatherTable> {
    let response: OpenMeteoResponse = serde_json::from_str(body).context("Invalid weather response")?;
    let daily = response.daily;
    let columns = [
        &daily.temperature_2m_max,
        &daily.temperature_2m_min,
        &daily.relative_humidity_2m_mean,
        &daily.precipitation_sum,
    ];
    let mut table = WeatherTable::new();
    for (index, raw_date) in daily.time.iter().enumerate() {
        let date = NaiveDate::parse_from_str(raw_date.get(..10).unwrap_or(raw_date), "%Y-%m-%d")
            .with_context(|| format!("Invalid weather date '{}'", raw_date))?;
        let mut reading: WeatherReading = [None; WEATHER_FIELD_COUNT];
        for (slot, column) in reading.iter_mut().zip(columns) {
            *slot = column.get(index).copied().flatten().filter(|value| value.is_finite());
        }
        table.insert(date, reading);
    }
    Ok(table)
}

/// Readings with every field present.
pub fn complete_values(table: &WeatherTable) -> BTreeMap<NaiveDate, WeatherValues> {
    table
        .iter()
        .filter_map(|(date, reading)| {
            let [Some(a), Some(b), Some(c), Some(d)] = *reading else {
                return None;
            };
            Some((*date, WeatherValues::from_array([a, b, c, d])))
        })
        .collect()
}

async fn fetch_daily(
    client: &reqwest::Client,
    url: &'static str,
    query: Vec<(&'static str, String)>,
    policy: &RetryPolicy,
) -> Result<WeatherTable> {
    let query = &query;
    let body = retry_with_backoff("weather request", policy, move || async move {
        let response = client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Weather request failed")?
            .error_for_status()
            .context("Weather service returned an error")?;
        response.text().await.context("Failed to read weather response")
    })
    .await?;
    parse_daily(&body)
}

fn base_query(location: &Location) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", format!("{:.4}", location.latitude)),
        ("longitude", format!("{:.4}", location.longitude)),
        ("daily", WEATHER_FIELDS.join(",")),
        ("timezone", "auto".to_string()),
    ]
}

pub async fn fetch_archive(
    client: &reqwest::Client,
    location: &Location,
    start: NaiveDate,
    end: NaiveDate,
    policy: &RetryPolicy,
) -> Result<WeatherTable> {
    let mut query = base_query(location);
    query.push(("start_date", start.format("%Y-%m-%d").to_string()));
    query.push(("end_date", end.format("%Y-%m-%d").to_string()));
    fetch_daily(client, ARCHIVE_URL, query, policy).await
}

pub async fn fetch_forecast(
    client: &reqwest::Client,
    location: &Location,
    days: usize,
    policy: &RetryPolicy,
) -> Result<WeatherTable> {
    let mut query = base_query(location);
    query.push(("forecast_days", days.clamp(1, MAX_FORECAST_DAYS).to_string()));
    fetch_daily(client, FORECAST_URL, query, policy).await
}

fn covers_range(table: &WeatherTable, start: NaiveDate, end: NaiveDate) -> bool {
    let expected = (end - start).num_days() + 1;
    table.range(start..=end).count() as i64 >= expected
}

/// Historical weather for training: the local table when it covers the
/// range, then the archive API, then the configured failure policy.
pub async fn load_training_weather(
    context: &AppContext,
    location: &Location,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<WeatherTable> {
    if context.has_database() {
        let stored: Result<WeatherTable> = retry_db_operation!("weather query", async {
            let db = context.database().await?;
            db.fetch_weather(start, end).await
        });
        match stored {
            Ok(table) if covers_range(&table, start, end) => {
                info!("Fetched {} days of weather data from database", table.len());
                return Ok(table);
            }
            Ok(table) => info!(
                "Weather table holds {} of {} days; querying archive API",
                table.len(),
                (end - start).num_days() + 1
            ),
            Err(err) => warn!("Weather DB lookup failed: {:#}", err),
        }
    }

    let config = context.config();
    match fetch_archive(context.http_client(), location, start, end, &config.retry).await {
        Ok(table) => {
            info!("Fetched {} days of historical weather data", table.len());
            Ok(table)
        }
        Err(err) => apply_failure_policy(config.weather_failure_policy, err),
    }
}

fn apply_failure_policy(policy: WeatherFailurePolicy, err: anyhow::Error) -> Result<WeatherTable> {
    match policy {
        WeatherFailurePolicy::HardFail => Err(err.context("Historical weather unavailable")),
        WeatherFailurePolicy::ZeroFill => {
            warn!(
                "Historical weather unavailable ({:#}); proceeding with weather features set to 0",
                err
            );
            Ok(WeatherTable::new())
        }
    }
}

/// Horizon-day weather: values for dates the response covers, the mean of
/// the returned values for the rest. Empty when nothing usable was returned.
pub fn fill_horizon(
    returned: &BTreeMap<NaiveDate, WeatherValues>,
    start: NaiveDate,
    horizon: usize,
) -> BTreeMap<NaiveDate, WeatherValues> {
    let Some(mean) = WeatherValues::mean_of(returned.values()) else {
        return BTreeMap::new();
    };
    (0..horizon as i64)
        .map(|offset| {
            let date = start + Duration::days(offset);
            (date, returned.get(&date).copied().unwrap_or(mean))
        })
        .collect()
}

/// Forecast weather for `[start, start + horizon)`, cached per rounded
/// coordinates. Failures yield an empty map so the forecaster falls back to
/// historical mean weather.
pub async fn forecast_weather(
    client: &reqwest::Client,
    location: &Location,
    start: NaiveDate,
    horizon: usize,
    policy: &RetryPolicy,
    cache: &KeyedCache<CoordinateKey, Arc<BTreeMap<NaiveDate, WeatherValues>>>,
) -> BTreeMap<NaiveDate, WeatherValues> {
    let key = coordinate_key(location.latitude, location.longitude);
    let returned = match cache.get(&key) {
        Some(values) => values,
        None => match fetch_forecast(client, location, MAX_FORECAST_DAYS.max(horizon), policy).await {
            Ok(table) => {
                let values = Arc::new(complete_values(&table));
                if !values.is_empty() {
                    cache.insert(key, Arc::clone(&values));
                }
                values
            }
            Err(err) => {
                warn!("Forecast weather unavailable: {:#}; using historical mean weather", err);
                return BTreeMap::new();
            }
        },
    };
    fill_horizon(&returned, start, horizon)
}
