//! Recursive multi-day forecasting.
//!
//! Days are produced oldest first. Each day's combined prediction is appended
//! to the sales history before the next day's lag and rolling features are
//! computed, so the output for day `k` depends on every earlier forecast day.

use chrono::{Duration, NaiveDate};
use log::debug;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::booster::TreeEnsemble;
use crate::features::{FeatureGroup, FeatureLayout};
use crate::holidays::HolidayCalendar;
use crate::models::{Attribution, ForecastPoint, WeatherValues};
use crate::trend::{TrendInput, TrendModel};

/// Caller-visible inference errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("sales history is empty")]
    EmptySalesHistory,

    #[error("horizon {horizon} is outside 1..={max}")]
    HorizonOutOfRange { horizon: usize, max: usize },

    #[error("champion registry not found at {0}")]
    RegistryMissing(PathBuf),

    #[error("dish '{0}' has no trained model")]
    UnknownDish(String),

    #[error("model artifact missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("model artifact {path} is unreadable: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("non-finite value in {0}")]
    NonFiniteInput(&'static str),
}

/// Horizon-day weather keyed by date. Dates without an entry take the mean
/// of the supplied values, or the fallback when nothing was supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureWeather {
    by_date: BTreeMap<NaiveDate, WeatherValues>,
    fallback: WeatherValues,
}

impl FutureWeather {
    pub fn new(by_date: BTreeMap<NaiveDate, WeatherValues>, historical_mean: WeatherValues) -> Self {
        let fallback = WeatherValues::mean_of(by_date.values()).unwrap_or(historical_mean);
        Self { by_date, fallback }
    }

    pub fn resolve(&self, date: NaiveDate) -> WeatherValues {
        self.by_date.get(&date).copied().unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> WeatherValues {
        self.fallback
    }
}

/// Checks the inputs shared by every forecast call.
pub fn validate_request(recent_sales: &[f64], horizon: usize, max_horizon: usize) -> Result<(), ForecastError> {
    if horizon == 0 || horizon > max_horizon {
        return Err(ForecastError::HorizonOutOfRange {
            horizon,
            max: max_horizon,
        });
    }
    if recent_sales.is_empty() {
        return Err(ForecastError::EmptySalesHistory);
    }
    if recent_sales.iter().any(|value| !value.is_finite()) {
        return Err(ForecastError::NonFiniteInput("recent sales"));
    }
    Ok(())
}

/// Uncertainty band around a point forecast; collapses without a usable MAE.
pub fn uncertainty_band(combined: f64, historical_mae: Option<f64>) -> (f64, f64) {
    match historical_mae.filter(|mae| mae.is_finite() && *mae > 0.0) {
        Some(mae) => ((combined - mae).max(0.0), combined + mae),
        None => (combined, combined),
    }
}

pub struct RecursiveForecaster<'a> {
    pub trend: &'a TrendModel,
    pub ensemble: &'a TreeEnsemble,
    pub layout: &'a FeatureLayout,
    pub calendar: &'a HolidayCalendar,
    pub historical_mae: Option<f64>,
    pub with_attribution: bool,
}

impl<'a> RecursiveForecaster<'a> {
    /// Forecasts `horizon` days from `start`. `sales_history` is extended
    /// with one combined prediction per day.
    pub fn run(
        &self,
        start: NaiveDate,
        horizon: usize,
        weather: &FutureWeather,
        sales_history: &mut Vec<f64>,
    ) -> Vec<ForecastPoint> {
        let mut points = Vec::with_capacity(horizon);
        for step in 0..horizon {
            let date = start + Duration::days(step as i64);
            let day_weather = weather.resolve(date);
            let is_holiday = self.calendar.is_holiday(date);
            let trend_prediction = self.trend.predict_one(&TrendInput {
                date,
                is_holiday,
                weather: day_weather,
            });

            let residual_features = self.layout.history_features(sales_history);
            let (combined, attribution) = match residual_features {
                Some(history) => {
                    let features = self.layout.assemble(date, is_holiday, &day_weather, &history, trend_prediction);
                    let residual = self.ensemble.predict(&features);
                    let attribution = self
                        .with_attribution
                        .then(|| self.attribute(&features, trend_prediction));
                    ((trend_prediction + residual).max(0.0), attribution)
                }
                None => (trend_prediction.max(0.0), None),
            };
            let (lower_bound, upper_bound) = uncertainty_band(combined, self.historical_mae);

            points.push(ForecastPoint {
                date,
                trend_prediction,
                combined_prediction: combined,
                lower_bound,
                upper_bound,
                attribution,
            });
            sales_history.push(combined);
        }
        points
    }

    fn attribute(&self, features: &[f64], trend_prediction: f64) -> Attribution {
        let (bias, contributions) = match self.ensemble.contributions(features) {
            Ok(parts) => parts,
            Err(error) => {
                debug!("Attribution unavailable: {:#}", error);
                return Attribution::default();
            }
        };
        let mut attribution = Attribution {
            trend_prediction,
            residual_base: bias,
            ..Attribution::default()
        };
        for (group, value) in self.layout.feature_groups().into_iter().zip(contributions) {
            match group {
                FeatureGroup::Seasonality => attribution.seasonality += value,
                FeatureGroup::Holiday => attribution.holiday += value,
                FeatureGroup::Weather => attribution.weather += value,
                FeatureGroup::LagsTrend => attribution.lags_trend += value,
            }
        }
        attribution
    }
}

/// Flat forecast for dishes served by the historical average.
pub fn average_forecast(mean: f64, start: NaiveDate, horizon: usize) -> Vec<ForecastPoint> {
    let value = mean.max(0.0);
    (0..horizon)
        .map(|step| ForecastPoint {
            date: start + Duration::days(step as i64),
            trend_prediction: value,
            combined_prediction: value,
            lower_bound: value,
            upper_bound: value,
            attribution: None,
        })
        .collect()
}
