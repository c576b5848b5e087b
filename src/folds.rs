//! Expanding-window cross-validation folds.
//!
//! Every fold splits the raw history first and sanitizes each side on its
//! own, so no interpolated or filled value in the training window can be
//! derived from the test window.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use log::debug;

use crate::booster::{BinnedMatrix, TrainingSet, MAX_BINS};
use crate::config::{PipelineConfig, TrendParams};
use crate::features::{sanitize_slice, FeatureLayout, SanitizedDay};
use crate::holidays::HolidayCalendar;
use crate::models::{DishHistory, RawDay};
use crate::trend::{TrendInput, TrendModel};

/// Feature rows with their residual targets, aligned index by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualDataset {
    pub dates: Vec<NaiveDate>,
    pub features: Vec<Vec<f64>>,
    pub residuals: Vec<f64>,
    pub trend: Vec<f64>,
    pub actuals: Vec<f64>,
}

impl ResidualDataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Rows of `days[range]` that have a complete feature vector. `trend` is
    /// aligned with `range`.
    pub fn from_days(
        days: &[SanitizedDay],
        range: std::ops::Range<usize>,
        trend: &[f64],
        calendar: &HolidayCalendar,
        layout: &FeatureLayout,
    ) -> Self {
        let rows = layout.feature_rows(days, range.clone(), calendar, trend);
        let mut dataset = Self::default();
        for ((index, row), trend_value) in range.zip(rows).zip(trend) {
            let Some(features) = row else {
                continue;
            };
            let day = &days[index];
            dataset.dates.push(day.date);
            dataset.features.push(features);
            dataset.residuals.push(day.quantity - trend_value);
            dataset.trend.push(*trend_value);
            dataset.actuals.push(day.quantity);
        }
        dataset
    }
}

/// One cached train/test split, ready for repeated model fits.
#[derive(Debug)]
pub struct FoldCache {
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub train: ResidualDataset,
    pub test: ResidualDataset,
    pub bins: BinnedMatrix,
}

impl FoldCache {
    pub fn training_set(&self) -> Result<TrainingSet<'_>> {
        TrainingSet::new(&self.train.features, &self.train.residuals, &self.bins)
    }
}

pub fn trend_inputs(days: &[SanitizedDay], calendar: &HolidayCalendar) -> Vec<TrendInput> {
    days.iter()
        .map(|day| TrendInput {
            date: day.date,
            is_holiday: calendar.is_holiday(day.date),
            weather: day.weather,
        })
        .collect()
}

/// Fits the trend model on `days` and returns it with its in-sample predictions.
pub fn fit_trend(
    days: &[SanitizedDay],
    calendar: &HolidayCalendar,
    params: &TrendParams,
) -> Result<(TrendModel, Vec<f64>)> {
    let inputs = trend_inputs(days, calendar);
    let targets: Vec<f64> = days.iter().map(|day| day.quantity).collect();
    let model = TrendModel::fit(&inputs, &targets, params)?;
    let predictions = model.predict(&inputs);
    Ok((model, predictions))
}

/// Days strictly between `last` and `next`, each repeating `last`. Only the
/// training side is read, so the bridge carries no test-window values.
fn bridge_days(last: &SanitizedDay, next: NaiveDate) -> Vec<SanitizedDay> {
    let missing = (next - last.date).num_days() - 1;
    (1..=missing)
        .map(|offset| SanitizedDay {
            date: last.date + Duration::days(offset),
            ..*last
        })
        .collect()
}

/// Builds up to `n_cv_folds` folds, oldest test window first. Folds with a
/// short training span, an empty test window or empty feature matrices are
/// skipped.
pub fn build_folds(
    history: &DishHistory,
    calendar: &HolidayCalendar,
    layout: &FeatureLayout,
    config: &PipelineConfig,
) -> Result<Vec<FoldCache>> {
    let Some(end_date) = history.last_date() else {
        return Ok(Vec::new());
    };
    let window = config.test_window_days as i64;
    let mut folds = Vec::new();

    for i in (1..=config.n_cv_folds as i64).rev() {
        let test_end = end_date - Duration::days(window * (i - 1));
        let test_start = test_end - Duration::days(window);

        let train_raw: Vec<RawDay> = history.days.iter().filter(|day| day.date < test_start).cloned().collect();
        let test_raw: Vec<RawDay> = history
            .days
            .iter()
            .filter(|day| day.date >= test_start && day.date < test_end)
            .cloned()
            .collect();

        let train_span = match (train_raw.first(), train_raw.last()) {
            (Some(first), Some(last)) => (last.date - first.date).num_days() + 1,
            _ => 0,
        };
        if train_span < config.min_train_days as i64 || test_raw.is_empty() {
            debug!(
                "{}: skipping fold {}..{} (train span {} days, {} test rows)",
                history.dish,
                test_start,
                test_end,
                train_span,
                test_raw.len()
            );
            continue;
        }

        let train_days = sanitize_slice(&train_raw);
        let test_days = sanitize_slice(&test_raw);
        if train_days.len() < config.min_train_days {
            debug!("{}: skipping fold {}..{} after sanitation", history.dish, test_start, test_end);
            continue;
        }

        let (trend_model, trend_train) = fit_trend(&train_days, calendar, &config.trend)
            .with_context(|| format!("Failed to fit trend for fold ending {}", test_end))?;
        let trend_test = trend_model.predict(&trend_inputs(&test_days, calendar));

        let train = ResidualDataset::from_days(&train_days, 0..train_days.len(), &trend_train, calendar, layout);

        // Test lags may read the past actuals of the training window. Lags are
        // positional, so missing days between the two slices are bridged first.
        let bridge = match (train_days.last(), test_days.first()) {
            (Some(last), Some(first)) => bridge_days(last, first.date),
            _ => Vec::new(),
        };
        let scored_from = train_days.len() + bridge.len();
        let mut joined = train_days;
        joined.extend(bridge);
        joined.extend(test_days);
        let test = ResidualDataset::from_days(&joined, scored_from..joined.len(), &trend_test, calendar, layout);

        if train.is_empty() || test.is_empty() {
            debug!("{}: fold {}..{} has an empty feature matrix", history.dish, test_start, test_end);
            continue;
        }

        let bins = BinnedMatrix::from_rows(&train.features, MAX_BINS)
            .with_context(|| format!("Failed to bin training features for fold ending {}", test_end))?;
        folds.push(FoldCache {
            test_start,
            test_end,
            train,
            test,
            bins,
        });
    }

    Ok(folds)
}
