//! Trend and seasonality model fitted per dish (and per fold).
//!
//! The model is a piecewise-linear trend with automatically placed
//! changepoints, Fourier terms for weekly (and optionally yearly)
//! seasonality, a holiday indicator, and the weather columns as standardised
//! linear regressors. Coefficients are the MAP estimate under Gaussian priors
//! whose widths come from the configured prior scales, which reduces to a
//! ridge problem solved exactly by Gaussian elimination.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::{SeasonalityMode, TrendParams};
use crate::models::{WeatherValues, WEATHER_FIELD_COUNT};

const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const YEARLY_PERIOD_DAYS: f64 = 365.25;
// Residual variance assumed on the max-scaled target; sets prior strength.
const NOISE_VARIANCE: f64 = 0.01;
const UNPENALISED: f64 = 1e-8;
const PIVOT_TOLERANCE: f64 = 1e-14;
const MIN_REGRESSOR_STD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendInput {
    pub date: NaiveDate,
    pub is_holiday: bool,
    pub weather: WeatherValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    params: TrendParams,
    origin: NaiveDate,
    time_scale: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    use_holidays: bool,
    regressor_means: [f64; WEATHER_FIELD_COUNT],
    regressor_stds: [f64; WEATHER_FIELD_COUNT],
    trend_coefficients: Vec<f64>,
    component_coefficients: Vec<f64>,
}

impl TrendModel {
    /// Fits the model on rows sorted by date. Fails on empty or non-finite
    /// input and on a singular system; none of these are retryable.
    pub fn fit(rows: &[TrendInput], targets: &[f64], params: &TrendParams) -> Result<Self> {
        if rows.is_empty() {
            return Err(anyhow!("trend model needs at least one training row"));
        }
        if rows.len() != targets.len() {
            return Err(anyhow!(
                "trend model input mismatch: {} rows but {} targets",
                rows.len(),
                targets.len()
            ));
        }
        if targets.iter().any(|value| !value.is_finite()) {
            return Err(anyhow!("trend model targets must be finite"));
        }
        if rows
            .iter()
            .any(|row| row.weather.as_array().iter().any(|value| !value.is_finite()))
        {
            return Err(anyhow!("trend model regressors must be finite"));
        }

        let origin = rows.iter().map(|row| row.date).min().unwrap_or(rows[0].date);
        let last = rows.iter().map(|row| row.date).max().unwrap_or(rows[0].date);
        let span = (last - origin).num_days() as f64;
        let time_scale = if span > 0.0 { span } else { 1.0 };

        let y_scale = targets.iter().fold(0.0f64, |acc, value| acc.max(value.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let scaled: Vec<f64> = targets.iter().map(|value| value / y_scale).collect();

        let (regressor_means, regressor_stds) = regressor_moments(rows);

        let mut model = Self {
            params: params.clone(),
            origin,
            time_scale,
            y_scale,
            changepoints: Vec::new(),
            use_holidays: rows.iter().any(|row| row.is_holiday),
            regressor_means,
            regressor_stds,
            trend_coefficients: Vec::new(),
            component_coefficients: Vec::new(),
        };
        let times: Vec<f64> = rows.iter().map(|row| model.scaled_time(row.date)).collect();
        model.changepoints = select_changepoints(&times, params.n_changepoints, params.changepoint_range);

        let trend_design: Vec<Vec<f64>> = times.iter().map(|t| model.trend_row(*t)).collect();
        let component_design: Vec<Vec<f64>> = rows.iter().map(|row| model.component_row(row)).collect();
        let trend_penalties = model.trend_penalties();
        let component_penalties = model.component_penalties();

        match params.seasonality_mode {
            SeasonalityMode::Additive => {
                let design: Vec<Vec<f64>> = trend_design
                    .iter()
                    .zip(component_design.iter())
                    .map(|(trend, component)| trend.iter().chain(component.iter()).copied().collect())
                    .collect();
                let penalties: Vec<f64> = trend_penalties
                    .iter()
                    .chain(component_penalties.iter())
                    .copied()
                    .collect();
                let coefficients = ridge_solve(&design, &scaled, &penalties)?;
                let split = trend_penalties.len();
                model.trend_coefficients = coefficients[..split].to_vec();
                model.component_coefficients = coefficients[split..].to_vec();
            }
            SeasonalityMode::Multiplicative => {
                model.trend_coefficients = ridge_solve(&trend_design, &scaled, &trend_penalties)?;
                let mut relative_design = Vec::with_capacity(rows.len());
                let mut relative_targets = Vec::with_capacity(rows.len());
                for ((trend_row, component), target) in trend_design
                    .iter()
                    .zip(component_design.iter())
                    .zip(scaled.iter())
                {
                    let trend = dot(trend_row, &model.trend_coefficients);
                    if trend.abs() > 1e-9 {
                        relative_design.push(component.clone());
                        relative_targets.push(target / trend - 1.0);
                    }
                }
                model.component_coefficients = if relative_design.is_empty() {
                    vec![0.0; component_penalties.len()]
                } else {
                    ridge_solve(&relative_design, &relative_targets, &component_penalties)?
                };
            }
        }

        Ok(model)
    }

    pub fn predict(&self, rows: &[TrendInput]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_one(row)).collect()
    }

    pub fn predict_one(&self, row: &TrendInput) -> f64 {
        let trend = dot(&self.trend_row(self.scaled_time(row.date)), &self.trend_coefficients);
        let component = dot(&self.component_row(row), &self.component_coefficients);
        let scaled = match self.params.seasonality_mode {
            SeasonalityMode::Additive => trend + component,
            SeasonalityMode::Multiplicative => trend * (1.0 + component),
        };
        scaled * self.y_scale
    }

    /// Training-period mean of each weather column.
    pub fn regressor_means(&self) -> WeatherValues {
        WeatherValues::from_array(self.regressor_means)
    }

    pub fn changepoint_count(&self) -> usize {
        self.changepoints.len()
    }

    pub fn params(&self) -> &TrendParams {
        &self.params
    }

    fn scaled_time(&self, date: NaiveDate) -> f64 {
        (date - self.origin).num_days() as f64 / self.time_scale
    }

    fn trend_row(&self, t: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(2 + self.changepoints.len());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|c| (t - c).max(0.0)));
        row
    }

    fn trend_penalties(&self) -> Vec<f64> {
        let mut penalties = vec![UNPENALISED, UNPENALISED];
        let delta = prior_penalty(self.params.changepoint_prior_scale);
        penalties.extend(std::iter::repeat(delta).take(self.changepoints.len()));
        penalties
    }

    fn component_row(&self, row: &TrendInput) -> Vec<f64> {
        let epoch_days = (row.date - epoch()).num_days() as f64;
        let mut values = Vec::new();
        if self.params.weekly_seasonality {
            values.extend(fourier_terms(epoch_days, WEEKLY_PERIOD_DAYS, self.params.weekly_fourier_order));
        }
        if self.params.yearly_seasonality {
            values.extend(fourier_terms(epoch_days, YEARLY_PERIOD_DAYS, self.params.yearly_fourier_order));
        }
        if self.use_holidays {
            values.push(if row.is_holiday { 1.0 } else { 0.0 });
        }
        for ((value, mean), std) in row
            .weather
            .as_array()
            .iter()
            .zip(self.regressor_means.iter())
            .zip(self.regressor_stds.iter())
        {
            values.push(if *std > MIN_REGRESSOR_STD { (value - mean) / std } else { 0.0 });
        }
        values
    }

    fn component_penalties(&self) -> Vec<f64> {
        let mut penalties = Vec::new();
        let seasonal = prior_penalty(self.params.seasonality_prior_scale);
        if self.params.weekly_seasonality {
            penalties.extend(std::iter::repeat(seasonal).take(2 * self.params.weekly_fourier_order));
        }
        if self.params.yearly_seasonality {
            penalties.extend(std::iter::repeat(seasonal).take(2 * self.params.yearly_fourier_order));
        }
        if self.use_holidays {
            penalties.push(prior_penalty(self.params.holidays_prior_scale));
        }
        penalties.extend(std::iter::repeat(prior_penalty(self.params.regressor_prior_scale)).take(WEATHER_FIELD_COUNT));
        penalties
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn prior_penalty(scale: f64) -> f64 {
    if scale > 0.0 {
        NOISE_VARIANCE / (scale * scale)
    } else {
        1.0 / UNPENALISED
    }
}

fn fourier_terms(days: f64, period: f64, order: usize) -> Vec<f64> {
    let mut terms = Vec::with_capacity(2 * order);
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * days / period;
        terms.push(angle.sin());
        terms.push(angle.cos());
    }
    terms
}

/// Changepoints at evenly spaced rows within the first `range` of history,
/// excluding the first row.
fn select_changepoints(times: &[f64], requested: usize, range: f64) -> Vec<f64> {
    let history = ((times.len() as f64) * range.clamp(0.0, 1.0)).floor() as usize;
    if history < 2 || requested == 0 {
        return Vec::new();
    }
    let count = requested.min(history - 1);
    let mut points: Vec<f64> = (1..=count)
        .map(|i| {
            let index = ((i as f64) * (history - 1) as f64 / count as f64).round() as usize;
            times[index.min(times.len() - 1)]
        })
        .collect();
    points.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    points
}

fn regressor_moments(rows: &[TrendInput]) -> ([f64; WEATHER_FIELD_COUNT], [f64; WEATHER_FIELD_COUNT]) {
    let n = rows.len() as f64;
    let mut means = [0.0; WEATHER_FIELD_COUNT];
    for row in rows {
        for (mean, value) in means.iter_mut().zip(row.weather.as_array()) {
            *mean += value / n;
        }
    }
    let mut stds = [0.0; WEATHER_FIELD_COUNT];
    for row in rows {
        for ((std, value), mean) in stds.iter_mut().zip(row.weather.as_array()).zip(means.iter()) {
            *std += (value - mean).powi(2) / n;
        }
    }
    (means, stds.map(f64::sqrt))
}

fn dot(left: &[f64], right: &[f64]) -> f64 {
    left.iter().zip(right.iter()).map(|(a, b)| a * b).sum()
}

/// Solves `(XᵀX + diag(penalties)) β = Xᵀy`.
fn ridge_solve(design: &[Vec<f64>], targets: &[f64], penalties: &[f64]) -> Result<Vec<f64>> {
    let p = penalties.len();
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, target) in design.iter().zip(targets.iter()) {
        for a in 0..p {
            let xa = row[a];
            if xa == 0.0 {
                continue;
            }
            xty[a] += xa * target;
            for b in 0..p {
                xtx[a][b] += xa * row[b];
            }
        }
    }
    for (d, penalty) in penalties.iter().enumerate() {
        xtx[d][d] += penalty;
    }

    let mut a = xtx;
    let mut b = xty;
    for i in 0..p {
        let mut pivot_row = i;
        let mut pivot_value = a[i][i].abs();
        for r in (i + 1)..p {
            if a[r][i].abs() > pivot_value {
                pivot_value = a[r][i].abs();
                pivot_row = r;
            }
        }
        if pivot_value < PIVOT_TOLERANCE {
            return Err(anyhow!("trend model system is singular at column {}", i));
        }
        if pivot_row != i {
            a.swap(i, pivot_row);
            b.swap(i, pivot_row);
        }
        let inverse = 1.0 / a[i][i];
        for j in i..p {
            a[i][j] *= inverse;
        }
        b[i] *= inverse;
        for r in 0..p {
            if r == i {
                continue;
            }
            let factor = a[r][i];
            if factor == 0.0 {
                continue;
            }
            for j in i..p {
                a[r][j] -= factor * a[i][j];
            }
            b[r] -= factor * b[i];
        }
    }
    if b.iter().any(|value| !value.is_finite()) {
        return Err(anyhow!("trend model solve produced non-finite coefficients"));
    }
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn inputs(days: usize) -> Vec<TrendInput> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|offset| TrendInput {
                date: start + Duration::days(offset as i64),
                is_holiday: false,
                weather: WeatherValues::default(),
            })
            .collect()
    }

    fn mae(left: &[f64], right: &[f64]) -> f64 {
        left.iter().zip(right).map(|(a, b)| (a - b).abs()).sum::<f64>() / left.len() as f64
    }

    #[test]
    fn constant_series_is_reproduced() {
        let rows = inputs(95);
        let targets = vec![10.0; rows.len()];
        let model = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
        for value in model.predict(&rows) {
            assert!((value - 10.0).abs() < 1e-6, "got {}", value);
        }
    }

    #[test]
    fn weekly_pattern_is_learned() {
        let rows = inputs(84);
        let targets: Vec<f64> = rows
            .iter()
            .map(|row| if (row.date - epoch()).num_days() % 7 == 0 { 30.0 } else { 10.0 })
            .collect();
        let model = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
        let predictions = model.predict(&rows);
        assert!(mae(&predictions, &targets) < 1.0);
    }

    #[test]
    fn linear_growth_extrapolates() {
        let rows = inputs(60);
        let targets: Vec<f64> = (0..60).map(|i| 5.0 + 0.5 * i as f64).collect();
        let model = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
        let future = inputs(70);
        let prediction = model.predict_one(&future[69]);
        assert!((prediction - (5.0 + 0.5 * 69.0)).abs() < 2.0, "got {}", prediction);
    }

    #[test]
    fn weather_regressor_is_used() {
        let mut rows = inputs(90);
        for (index, row) in rows.iter_mut().enumerate() {
            row.weather.temperature_max = if index % 3 == 0 { 30.0 } else { 15.0 };
        }
        let targets: Vec<f64> = rows.iter().map(|row| 2.0 * row.weather.temperature_max).collect();
        let model = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
        assert!(mae(&model.predict(&rows), &targets) < 1.0);
        assert!((model.regressor_means().temperature_max - 20.0).abs() < 1e-9);
    }

    #[test]
    fn multiplicative_mode_fits_scaled_season() {
        let rows = inputs(84);
        let targets: Vec<f64> = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let level = 10.0 + 0.1 * index as f64;
                if (row.date - epoch()).num_days() % 7 == 3 {
                    level * 1.5
                } else {
                    level
                }
            })
            .collect();
        let params = TrendParams {
            seasonality_mode: SeasonalityMode::Multiplicative,
            ..TrendParams::default()
        };
        let model = TrendModel::fit(&rows, &targets, &params).unwrap();
        assert!(mae(&model.predict(&rows), &targets) < 1.5);
    }

    #[test]
    fn single_row_fit_is_stable() {
        let rows = inputs(1);
        let model = TrendModel::fit(&rows, &[7.0], &TrendParams::default()).unwrap();
        assert_eq!(model.changepoint_count(), 0);
        assert!((model.predict_one(&rows[0]) - 7.0).abs() < 1e-3);
    }

    #[test]
    fn invalid_input_fails_hard() {
        let rows = inputs(3);
        assert!(TrendModel::fit(&[], &[], &TrendParams::default()).is_err());
        assert!(TrendModel::fit(&rows, &[1.0, 2.0], &TrendParams::default()).is_err());
        assert!(TrendModel::fit(&rows, &[1.0, f64::NAN, 2.0], &TrendParams::default()).is_err());
    }

    #[test]
    fn serialized_model_predicts_identically() {
        let rows = inputs(40);
        let targets: Vec<f64> = (0..40).map(|i| 8.0 + (i % 5) as f64).collect();
        let model = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
        let bytes = bincode::serialize(&model).unwrap();
        let restored: TrendModel = bincode::deserialize(&bytes).unwrap();
        assert_eq!(model, restored);
        assert_eq!(model.predict(&rows), restored.predict(&rows));
    }

    #[test]
    fn changepoints_stay_in_leading_range() {
        let times: Vec<f64> = (0..100).map(|i| i as f64 / 99.0).collect();
        let points = select_changepoints(&times, 25, 0.8);
        assert_eq!(points.len(), 25);
        assert!(points.iter().all(|t| *t > 0.0 && *t <= 0.8));
    }
}
