use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::PipelineConfig;
use crate::holidays::HolidayCalendar;
use crate::models::{RawDay, WeatherValues, WEATHER_FIELDS, WEATHER_FIELD_COUNT};

pub const CALENDAR_FEATURES: [&str; 5] = ["day_of_week", "month", "day", "day_of_year", "is_weekend"];
pub const HOLIDAY_FEATURE: &str = "is_public_holiday";
pub const TREND_FEATURE: &str = "trend_prediction";

/// A gap-free day of a dish's series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanitizedDay {
    pub date: NaiveDate,
    pub quantity: f64,
    pub weather: WeatherValues,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarFeatures {
    pub day_of_week: u32,
    pub month: u32,
    pub day: u32,
    pub day_of_year: u32,
    pub is_weekend: bool,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            day_of_week: date.weekday().num_days_from_monday(),
            month: date.month(),
            day: date.day(),
            day_of_year: date.ordinal(),
            is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.day_of_week as f64,
            self.month as f64,
            self.day as f64,
            self.day_of_year as f64,
            if self.is_weekend { 1.0 } else { 0.0 },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureGroup {
    Seasonality,
    Holiday,
    Weather,
    LagsTrend,
}

impl FeatureGroup {
    pub fn label(self) -> &'static str {
        match self {
            Self::Seasonality => "Seasonality",
            Self::Holiday => "Holiday",
            Self::Weather => "Weather",
            Self::LagsTrend => "Lags/Trend",
        }
    }
}

/// Which lag offsets and rolling windows make up the history part of a
/// feature vector. Stored with every trained model so inference rebuilds the
/// exact vector the tree was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub lags: Vec<usize>,
    pub roll_windows: Vec<usize>,
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self {
            lags: vec![1, 7, 14],
            roll_windows: vec![7, 14, 28],
        }
    }
}

impl FeatureLayout {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            lags: config.lags.clone(),
            roll_windows: config.roll_windows.clone(),
        }
    }

    pub fn history_feature_count(&self) -> usize {
        self.lags.len() + 2 * self.roll_windows.len()
    }

    pub fn feature_count(&self) -> usize {
        CALENDAR_FEATURES.len() + 1 + WEATHER_FIELD_COUNT + self.history_feature_count() + 1
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = CALENDAR_FEATURES.iter().map(|name| name.to_string()).collect();
        names.push(HOLIDAY_FEATURE.to_string());
        names.extend(WEATHER_FIELDS.iter().map(|name| name.to_string()));
        names.extend(self.lags.iter().map(|lag| format!("y_lag_{}", lag)));
        for window in &self.roll_windows {
            names.push(format!("y_roll_mean_{}", window));
            names.push(format!("y_roll_std_{}", window));
        }
        names.push(TREND_FEATURE.to_string());
        names
    }

    pub fn feature_groups(&self) -> Vec<FeatureGroup> {
        let mut groups = vec![FeatureGroup::Seasonality; CALENDAR_FEATURES.len()];
        groups.push(FeatureGroup::Holiday);
        groups.extend([FeatureGroup::Weather; WEATHER_FIELD_COUNT]);
        groups.extend(std::iter::repeat(FeatureGroup::LagsTrend).take(self.history_feature_count() + 1));
        groups
    }

    /// Lag and rolling-window features from the values strictly before the
    /// day being described. `None` when there is no prior value at all.
    ///
    /// A lag longer than the available history takes the most recent value.
    /// Rolling windows use up to `window` prior values; the standard
    /// deviation (ddof = 1) is 0 with fewer than two.
    pub fn history_features(&self, prior: &[f64]) -> Option<Vec<f64>> {
        let last = *prior.last()?;
        let len = prior.len();
        let mut features = Vec::with_capacity(self.history_feature_count());
        for &lag in &self.lags {
            let value = if len >= lag { prior[len - lag] } else { last };
            features.push(value);
        }
        for &window in &self.roll_windows {
            let slice = &prior[len.saturating_sub(window)..];
            let (mean, std) = mean_and_std(slice);
            features.push(mean);
            features.push(std);
        }
        Some(features)
    }

    /// Full feature vector in layout order.
    pub fn assemble(
        &self,
        date: NaiveDate,
        is_holiday: bool,
        weather: &WeatherValues,
        history: &[f64],
        trend_prediction: f64,
    ) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.feature_count());
        features.extend(CalendarFeatures::from_date(date).as_array());
        features.push(if is_holiday { 1.0 } else { 0.0 });
        features.extend(weather.as_array());
        features.extend_from_slice(history);
        features.push(trend_prediction);
        features
    }

    /// Feature vectors for `days[range]`. History features of day `i` read
    /// `days[..i]` only; rows without any prior day come back as `None`.
    /// `trend` is aligned with `range`.
    pub fn feature_rows(
        &self,
        days: &[SanitizedDay],
        range: Range<usize>,
        calendar: &HolidayCalendar,
        trend: &[f64],
    ) -> Vec<Option<Vec<f64>>> {
        let quantities: Vec<f64> = days.iter().map(|day| day.quantity).collect();
        range
            .zip(trend.iter())
            .map(|(index, trend_value)| {
                let day = days.get(index)?;
                let history = self.history_features(&quantities[..index])?;
                if !trend_value.is_finite() {
                    return None;
                }
                Some(self.assemble(
                    day.date,
                    calendar.is_holiday(day.date),
                    &day.weather,
                    &history,
                    *trend_value,
                ))
            })
            .collect()
    }
}

pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Reindexes a slice of observed days onto a gap-free daily grid.
///
/// Sales gaps are linearly interpolated in time, carried forward past the last
/// observation and zero before the first. Weather gaps are interpolated, then
/// back- and forward-filled, then zero when a field was never observed.
/// Only values inside `days` are read, so sanitizing a train slice never sees
/// the test window.
pub fn sanitize_slice(days: &[RawDay]) -> Vec<SanitizedDay> {
    let by_date: BTreeMap<NaiveDate, &RawDay> = days.iter().map(|day| (day.date, day)).collect();
    let (Some(first), Some(last)) = (
        by_date.keys().next().copied(),
        by_date.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let len = (last - first).num_days() as usize + 1;
    let mut quantities: Vec<Option<f64>> = vec![None; len];
    let mut weather_columns: Vec<Vec<Option<f64>>> = vec![vec![None; len]; WEATHER_FIELD_COUNT];
    for (date, day) in &by_date {
        let index = (*date - first).num_days() as usize;
        quantities[index] = day.quantity.filter(|value| value.is_finite());
        for (column, value) in weather_columns.iter_mut().zip(day.weather.iter()) {
            column[index] = value.filter(|value| value.is_finite());
        }
    }

    interpolate_gaps(&mut quantities);
    for column in weather_columns.iter_mut() {
        interpolate_gaps(column);
        backfill_leading(column);
    }

    (0..len)
        .map(|index| {
            let mut weather = [0.0; WEATHER_FIELD_COUNT];
            for (slot, column) in weather.iter_mut().zip(weather_columns.iter()) {
                *slot = column[index].unwrap_or(0.0);
            }
            SanitizedDay {
                date: first + chrono::Duration::days(index as i64),
                quantity: quantities[index].unwrap_or(0.0),
                weather: WeatherValues::from_array(weather),
            }
        })
        .collect()
}

/// Linear interpolation between known values, then the last known value is
/// carried to the end. Leading gaps are left untouched.
pub fn interpolate_gaps(values: &mut [Option<f64>]) {
    let known: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| value.map(|_| index))
        .collect();
    let Some(&last_known) = known.last() else {
        return;
    };

    for pair in known.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right - left < 2 {
            continue;
        }
        let (Some(left_value), Some(right_value)) = (values[left], values[right]) else {
            continue;
        };
        let step = (right_value - left_value) / (right - left) as f64;
        for index in left + 1..right {
            values[index] = Some(left_value + step * (index - left) as f64);
        }
    }

    let tail = values[last_known];
    for value in values.iter_mut().skip(last_known + 1) {
        *value = tail;
    }
}

fn backfill_leading(values: &mut [Option<f64>]) {
    let Some(first_known) = values.iter().position(Option::is_some) else {
        return;
    };
    let head = values[first_known];
    for value in values.iter_mut().take(first_known) {
        *value = head;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeatherReading;

    fn date(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn raw(offset: i64, quantity: Option<f64>, weather: WeatherReading) -> RawDay {
        RawDay {
            date: date(offset),
            quantity,
            weather,
        }
    }

    fn sanitized(values: &[f64]) -> Vec<SanitizedDay> {
        values
            .iter()
            .enumerate()
            .map(|(index, quantity)| SanitizedDay {
                date: date(index as i64),
                quantity: *quantity,
                weather: WeatherValues::default(),
            })
            .collect()
    }

    #[test]
    fn single_value_history_falls_back_for_long_lags() {
        let layout = FeatureLayout::default();
        let features = layout.history_features(&[5.0]).unwrap();
        assert_eq!(&features[..3], &[5.0, 5.0, 5.0]);
        // Means are 5, stds need two observations.
        assert_eq!(&features[3..], &[5.0, 0.0, 5.0, 0.0, 5.0, 0.0]);
    }

    #[test]
    fn empty_history_has_no_features() {
        assert!(FeatureLayout::default().history_features(&[]).is_none());
    }

    #[test]
    fn lags_read_exact_offsets() {
        let layout = FeatureLayout {
            lags: vec![1, 3],
            roll_windows: vec![2],
        };
        let features = layout.history_features(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(features[0], 4.0);
        assert_eq!(features[1], 2.0);
        assert!((features[2] - 3.5).abs() < 1e-12);
        assert!((features[3] - (0.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn features_never_look_ahead() {
        let layout = FeatureLayout::default();
        let base: Vec<f64> = (0..60).map(|i| 10.0 + (i % 7) as f64).collect();
        let mut perturbed = base.clone();
        let cutoff = 40;
        for value in perturbed.iter_mut().skip(cutoff) {
            *value += 1_000.0;
        }
        let calendar = HolidayCalendar::empty();
        let trend = vec![1.0; 60];
        let original = layout.feature_rows(&sanitized(&base), 0..60, &calendar, &trend);
        let shifted = layout.feature_rows(&sanitized(&perturbed), 0..60, &calendar, &trend);
        for index in 0..=cutoff {
            assert_eq!(original[index], shifted[index], "row {}", index);
        }
        assert_ne!(original[cutoff + 1], shifted[cutoff + 1]);
        assert!(original[0].is_none());
    }

    #[test]
    fn feature_names_and_groups_line_up() {
        let layout = FeatureLayout::default();
        let names = layout.feature_names();
        let groups = layout.feature_groups();
        assert_eq!(names.len(), 20);
        assert_eq!(names.len(), layout.feature_count());
        assert_eq!(groups.len(), names.len());
        assert_eq!(names[5], HOLIDAY_FEATURE);
        assert_eq!(groups[5], FeatureGroup::Holiday);
        assert_eq!(names[10], "y_lag_1");
        assert_eq!(groups[19], FeatureGroup::LagsTrend);
    }

    #[test]
    fn calendar_features_use_monday_zero() {
        // 2024-01-06 is a Saturday.
        let features = CalendarFeatures::from_date(date(5));
        assert_eq!(features.day_of_week, 5);
        assert!(features.is_weekend);
        assert_eq!(features.as_array(), [5.0, 1.0, 6.0, 6.0, 1.0]);
    }

    #[test]
    fn sanitize_fills_sales_and_weather_gaps() {
        let none = [None; WEATHER_FIELD_COUNT];
        let days = vec![
            raw(0, Some(10.0), [Some(10.0), None, None, None]),
            raw(3, Some(16.0), none),
            raw(4, None, [Some(20.0), None, None, None]),
        ];
        let clean = sanitize_slice(&days);
        assert_eq!(clean.len(), 5);
        let quantities: Vec<f64> = clean.iter().map(|day| day.quantity).collect();
        assert_eq!(quantities, vec![10.0, 12.0, 14.0, 16.0, 16.0]);
        let temps: Vec<f64> = clean.iter().map(|day| day.weather.temperature_max).collect();
        assert_eq!(temps, vec![10.0, 12.5, 15.0, 17.5, 20.0]);
        assert!(clean.iter().all(|day| day.weather.humidity_mean == 0.0));
    }

    #[test]
    fn sanitize_backfills_leading_weather_and_zeroes_leading_sales() {
        let days = vec![
            raw(0, None, [None, Some(3.0), None, None]),
            raw(1, Some(4.0), [None, Some(5.0), Some(70.0), None]),
        ];
        let clean = sanitize_slice(&days);
        assert_eq!(clean[0].quantity, 0.0);
        assert_eq!(clean[0].weather.humidity_mean, 70.0);
        assert_eq!(clean[0].weather.temperature_min, 3.0);
    }

    #[test]
    fn zero_span_slice_defaults_to_zero() {
        let days = vec![raw(0, None, [None; WEATHER_FIELD_COUNT])];
        let clean = sanitize_slice(&days);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].quantity, 0.0);
        assert_eq!(clean[0].weather, WeatherValues::default());
        assert!(sanitize_slice(&[]).is_empty());
    }

    #[test]
    fn sanitizing_a_prefix_ignores_later_days() {
        let none = [None; WEATHER_FIELD_COUNT];
        let train = vec![raw(0, Some(1.0), none), raw(2, None, none)];
        let mut full = train.clone();
        full.push(raw(4, Some(100.0), none));
        let train_clean = sanitize_slice(&train);
        // Day 2 has no sales; within the train slice it carries 1.0 forward.
        assert_eq!(train_clean[2].quantity, 1.0);
        let full_clean = sanitize_slice(&full);
        assert_ne!(full_clean[2].quantity, train_clean[2].quantity);
    }
}
