use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WEATHER_FIELD_COUNT: usize = 4;

/// Daily weather variables, in feature order.
pub const WEATHER_FIELDS: [&str; WEATHER_FIELD_COUNT] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "relative_humidity_2m_mean",
    "precipitation_sum",
];

/// One day of weather as delivered by a source; any field may be absent.
pub type WeatherReading = [Option<f64>; WEATHER_FIELD_COUNT];

/// Date-keyed weather readings.
pub type WeatherTable = BTreeMap<NaiveDate, WeatherReading>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherValues {
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub humidity_mean: f64,
    pub precipitation_sum: f64,
}

impl WeatherValues {
    pub fn from_array(values: [f64; WEATHER_FIELD_COUNT]) -> Self {
        Self {
            temperature_max: values[0],
            temperature_min: values[1],
            humidity_mean: values[2],
            precipitation_sum: values[3],
        }
    }

    pub fn as_array(&self) -> [f64; WEATHER_FIELD_COUNT] {
        [
            self.temperature_max,
            self.temperature_min,
            self.humidity_mean,
            self.precipitation_sum,
        ]
    }

    /// Column-wise mean, or `None` for an empty slice.
    pub fn mean_of<'a, I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a WeatherValues>,
    {
        let mut sums = [0.0; WEATHER_FIELD_COUNT];
        let mut count = 0usize;
        for value in values {
            for (sum, field) in sums.iter_mut().zip(value.as_array()) {
                *sum += field;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Self::from_array(sums.map(|sum| sum / count as f64)))
    }

    /// Values used when a forecast weather source is unreachable.
    pub fn mild_default() -> Self {
        Self {
            temperature_max: 20.0,
            temperature_min: 20.0,
            humidity_mean: 60.0,
            precipitation_sum: 0.0,
        }
    }
}

/// A single sales row from the source, before aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub dish: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySale {
    pub date: NaiveDate,
    pub quantity: f64,
}

/// An observed day for one dish, prior to sanitation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDay {
    pub date: NaiveDate,
    pub quantity: Option<f64>,
    pub weather: WeatherReading,
}

/// A dish's observed history joined with weather, ordered by date.
#[derive(Debug, Clone)]
pub struct DishHistory {
    pub dish: String,
    pub days: Vec<RawDay>,
}

impl DishHistory {
    /// Builds a history from aggregated sales, attaching whatever weather the
    /// table holds for each date.
    pub fn from_sales(dish: &str, sales: &[DailySale], weather: &WeatherTable) -> Self {
        let mut days: Vec<RawDay> = sales
            .iter()
            .map(|sale| RawDay {
                date: sale.date,
                quantity: Some(sale.quantity),
                weather: weather
                    .get(&sale.date)
                    .copied()
                    .unwrap_or([None; WEATHER_FIELD_COUNT]),
            })
            .collect();
        days.sort_by_key(|day| day.date);
        days.dedup_by_key(|day| day.date);
        Self {
            dish: dish.to_string(),
            days,
        }
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.days.first().map(|day| day.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|day| day.date)
    }

    /// Days between the first and last observation (0 for a single day).
    pub fn span_days(&self) -> i64 {
        match (self.first_date(), self.last_date()) {
            (Some(first), Some(last)) => (last - first).num_days(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
    /// False when the fallback location was used.
    pub resolved: bool,
}

/// Residual prediction split into feature groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub trend_prediction: f64,
    pub seasonality: f64,
    pub holiday: f64,
    pub weather: f64,
    pub lags_trend: f64,
    pub residual_base: f64,
}

impl Attribution {
    pub fn residual_total(&self) -> f64 {
        self.seasonality + self.holiday + self.weather + self.lags_trend + self.residual_base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub trend_prediction: f64,
    pub combined_prediction: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub attribution: Option<Attribution>,
}
