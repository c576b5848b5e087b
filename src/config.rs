use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherFailurePolicy {
    /// Abort the dish when no weather source answers.
    HardFail,
    /// Continue with empty weather; sanitation fills every field with 0.
    ZeroFill,
}

impl WeatherFailurePolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hard-fail" | "hard_fail" | "fail" => Ok(Self::HardFail),
            "zero-fill" | "zero_fill" | "zero" => Ok(Self::ZeroFill),
            other => Err(anyhow!(
                "WEATHER_FAILURE_POLICY must be hard-fail or zero-fill (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::HardFail => "hard-fail",
            Self::ZeroFill => "zero-fill",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

impl SeasonalityMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "additive" => Ok(Self::Additive),
            "multiplicative" => Ok(Self::Multiplicative),
            other => Err(anyhow!(
                "TREND_SEASONALITY_MODE must be additive or multiplicative (value: {})",
                other
            )),
        }
    }
}

/// Parameters of the trend/seasonality model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrendParams {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    pub regressor_prior_scale: f64,
    pub seasonality_mode: SeasonalityMode,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub weekly_seasonality: bool,
    pub yearly_seasonality: bool,
    pub daily_seasonality: bool,
    pub weekly_fourier_order: usize,
    pub yearly_fourier_order: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            changepoint_prior_scale: 0.5,
            seasonality_prior_scale: 10.0,
            holidays_prior_scale: 10.0,
            regressor_prior_scale: 10.0,
            seasonality_mode: SeasonalityMode::Additive,
            n_changepoints: 25,
            changepoint_range: 0.8,
            weekly_seasonality: true,
            yearly_seasonality: false,
            daily_seasonality: false,
            weekly_fourier_order: 3,
            yearly_fourier_order: 10,
        }
    }
}

/// Location used when geocoding fails.
#[derive(Debug, Clone)]
pub struct FallbackLocation {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
}

impl Default for FallbackLocation {
    fn default() -> Self {
        Self {
            address: "Shanghai, China".to_string(),
            latitude: 31.23,
            longitude: 121.47,
            country_code: "CN".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub n_cv_folds: usize,
    pub test_window_days: usize,
    pub min_train_days: usize,
    pub min_ml_days: usize,
    pub random_seed: u64,
    pub n_trials: usize,
    pub n_estimators: usize,
    pub max_workers: usize,
    pub forecast_horizon: usize,
    pub max_horizon_days: usize,
    pub recent_sales_days: usize,
    pub heartbeat_interval_secs: u64,
    pub lags: Vec<usize>,
    pub roll_windows: Vec<usize>,
    pub holiday_years: Vec<i32>,
    pub model_dir: PathBuf,
    pub weather_failure_policy: WeatherFailurePolicy,
    pub fallback_location: FallbackLocation,
    pub trend: TrendParams,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_cv_folds: 3,
            test_window_days: 30,
            min_train_days: 60,
            min_ml_days: 90,
            random_seed: 42,
            n_trials: 30,
            n_estimators: 100,
            max_workers: 4_usize.min(num_cpus::get().max(1)),
            forecast_horizon: 14,
            max_horizon_days: 30,
            recent_sales_days: 28,
            heartbeat_interval_secs: 30,
            lags: vec![1, 7, 14],
            roll_windows: vec![7, 14, 28],
            holiday_years: vec![2024, 2025, 2026],
            model_dir: PathBuf::from("models"),
            weather_failure_policy: WeatherFailurePolicy::ZeroFill,
            fallback_location: FallbackLocation::default(),
            trend: TrendParams::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Applies overrides from a settings map (usually the process environment)
    /// on top of the defaults. Absent keys keep their default.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = optional_setting_usize(settings, "N_CV_FOLDS", 1)? {
            config.n_cv_folds = value;
        }
        if let Some(value) = optional_setting_usize(settings, "TEST_WINDOW_DAYS", 1)? {
            config.test_window_days = value;
        }
        if let Some(value) = optional_setting_usize(settings, "MIN_TRAIN_DAYS", 1)? {
            config.min_train_days = value;
        }
        if let Some(value) = optional_setting_usize(settings, "MIN_ML_DAYS", 1)? {
            config.min_ml_days = value;
        }
        if let Some(value) = optional_setting_usize(settings, "RANDOM_SEED", 0)? {
            config.random_seed = value as u64;
        }
        if let Some(value) = optional_setting_usize(settings, "N_TRIALS", 1)? {
            config.n_trials = value;
        }
        if let Some(value) = optional_setting_usize(settings, "N_ESTIMATORS", 1)? {
            config.n_estimators = value;
        }
        if let Some(value) = optional_setting_usize(settings, "MAX_WORKERS", 1)? {
            config.max_workers = value;
        }
        if let Some(value) = optional_setting_usize(settings, "MAX_HORIZON_DAYS", 1)? {
            config.max_horizon_days = value;
        }
        if let Some(value) = optional_setting_usize(settings, "FORECAST_HORIZON", 1)? {
            config.forecast_horizon = value;
        }
        if let Some(value) = optional_setting_usize(settings, "RECENT_SALES_DAYS", 1)? {
            config.recent_sales_days = value;
        }
        if let Some(value) = optional_setting_usize(settings, "HEARTBEAT_INTERVAL_SECS", 1)? {
            config.heartbeat_interval_secs = value as u64;
        }
        if let Some(values) = optional_setting_usize_list(settings, "LAGS")? {
            config.lags = values;
        }
        if let Some(values) = optional_setting_usize_list(settings, "ROLL_WINDOWS")? {
            config.roll_windows = values;
        }
        if let Some(values) = optional_setting_usize_list(settings, "HOLIDAY_YEARS")? {
            config.holiday_years = values.into_iter().map(|year| year as i32).collect();
        }
        if let Some(raw) = optional_setting(settings, "MODEL_DIR") {
            config.model_dir = PathBuf::from(raw);
        }
        if let Some(raw) = optional_setting(settings, "WEATHER_FAILURE_POLICY") {
            config.weather_failure_policy = WeatherFailurePolicy::parse(raw)?;
        }
        if let Some(raw) = optional_setting(settings, "TREND_SEASONALITY_MODE") {
            config.trend.seasonality_mode = SeasonalityMode::parse(raw)?;
        }
        if let Some(value) =
            optional_setting_f64(settings, "CHANGEPOINT_PRIOR_SCALE", Some(1e-6), None)?
        {
            config.trend.changepoint_prior_scale = value;
        }
        if let Some(value) =
            optional_setting_f64(settings, "SEASONALITY_PRIOR_SCALE", Some(1e-6), None)?
        {
            config.trend.seasonality_prior_scale = value;
        }
        if let Some(value) =
            optional_setting_f64(settings, "HOLIDAYS_PRIOR_SCALE", Some(1e-6), None)?
        {
            config.trend.holidays_prior_scale = value;
        }
        if let Some(raw) = optional_setting(settings, "DEFAULT_ADDRESS") {
            config.fallback_location.address = raw.to_string();
        }
        if let Some(value) =
            optional_setting_f64(settings, "DEFAULT_LATITUDE", Some(-90.0), Some(90.0))?
        {
            config.fallback_location.latitude = value;
        }
        if let Some(value) =
            optional_setting_f64(settings, "DEFAULT_LONGITUDE", Some(-180.0), Some(180.0))?
        {
            config.fallback_location.longitude = value;
        }
        if let Some(raw) = optional_setting(settings, "DEFAULT_COUNTRY") {
            config.fallback_location.country_code = raw.to_ascii_uppercase();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon > self.max_horizon_days {
            return Err(anyhow!(
                "FORECAST_HORIZON ({}) must be <= MAX_HORIZON_DAYS ({})",
                self.forecast_horizon,
                self.max_horizon_days
            ));
        }
        if self.lags.iter().any(|lag| *lag == 0) {
            return Err(anyhow!("LAGS must contain only positive offsets"));
        }
        if self.roll_windows.iter().any(|window| *window == 0) {
            return Err(anyhow!("ROLL_WINDOWS must contain only positive windows"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("MAX_WORKERS must be >= 1"));
        }
        Ok(())
    }

    /// Model directory for a store, or the shared directory when no store is given.
    pub fn store_model_dir(&self, store_id: Option<i64>) -> PathBuf {
        match store_id {
            Some(id) => self.model_dir.join(format!("store_{}", id)),
            None => self.model_dir.clone(),
        }
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    parse_usize(key, raw, min).map(Some)
}

fn optional_setting_usize_list(
    settings: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Vec<usize>>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let values = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_usize(key, part, 1))
        .collect::<Result<Vec<_>>>()?;
    if values.is_empty() {
        return Err(anyhow!("Setting {} must list at least one value", key));
    }
    Ok(Some(values))
}

fn parse_usize(key: &str, raw: &str, min: usize) -> Result<usize> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_keep_defaults() {
        let config = PipelineConfig::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(config.n_cv_folds, 3);
        assert_eq!(config.test_window_days, 30);
        assert_eq!(config.min_train_days, 60);
        assert_eq!(config.min_ml_days, 90);
        assert_eq!(config.lags, vec![1, 7, 14]);
        assert_eq!(config.roll_windows, vec![7, 14, 28]);
        assert_eq!(config.weather_failure_policy, WeatherFailurePolicy::ZeroFill);
        assert_eq!(config.fallback_location.country_code, "CN");
    }

    #[test]
    fn overrides_are_parsed_and_validated() {
        let config = PipelineConfig::from_settings_map(&settings(&[
            ("N_TRIALS", "5"),
            ("LAGS", "1, 2,3"),
            ("WEATHER_FAILURE_POLICY", "hard-fail"),
            ("TREND_SEASONALITY_MODE", "multiplicative"),
            ("DEFAULT_COUNTRY", "sg"),
        ]))
        .unwrap();
        assert_eq!(config.n_trials, 5);
        assert_eq!(config.lags, vec![1, 2, 3]);
        assert_eq!(config.weather_failure_policy, WeatherFailurePolicy::HardFail);
        assert_eq!(config.trend.seasonality_mode, SeasonalityMode::Multiplicative);
        assert_eq!(config.fallback_location.country_code, "SG");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PipelineConfig::from_settings_map(&settings(&[("N_CV_FOLDS", "0")])).is_err());
        assert!(PipelineConfig::from_settings_map(&settings(&[("N_TRIALS", "2.5")])).is_err());
        assert!(
            PipelineConfig::from_settings_map(&settings(&[("WEATHER_FAILURE_POLICY", "maybe")]))
                .is_err()
        );
        assert!(PipelineConfig::from_settings_map(&settings(&[
            ("FORECAST_HORIZON", "40"),
            ("MAX_HORIZON_DAYS", "30"),
        ]))
        .is_err());
    }

    #[test]
    fn store_model_dir_is_namespaced() {
        let config = PipelineConfig::default();
        assert_eq!(config.store_model_dir(None), PathBuf::from("models"));
        assert_eq!(
            config.store_model_dir(Some(7)),
            PathBuf::from("models").join("store_7")
        );
    }
}
