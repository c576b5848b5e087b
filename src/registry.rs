//! Per-dish artifacts and the champion registry.
//!
//! Every dish owns `model_{safe}.bin` (hybrid champions) or
//! `average_{safe}.json` (average fallback) plus `recent_sales_{safe}.json`.
//! `champion_registry.json` maps each dish to its winning family and is the
//! single source of truth at inference time.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::booster::{ModelFamily, TreeEnsemble};
use crate::cache::KeyedCache;
use crate::features::FeatureLayout;
use crate::forecaster::{
    average_forecast, validate_request, ForecastError, FutureWeather, RecursiveForecaster,
};
use crate::holidays::{calendar_years, HolidayCalendar};
use crate::models::{DailySale, ForecastPoint, WeatherValues};
use crate::param_utils::ParamSet;
use crate::trend::TrendModel;

pub const REGISTRY_FILE: &str = "champion_registry.json";
const MODEL_ARTIFACT_VERSION: u32 = 1;

/// FNV-1a over the UTF-8 bytes; stable across builds and platforms.
fn name_hash(name: &str) -> u32 {
    name.bytes()
        .fold(0x811c_9dc5_u32, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193))
}

/// File-system safe form of a dish name. Unicode letters and digits are
/// kept; anything else becomes `_`, and then a hash of the full name is
/// appended so names differing only in replaced characters stay distinct.
pub fn safe_filename(dish: &str) -> String {
    let safe: String = dish
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe == dish && !safe.is_empty() {
        safe
    } else {
        format!("{}_{:08x}", safe, name_hash(dish))
    }
}

pub fn registry_path(dir: &Path) -> PathBuf {
    dir.join(REGISTRY_FILE)
}

pub fn model_path(dir: &Path, dish: &str) -> PathBuf {
    dir.join(format!("model_{}.bin", safe_filename(dish)))
}

pub fn average_path(dir: &Path, dish: &str) -> PathBuf {
    dir.join(format!("average_{}.json", safe_filename(dish)))
}

pub fn recent_sales_path(dir: &Path, dish: &str) -> PathBuf {
    dir.join(format!("recent_sales_{}.json", safe_filename(dish)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Champion {
    Hybrid(ModelFamily),
    Average,
}

impl Champion {
    pub fn as_str(self) -> &'static str {
        match self {
            Champion::Hybrid(family) => family.as_str(),
            Champion::Average => "average",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Champion::Hybrid(family) => family.label(),
            Champion::Average => "Average",
        }
    }

    pub fn model_type(self) -> &'static str {
        match self {
            Champion::Hybrid(_) => "hybrid",
            Champion::Average => "average",
        }
    }
}

impl From<Champion> for String {
    fn from(champion: Champion) -> Self {
        champion.as_str().to_string()
    }
}

impl TryFrom<String> for Champion {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        if raw.trim().eq_ignore_ascii_case("average") {
            return Ok(Champion::Average);
        }
        ModelFamily::parse(&raw).map(Champion::Hybrid)
    }
}

impl std::fmt::Display for Champion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub champion: Champion,
    pub champion_mae: Option<f64>,
    /// `None` marks a family whose search produced no finite score.
    pub family_mae: BTreeMap<ModelFamily, Option<f64>>,
    pub best_params: BTreeMap<ModelFamily, ParamSet>,
    pub model_type: String,
    pub trained_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn historical_mae(&self) -> Option<f64> {
        self.champion_mae.filter(|mae| mae.is_finite() && *mae > 0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChampionRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ChampionRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open registry at {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse registry at {}", path.display()))
    }

    /// Loads the registry, or starts an empty one when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let file = File::create(path).with_context(|| format!("Unable to create registry at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("Failed to serialize champion registry")?;
        writer.flush().context("Failed to flush champion registry to disk")?;
        Ok(())
    }

    pub fn get(&self, dish: &str) -> Option<&RegistryEntry> {
        self.entries.get(dish)
    }

    pub fn contains(&self, dish: &str) -> bool {
        self.entries.contains_key(dish)
    }

    pub fn insert(&mut self, dish: String, entry: RegistryEntry) {
        self.entries.insert(dish, entry);
    }

    /// Overwrites entries with those of `other`.
    pub fn merge(&mut self, other: ChampionRegistry) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything needed to forecast a hybrid champion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishModelArtifact {
    pub version: u32,
    pub dish: String,
    pub trend: TrendModel,
    pub ensemble: TreeEnsemble,
    pub layout: FeatureLayout,
    pub country_code: String,
    pub holiday_years: Vec<i32>,
}

impl DishModelArtifact {
    pub fn new(
        dish: &str,
        trend: TrendModel,
        ensemble: TreeEnsemble,
        layout: FeatureLayout,
        country_code: &str,
        holiday_years: Vec<i32>,
    ) -> Self {
        Self {
            version: MODEL_ARTIFACT_VERSION,
            dish: dish.to_string(),
            trend,
            ensemble,
            layout,
            country_code: country_code.to_string(),
            holiday_years,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let file = File::create(path).with_context(|| format!("Unable to create model artifact at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).context("Failed to serialize model artifact")?;
        writer.flush().context("Failed to flush model artifact to disk")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open model artifact at {}", path.display()))?;
        let artifact: Self = bincode::deserialize_from(BufReader::new(file)).context("Model artifact decode failed")?;
        if artifact.version != MODEL_ARTIFACT_VERSION {
            return Err(anyhow!(
                "Model artifact version mismatch (found {}, expected {})",
                artifact.version,
                MODEL_ARTIFACT_VERSION
            ));
        }
        Ok(artifact)
    }

    /// Holiday calendar covering the training years and `[start, end]`.
    pub fn calendar(&self, start: NaiveDate, end: NaiveDate) -> HolidayCalendar {
        let years = calendar_years(&self.holiday_years, start, end);
        HolidayCalendar::new(&self.country_code, years).unwrap_or_else(HolidayCalendar::empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageArtifact {
    pub dish: String,
    pub mean: f64,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSalesSnapshot {
    pub dish: String,
    pub sales: Vec<DailySale>,
}

impl RecentSalesSnapshot {
    pub fn quantities(&self) -> Vec<f64> {
        self.sales.iter().map(|sale| sale.quantity).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.sales.last().map(|sale| sale.date)
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).with_context(|| format!("Failed to serialize {}", path.display()))?;
    writer.flush().with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create model directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// A champion ready for inference.
#[derive(Debug)]
pub enum LoadedModel {
    Hybrid(DishModelArtifact),
    Average(AverageArtifact),
}

#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub start_date: NaiveDate,
    pub horizon: usize,
    pub recent_sales: Vec<f64>,
    pub weather: BTreeMap<NaiveDate, WeatherValues>,
    pub with_attribution: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DishForecast {
    pub dish: String,
    pub champion: Champion,
    pub points: Vec<ForecastPoint>,
}

/// Modification time and length of the registry file when it was read.
/// Coarse mtimes can miss a rewrite within the same tick; the length catches
/// most of those.
type RegistryStamp = (Option<SystemTime>, u64);

/// Reads the registry and artifacts of one model directory and serves
/// forecasts from them. Loaded models are cached by dish and training time;
/// the registry is re-read whenever its modification time or size changes.
pub struct ModelStore {
    dir: PathBuf,
    max_horizon_days: usize,
    registry: Mutex<Option<(RegistryStamp, Arc<ChampionRegistry>)>>,
    models: KeyedCache<String, Arc<LoadedModel>>,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, max_horizon_days: usize, models: KeyedCache<String, Arc<LoadedModel>>) -> Self {
        Self {
            dir: dir.into(),
            max_horizon_days,
            registry: Mutex::new(None),
            models,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> Result<Arc<ChampionRegistry>, ForecastError> {
        let path = registry_path(&self.dir);
        if !path.exists() {
            return Err(ForecastError::RegistryMissing(path));
        }
        let stamp: Option<RegistryStamp> = fs::metadata(&path)
            .ok()
            .map(|meta| (meta.modified().ok(), meta.len()));
        let mut guard = self.registry.lock().map_err(|_| ForecastError::CorruptArtifact {
            path: path.clone(),
            reason: "registry lock poisoned".to_string(),
        })?;
        if let Some((cached_at, registry)) = guard.as_ref() {
            if stamp.as_ref().is_some_and(|stamp| stamp.0.is_some() && stamp == cached_at) {
                return Ok(Arc::clone(registry));
            }
        }
        let registry = ChampionRegistry::load(&path).map_err(|error| ForecastError::CorruptArtifact {
            path: path.clone(),
            reason: format!("{:#}", error),
        })?;
        debug!("Loaded registry with {} dishes from {}", registry.len(), path.display());
        let registry = Arc::new(registry);
        *guard = stamp.map(|stamp| (stamp, Arc::clone(&registry)));
        Ok(registry)
    }

    pub fn list_dishes(&self) -> Result<Vec<(String, RegistryEntry)>, ForecastError> {
        Ok(self
            .registry()?
            .iter()
            .map(|(dish, entry)| (dish.clone(), entry.clone()))
            .collect())
    }

    pub fn recent_sales(&self, dish: &str) -> Result<RecentSalesSnapshot, ForecastError> {
        let path = recent_sales_path(&self.dir, dish);
        if !path.exists() {
            return Err(ForecastError::MissingArtifact(path));
        }
        read_json(&path).map_err(|error| ForecastError::CorruptArtifact {
            path,
            reason: format!("{:#}", error),
        })
    }

    fn load_model(&self, dish: &str, entry: &RegistryEntry) -> Result<Arc<LoadedModel>, ForecastError> {
        let key = format!("{}@{}", dish, entry.trained_at.timestamp_millis());
        if let Some(model) = self.models.get(&key) {
            return Ok(model);
        }
        let (path, loaded) = match entry.champion {
            Champion::Hybrid(_) => {
                let path = model_path(&self.dir, dish);
                if !path.exists() {
                    return Err(ForecastError::MissingArtifact(path));
                }
                let loaded = DishModelArtifact::load(&path).map(LoadedModel::Hybrid);
                (path, loaded)
            }
            Champion::Average => {
                let path = average_path(&self.dir, dish);
                if !path.exists() {
                    return Err(ForecastError::MissingArtifact(path));
                }
                let loaded = read_json::<AverageArtifact>(&path).map(LoadedModel::Average);
                (path, loaded)
            }
        };
        let model = Arc::new(loaded.map_err(|error| ForecastError::CorruptArtifact {
            path,
            reason: format!("{:#}", error),
        })?);
        self.models.insert(key, Arc::clone(&model));
        Ok(model)
    }

    /// Recursive forecast for one dish from caller-supplied recent sales.
    pub fn forecast_dish(&self, dish: &str, request: &ForecastRequest) -> Result<DishForecast, ForecastError> {
        validate_request(&request.recent_sales, request.horizon, self.max_horizon_days)?;
        if request
            .weather
            .values()
            .any(|values| values.as_array().iter().any(|value| !value.is_finite()))
        {
            return Err(ForecastError::NonFiniteInput("forecast weather"));
        }
        let registry = self.registry()?;
        let entry = registry
            .get(dish)
            .ok_or_else(|| ForecastError::UnknownDish(dish.to_string()))?;
        let model = self.load_model(dish, entry)?;

        let points = match model.as_ref() {
            LoadedModel::Average(average) => average_forecast(average.mean, request.start_date, request.horizon),
            LoadedModel::Hybrid(artifact) => {
                let end = request.start_date + chrono::Duration::days(request.horizon as i64);
                let calendar = artifact.calendar(request.start_date, end);
                let weather = FutureWeather::new(request.weather.clone(), artifact.trend.regressor_means());
                let forecaster = RecursiveForecaster {
                    trend: &artifact.trend,
                    ensemble: &artifact.ensemble,
                    layout: &artifact.layout,
                    calendar: &calendar,
                    historical_mae: entry.historical_mae(),
                    with_attribution: request.with_attribution,
                };
                let mut history = request.recent_sales.clone();
                forecaster.run(request.start_date, request.horizon, &weather, &mut history)
            }
        };
        info!(
            "Forecast {} days for {} with {} champion",
            points.len(),
            dish,
            entry.champion.label()
        );
        Ok(DishForecast {
            dish: dish.to_string(),
            champion: entry.champion,
            points,
        })
    }
}

/// Groups registry entries by champion for summaries.
pub fn champion_counts(registry: &ChampionRegistry) -> HashMap<Champion, usize> {
    let mut counts = HashMap::new();
    for (_, entry) in registry.iter() {
        *counts.entry(entry.champion).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(champion: Champion, mae: Option<f64>) -> RegistryEntry {
        RegistryEntry {
            champion,
            champion_mae: mae,
            family_mae: ModelFamily::ALL.iter().map(|family| (*family, mae)).collect(),
            best_params: BTreeMap::new(),
            model_type: champion.model_type().to_string(),
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn safe_filename_keeps_unicode_words_and_separates_replaced_names() {
        assert_eq!(safe_filename("dish_1"), "dish_1");
        assert_eq!(safe_filename("麻婆豆腐"), "麻婆豆腐");
        assert_ne!(safe_filename("麻婆豆腐"), safe_filename("宫保鸡丁"));
        let spaced = safe_filename("Kung Pao Chicken (L)");
        assert!(spaced.starts_with("Kung_Pao_Chicken__L__"));
        assert!(!spaced.contains(' ') && !spaced.contains('('));
        assert_ne!(safe_filename("A B"), safe_filename("A/B"));
        assert_ne!(safe_filename("A B"), safe_filename("A_B"));
        assert_eq!(safe_filename("A B"), safe_filename("A B"));
        assert!(!safe_filename("").is_empty());
    }

    #[test]
    fn champion_serializes_as_family_name() {
        let json = serde_json::to_string(&Champion::Hybrid(ModelFamily::CatBoost)).unwrap();
        assert_eq!(json, "\"catboost\"");
        let parsed: Champion = serde_json::from_str("\"average\"").unwrap();
        assert_eq!(parsed, Champion::Average);
        assert!(serde_json::from_str::<Champion>("\"prophet\"").is_err());
    }

    #[test]
    fn registry_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = registry_path(dir.path());
        let mut registry = ChampionRegistry::default();
        registry.insert("Fried Rice".to_string(), entry(Champion::Hybrid(ModelFamily::XGBoost), Some(1.25)));
        registry.insert("Tea".to_string(), entry(Champion::Average, None));
        registry.save(&path).unwrap();
        let loaded = ChampionRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
    }

    #[test]
    fn merge_overwrites_existing_entries() {
        let mut base = ChampionRegistry::default();
        base.insert("A".to_string(), entry(Champion::Average, None));
        base.insert("B".to_string(), entry(Champion::Average, None));
        let mut update = ChampionRegistry::default();
        update.insert("B".to_string(), entry(Champion::Hybrid(ModelFamily::LightGBM), Some(2.0)));
        base.merge(update);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("B").unwrap().champion, Champion::Hybrid(ModelFamily::LightGBM));
    }

    #[test]
    fn missing_registry_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), 30, KeyedCache::new());
        assert!(matches!(store.registry(), Err(ForecastError::RegistryMissing(_))));
    }

    #[test]
    fn registry_rewrite_with_the_same_mtime_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = registry_path(dir.path());
        let mut registry = ChampionRegistry::default();
        registry.insert("Tea".to_string(), entry(Champion::Average, None));
        registry.save(&path).unwrap();
        let written_at = fs::metadata(&path).unwrap().modified().unwrap();

        let store = ModelStore::new(dir.path(), 30, KeyedCache::new());
        assert_eq!(store.registry().unwrap().len(), 1);

        registry.insert("Soup".to_string(), entry(Champion::Hybrid(ModelFamily::XGBoost), Some(1.0)));
        registry.save(&path).unwrap();
        fs::File::options().write(true).open(&path).unwrap().set_modified(written_at).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), written_at);

        let reloaded = store.registry().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("Soup"));
    }

    #[test]
    fn unknown_dish_and_missing_artifact_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ChampionRegistry::default();
        registry.insert("Soup".to_string(), entry(Champion::Hybrid(ModelFamily::XGBoost), Some(1.0)));
        registry.save(&registry_path(dir.path())).unwrap();
        let store = ModelStore::new(dir.path(), 30, KeyedCache::new());
        let request = ForecastRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            horizon: 3,
            recent_sales: vec![4.0, 5.0],
            weather: BTreeMap::new(),
            with_attribution: false,
        };
        assert_eq!(
            store.forecast_dish("Salad", &request),
            Err(ForecastError::UnknownDish("Salad".to_string()))
        );
        assert!(matches!(
            store.forecast_dish("Soup", &request),
            Err(ForecastError::MissingArtifact(_))
        ));
    }

    #[test]
    fn corrupt_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ChampionRegistry::default();
        registry.insert("Soup".to_string(), entry(Champion::Hybrid(ModelFamily::XGBoost), Some(1.0)));
        registry.save(&registry_path(dir.path())).unwrap();
        fs::write(model_path(dir.path(), "Soup"), b"not a model").unwrap();
        let store = ModelStore::new(dir.path(), 30, KeyedCache::new());
        let request = ForecastRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            horizon: 2,
            recent_sales: vec![4.0],
            weather: BTreeMap::new(),
            with_attribution: false,
        };
        assert!(matches!(
            store.forecast_dish("Soup", &request),
            Err(ForecastError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn average_champion_forecasts_flat_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ChampionRegistry::default();
        registry.insert("Tea".to_string(), entry(Champion::Average, None));
        registry.save(&registry_path(dir.path())).unwrap();
        write_json(
            &average_path(dir.path(), "Tea"),
            &AverageArtifact {
                dish: "Tea".to_string(),
                mean: 3.5,
                trained_at: Utc::now(),
            },
        )
        .unwrap();
        let store = ModelStore::new(dir.path(), 30, KeyedCache::new());
        let forecast = store
            .forecast_dish(
                "Tea",
                &ForecastRequest {
                    start_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                    horizon: 4,
                    recent_sales: vec![1.0],
                    weather: BTreeMap::new(),
                    with_attribution: true,
                },
            )
            .unwrap();
        assert_eq!(forecast.champion, Champion::Average);
        assert!(forecast.points.iter().all(|point| point.combined_prediction == 3.5));
    }
}
