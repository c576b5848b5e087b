use anyhow::Result;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::models::{Location, WeatherValues};
use crate::registry::LoadedModel;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Unbounded concurrent cache. Entries live until `clear` is called.
#[derive(Debug)]
pub struct KeyedCache<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, V>>,
}

impl<K, V> Clone for KeyedCache<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Returns the cached value or stores the one produced by `load`.
    /// Failed loads are not cached.
    pub fn get_or_try_insert_with<F>(&self, key: &K, load: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = load()?;
        self.entries.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Coordinates rounded to two decimals, used as the forecast-weather key.
pub type CoordinateKey = (i64, i64);

pub fn coordinate_key(latitude: f64, longitude: f64) -> CoordinateKey {
    ((latitude * 100.0).round() as i64, (longitude * 100.0).round() as i64)
}

/// Caches injected into the serving and training paths.
#[derive(Clone, Default)]
pub struct ServiceCaches {
    pub geocode: KeyedCache<String, Location>,
    pub forecast_weather: KeyedCache<CoordinateKey, Arc<BTreeMap<NaiveDate, WeatherValues>>>,
    pub models: KeyedCache<String, Arc<LoadedModel>>,
}

impl ServiceCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.geocode.clear();
        self.forecast_weather.clear();
        self.models.clear();
    }
}
