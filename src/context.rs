use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::PathBuf;

use crate::cache::ServiceCaches;
use crate::config::PipelineConfig;
use crate::database::{Database, StoreLocation};
use crate::http_client::build_async_client;
use crate::location::{fallback_location, resolve_location};
use crate::models::Location;
use crate::registry::ModelStore;
use crate::retry::retry_db_operation;
use crate::training_status::TrainingStatus;

/// Shared state of one process: configuration, the optional database,
/// the HTTP client and the explicit caches.
#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
    config: PipelineConfig,
    caches: ServiceCaches,
    status: TrainingStatus,
    http: reqwest::Client,
}

impl AppContext {
    pub async fn initialize(database_url: Option<String>, config: PipelineConfig) -> Result<Self> {
        let database_url = database_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let http = build_async_client(Some(config.retry.request_timeout))?;
        Ok(Self {
            database_url,
            config,
            caches: ServiceCaches::new(),
            status: TrainingStatus::new(),
            http,
        })
    }

    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to use database-backed commands."
            ));
        };
        Database::new(database_url).await
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn caches(&self) -> &ServiceCaches {
        &self.caches
    }

    pub fn status(&self) -> &TrainingStatus {
        &self.status
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn model_dir(&self, store_id: Option<i64>) -> PathBuf {
        self.config.store_model_dir(store_id)
    }

    pub fn model_store(&self, store_id: Option<i64>) -> ModelStore {
        ModelStore::new(
            self.model_dir(store_id),
            self.config.max_horizon_days,
            self.caches.models.clone(),
        )
    }

    /// Store coordinates from the database when a store is given, otherwise
    /// the geocoded address, otherwise the configured fallback.
    pub async fn resolve_location(&self, address: Option<&str>, store_id: Option<i64>) -> Location {
        if let (Some(store_id), true) = (store_id, self.has_database()) {
            let stored: Result<Option<StoreLocation>> = retry_db_operation!("store location query", async {
                let db = self.database().await?;
                db.fetch_store_location(store_id).await
            });
            match stored {
                Ok(Some(stored)) => {
                    info!("Using stored location for store {}", store_id);
                    return Location {
                        address: address.unwrap_or_default().to_string(),
                        latitude: stored.latitude,
                        longitude: stored.longitude,
                        country_code: stored
                            .country_code
                            .unwrap_or_else(|| self.config.fallback_location.country_code.clone()),
                        resolved: true,
                    };
                }
                Ok(None) => info!("Store {} has no stored location", store_id),
                Err(err) => warn!("Store location lookup failed: {:#}", err),
            }
        }
        if address.is_none() {
            return fallback_location(&self.config.fallback_location);
        }
        resolve_location(
            &self.http,
            address,
            &self.config.fallback_location,
            &self.config.retry,
            &self.caches.geocode,
        )
        .await
    }
}
