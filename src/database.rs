use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::error;
use tokio_postgres::{Client, NoTls, Row};

use crate::models::{SalesRecord, WeatherReading, WeatherTable};

const SALES_QUERY: &str = r#"
    SELECT s."Date"::date AS date, r."Name" AS dish, s."Quantity"::float8 AS sales
    FROM "SalesData" s
    JOIN "Recipes" r ON s."RecipeId" = r."Id"
    ORDER BY s."Date" ASC"#;

const STORE_SALES_QUERY: &str = r#"
    SELECT s."Date"::date AS date, r."Name" AS dish, s."Quantity"::float8 AS sales
    FROM "SalesData" s
    JOIN "Recipes" r ON s."RecipeId" = r."Id"
    WHERE s."StoreId" = $1
    ORDER BY s."Date" ASC"#;

const WEATHER_QUERY: &str = r#"
    SELECT "Date"::date,
           "TemperatureMax"::float8,
           "TemperatureMin"::float8,
           "HumidityMean"::float8,
           "PrecipitationSum"::float8
    FROM "Weather"
    WHERE "Date" BETWEEN $1 AND $2
    ORDER BY "Date" ASC"#;

const STORE_LOCATION_QUERY: &str = r#"
    SELECT "Latitude"::float8, "Longitude"::float8, "CountryCode"
    FROM "Store"
    WHERE "Id" = $1
    LIMIT 1"#;

/// Coordinates and country stored for a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: Option<String>,
}

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .context("failed to connect to PostgreSQL")?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    /// Raw sales rows, optionally limited to one store.
    pub async fn fetch_sales(&self, store_id: Option<i64>) -> Result<Vec<SalesRecord>> {
        let rows = match store_id {
            Some(id) => {
                let id = i32::try_from(id).with_context(|| format!("store id {} out of range", id))?;
                self.client.query(STORE_SALES_QUERY, &[&id]).await
            }
            None => self.client.query(SALES_QUERY, &[]).await,
        }
        .context("Failed to query sales data")?;

        rows.iter().map(sales_record_from_row).collect()
    }

    /// Daily weather rows stored for `[start, end]`.
    pub async fn fetch_weather(&self, start: NaiveDate, end: NaiveDate) -> Result<WeatherTable> {
        let rows = self
            .client
            .query(WEATHER_QUERY, &[&start, &end])
            .await
            .context("Failed to query weather table")?;

        let mut table = WeatherTable::new();
        for row in rows {
            let date: NaiveDate = row.try_get(0)?;
            let reading: WeatherReading = [row.try_get(1)?, row.try_get(2)?, row.try_get(3)?, row.try_get(4)?];
            table.insert(date, reading);
        }
        Ok(table)
    }

    pub async fn fetch_store_location(&self, store_id: i64) -> Result<Option<StoreLocation>> {
        let id = i32::try_from(store_id).with_context(|| format!("store id {} out of range", store_id))?;
        let row = self
            .client
            .query_opt(STORE_LOCATION_QUERY, &[&id])
            .await
            .with_context(|| format!("Failed to query location of store {}", store_id))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let latitude: Option<f64> = row.try_get(0)?;
        let longitude: Option<f64> = row.try_get(1)?;
        let country_code: Option<String> = row.try_get(2)?;
        Ok(match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(StoreLocation {
                latitude,
                longitude,
                country_code: country_code
                    .map(|code| code.trim().to_ascii_uppercase())
                    .filter(|code| !code.is_empty()),
            }),
            _ => None,
        })
    }
}

fn sales_record_from_row(row: &Row) -> Result<SalesRecord> {
    let date: NaiveDate = row.try_get(0)?;
    let dish: String = row.try_get(1)?;
    let quantity: Option<f64> = row.try_get(2)?;
    Ok(SalesRecord {
        date,
        dish,
        quantity: quantity.unwrap_or(0.0),
    })
}
