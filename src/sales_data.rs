use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::context::AppContext;
use crate::models::{DailySale, SalesRecord};
use crate::retry::retry_db_operation;

pub const DEFAULT_SALES_CSV: &str = "food_sales_eng.csv";

#[derive(Debug, Deserialize)]
struct SalesCsvRow {
    date: String,
    dish: String,
    sales: Option<f64>,
}

/// Accepts `MM/DD/YYYY`, ISO dates and ISO timestamps.
pub fn parse_sales_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(timestamp.date());
        }
    }
    Err(anyhow!("Unrecognised sales date '{}'", raw))
}

pub fn read_sales_csv<R: Read>(reader: R) -> Result<Vec<SalesRecord>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<SalesCsvRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed sales CSV row {}", index + 2))?;
        let date = parse_sales_date(&row.date).with_context(|| format!("Sales CSV row {}", index + 2))?;
        records.push(SalesRecord {
            date,
            dish: row.dish,
            quantity: row.sales.unwrap_or(0.0),
        });
    }
    Ok(records)
}

pub fn load_sales_csv(path: &Path) -> Result<Vec<SalesRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open sales CSV {}", path.display()))?;
    let records = read_sales_csv(BufReader::new(file))?;
    info!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Sales from the database when configured, otherwise (or on failure) from
/// the CSV file.
pub async fn load_sales(context: &AppContext, store_id: Option<i64>, csv_path: &Path) -> Result<Vec<SalesRecord>> {
    if context.has_database() {
        let fetched: Result<Vec<SalesRecord>> = retry_db_operation!("sales query", async {
            let db = context.database().await?;
            db.fetch_sales(store_id).await
        });
        match fetched {
            Ok(records) => {
                info!("Loaded {} sales rows from the database", records.len());
                return Ok(records);
            }
            Err(err) => warn!("Database sales query failed: {:#}. Falling back to CSV.", err),
        }
    } else {
        info!("DATABASE_URL not set. Using CSV fallback.");
    }
    load_sales_csv(csv_path)
}

/// One row per (date, dish), summing duplicates. Rows with a non-finite
/// quantity are dropped.
pub fn aggregate_sales(records: &[SalesRecord]) -> BTreeMap<String, Vec<DailySale>> {
    let mut totals: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for record in records {
        if !record.quantity.is_finite() {
            continue;
        }
        let dish = record.dish.trim();
        if dish.is_empty() {
            continue;
        }
        *totals
            .entry(dish.to_string())
            .or_default()
            .entry(record.date)
            .or_insert(0.0) += record.quantity;
    }
    totals
        .into_iter()
        .map(|(dish, days)| {
            let sales = days
                .into_iter()
                .map(|(date, quantity)| DailySale { date, quantity })
                .collect();
            (dish, sales)
        })
        .collect()
}

/// First and last sale date across every dish.
pub fn date_range(sales: &BTreeMap<String, Vec<DailySale>>) -> Option<(NaiveDate, NaiveDate)> {
    let dates = sales.values().flatten().map(|sale| sale.date);
    let first = dates.clone().min()?;
    let last = dates.max()?;
    Some((first, last))
}
