use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::Deserialize;

use crate::cache::KeyedCache;
use crate::config::FallbackLocation;
use crate::models::Location;
use crate::retry::{retry_with_backoff, RetryPolicy};

const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country_code: Option<String>,
}

pub fn fallback_location(fallback: &FallbackLocation) -> Location {
    Location {
        address: fallback.address.clone(),
        latitude: fallback.latitude,
        longitude: fallback.longitude,
        country_code: fallback.country_code.clone(),
        resolved: false,
    }
}

/// First usable place of a Nominatim search response.
fn parse_search_response(address: &str, body: &str, fallback_country: &str) -> Result<Option<Location>> {
    let places: Vec<NominatimPlace> = serde_json::from_str(body).context("Invalid geocoding response")?;
    let Some(place) = places.into_iter().next() else {
        return Ok(None);
    };
    let latitude: f64 = place.lat.trim().parse().context("Invalid latitude in geocoding response")?;
    let longitude: f64 = place.lon.trim().parse().context("Invalid longitude in geocoding response")?;
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(anyhow!("Non-finite coordinates in geocoding response"));
    }
    let country_code = place
        .address
        .and_then(|details| details.country_code)
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| fallback_country.to_string());
    Ok(Some(Location {
        address: address.to_string(),
        latitude,
        longitude,
        country_code,
        resolved: true,
    }))
}

async fn geocode(client: &reqwest::Client, address: &str, policy: &RetryPolicy, fallback_country: &str) -> Result<Option<Location>> {
    let body = retry_with_backoff("geocoding", policy, move || async move {
        let response = client
            .get(NOMINATIM_SEARCH_URL)
            .query(&[("q", address), ("format", "json"), ("addressdetails", "1"), ("limit", "1")])
            .send()
            .await
            .context("Geocoding request failed")?
            .error_for_status()
            .context("Geocoding service returned an error")?;
        response.text().await.context("Failed to read geocoding response")
    })
    .await?;
    parse_search_response(address, &body, fallback_country)
}

/// Resolves an address, caching by address. Any failure yields the
/// configured fallback location, which is not cached.
pub async fn resolve_location(
    client: &reqwest::Client,
    address: Option<&str>,
    fallback: &FallbackLocation,
    policy: &RetryPolicy,
    cache: &KeyedCache<String, Location>,
) -> Location {
    let Some(address) = address.map(str::trim).filter(|value| !value.is_empty()) else {
        return fallback_location(fallback);
    };
    let key = address.to_string();
    if let Some(location) = cache.get(&key) {
        return location;
    }
    match geocode(client, address, policy, &fallback.country_code).await {
        Ok(Some(location)) => {
            info!(
                "Geocoded '{}' -> Lat: {:.4}, Lon: {:.4}, Country: {}",
                address, location.latitude, location.longitude, location.country_code
            );
            cache.insert(key, location.clone());
            location
        }
        Ok(None) => {
            warn!("Could not geocode address '{}'; using {}", address, fallback.address);
            fallback_location(fallback)
        }
        Err(err) => {
            warn!("Geocoding failed for '{}': {:#}; using {}", address, err, fallback.address);
            fallback_location(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_place_with_uppercased_country() {
        let body = r#"[{"lat":"1.2903","lon":"103.8519","address":{"country_code":"sg"}},
                       {"lat":"0","lon":"0"}]"#;
        let location = parse_search_response("Raffles Place", body, "CN").unwrap().unwrap();
        assert_eq!(location.country_code, "SG");
        assert!((location.latitude - 1.2903).abs() < 1e-9);
        assert!(location.resolved);
    }

    #[test]
    fn missing_country_uses_fallback_code() {
        let body = r#"[{"lat":"31.2","lon":"121.4"}]"#;
        let location = parse_search_response("Somewhere", body, "CN").unwrap().unwrap();
        assert_eq!(location.country_code, "CN");
    }

    #[test]
    fn empty_results_and_garbage_are_distinguished() {
        assert!(parse_search_response("Nowhere", "[]", "CN").unwrap().is_none());
        assert!(parse_search_response("Nowhere", "<html>", "CN").is_err());
    }

    #[tokio::test]
    async fn blank_address_skips_the_network() {
        let client = reqwest::Client::new();
        let fallback = FallbackLocation::default();
        let cache = KeyedCache::new();
        let location = resolve_location(&client, Some("  "), &fallback, &RetryPolicy::immediate(0), &cache).await;
        assert_eq!(location, fallback_location(&fallback));
        assert!(cache.is_empty());
    }
}
