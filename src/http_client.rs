use anyhow::{Context, Result};
use reqwest::Certificate;
use std::env;
use std::fs;
use std::time::Duration;

const HTTP_CA_CERT_ENV: &str = "HTTP_CA_CERT";
pub const USER_AGENT: &str = concat!("dish_forecast/", env!("CARGO_PKG_VERSION"));

fn env_path(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Extra root certificate for networks that intercept TLS.
fn load_ca_certificate() -> Result<Option<Certificate>> {
    let Some(path) = env_path(HTTP_CA_CERT_ENV) else {
        return Ok(None);
    };
    let pem = fs::read(&path).with_context(|| format!("failed to read CA certificate from {}", path))?;
    let certificate =
        Certificate::from_pem(&pem).with_context(|| format!("failed to parse CA certificate from {}", path))?;
    Ok(Some(certificate))
}

pub fn build_async_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_ca_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    builder.build().context("failed to build HTTP client")
}
