//! CoinGecko client. A demo API key is optional and sent as a header.

use super::ServiceClient;
use crate::domain::{PipelineError, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

#[derive(Clone)]
pub struct CoinGeckoClient {
    http: ServiceHttpClient,
}

/// Lowercase, comma separated, no blanks: "bitcoin,ethereum".
fn normalize_ids(ids: &[&str]) -> Result<String> {
    let cleaned: Vec<String> = ids
        .iter()
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(PipelineError::validation("at least one coin id is required").into());
    }
    if let Some(bad) = cleaned
        .iter()
        .find(|id| !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        return Err(PipelineError::validation(format!("invalid coin id: {:?}", bad)).into());
    }
    Ok(cleaned.join(","))
}

impl CoinGeckoClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// Spot prices with 24h change, market cap and volume.
    ///
    /// GET /simple/price?ids=bitcoin&vs_currencies=usd
    pub async fn fetch_simple_price(&self, ids: &[&str], vs_currency: &str) -> Result<Value> {
        let ids = normalize_ids(ids)?;
        info!("Fetching CoinGecko prices: {}", ids);
        self.http
            .get_json(
                "/simple/price",
                &[
                    ("ids", ids),
                    ("vs_currencies", vs_currency.to_lowercase()),
                    ("include_24hr_change", "true".to_string()),
                    ("include_market_cap", "true".to_string()),
                    ("include_24hr_vol", "true".to_string()),
                ],
            )
            .await
    }

    /// GET /coins/{id}/market_chart?vs_currency=usd&days=30
    pub async fn fetch_market_chart(&self, id: &str, vs_currency: &str, days: u32) -> Result<Value> {
        let id = normalize_ids(&[id])?;
        self.http
            .get_json(
                &format!("/coins/{}/market_chart", id),
                &[
                    ("vs_currency", vs_currency.to_lowercase()),
                    ("days", days.clamp(1, 3650).to_string()),
                ],
            )
            .await
    }

    /// Global market totals and dominance.
    ///
    /// GET /global
    pub async fn fetch_global(&self) -> Result<Value> {
        self.http.get_json("/global", &[]).await
    }
}

#[async_trait]
impl ServiceClient for CoinGeckoClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.http.get_json("/ping", &[]).await.map(|_| ())
    }
}

/// Price of `id` in `vs_currency` from a `/simple/price` response.
pub fn parse_simple_price(value: &Value, id: &str, vs_currency: &str) -> Option<f64> {
    value[id.to_lowercase()][vs_currency.to_lowercase()].as_f64()
}
