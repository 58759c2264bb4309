//! Financial Modeling Prep client.

use super::{ensure_one_of, ServiceClient};
use crate::domain::{normalize_symbol, PipelineError, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

pub const PERIODS: &[&str] = &["annual", "quarter"];

#[derive(Clone)]
pub struct FmpClient {
    http: ServiceHttpClient,
}

impl FmpClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    async fn get(&self, path: String, query: &[(&str, String)]) -> Result<Value> {
        let value = self.http.get_json(&path, query).await?;
        if let Some(message) = value.get("Error Message").and_then(Value::as_str) {
            return Err(PipelineError::data(format!("FMP error: {}", message))
                .with_context("path", path)
                .into());
        }
        Ok(value)
    }

    /// GET /quote/{symbol}
    pub async fn fetch_quote(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        info!("Fetching FMP quote: {}", symbol);
        self.get(format!("/quote/{}", symbol), &[]).await
    }

    /// GET /profile/{symbol}
    pub async fn fetch_profile(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        info!("Fetching FMP profile: {}", symbol);
        self.get(format!("/profile/{}", symbol), &[]).await
    }

    /// GET /income-statement/{symbol}?period=annual&limit=5
    pub async fn fetch_income_statement(&self, symbol: &str, period: &str, limit: u32) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        ensure_one_of("period", period, PERIODS)?;
        self.get(
            format!("/income-statement/{}", symbol),
            &[("period", period.to_string()), ("limit", limit.clamp(1, 40).to_string())],
        )
        .await
    }

    /// GET /historical-price-full/{symbol}
    pub async fn fetch_historical_prices(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        self.get(format!("/historical-price-full/{}", symbol), &[]).await
    }
}

#[async_trait]
impl ServiceClient for FmpClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_quote("AAPL").await.map(|_| ())
    }
}

/// First profile record from a `/profile` response.
pub fn first_profile(value: &Value) -> Option<&Value> {
    value.as_array().and_then(|rows| rows.first())
}
