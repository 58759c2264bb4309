//! Alpha Vantage client. Every call goes through `/query?function=...`.

use super::{ensure_one_of, ServiceClient};
use crate::domain::{normalize_symbol, PipelineError, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

pub const OUTPUT_SIZES: &[&str] = &["compact", "full"];

#[derive(Clone)]
pub struct AlphaVantageClient {
    http: ServiceHttpClient,
}

impl AlphaVantageClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    async fn query(&self, function: &str, params: Vec<(&str, String)>) -> Result<Value> {
        let mut query = vec![("function", function.to_string())];
        query.extend(params);
        let value = self.http.get_json("/query", &query).await?;
        check_payload(function, &value)?;
        Ok(value)
    }

    /// GET /query?function=GLOBAL_QUOTE&symbol=IBM
    pub async fn fetch_global_quote(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        info!("Fetching Alpha Vantage quote: {}", symbol);
        self.query("GLOBAL_QUOTE", vec![("symbol", symbol)]).await
    }

    /// GET /query?function=TIME_SERIES_DAILY&symbol=IBM&outputsize=compact
    pub async fn fetch_daily_series(&self, symbol: &str, output_size: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        ensure_one_of("outputsize", output_size, OUTPUT_SIZES)?;
        self.query(
            "TIME_SERIES_DAILY",
            vec![("symbol", symbol), ("outputsize", output_size.to_string())],
        )
        .await
    }

    /// Company fundamentals.
    ///
    /// GET /query?function=OVERVIEW&symbol=IBM
    pub async fn fetch_company_overview(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        self.query("OVERVIEW", vec![("symbol", symbol)]).await
    }
}

#[async_trait]
impl ServiceClient for AlphaVantageClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_global_quote("IBM").await.map(|_| ())
    }
}

/// Alpha Vantage answers 200 even for errors and throttling; the body says so.
pub fn check_payload(function: &str, value: &Value) -> Result<()> {
    for field in ["Error Message", "Note", "Information"] {
        if let Some(message) = value.get(field).and_then(Value::as_str) {
            return Err(PipelineError::data(format!("Alpha Vantage {}: {}", function, message))
                .with_context("function", function)
                .with_context("field", field)
                .into());
        }
    }
    Ok(())
}

/// Price from a GLOBAL_QUOTE payload.
pub fn parse_global_quote_price(value: &Value) -> Option<f64> {
    value["Global Quote"]["05. price"].as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_throttle_note_is_an_error() {
        let value = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute"});
        let err = check_payload("GLOBAL_QUOTE", &value).unwrap_err();
        let inner = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(inner.kind(), "DataError");
        assert_eq!(inner.context()["field"], "Note");
    }

    #[test]
    fn test_error_message_is_an_error() {
        let value = json!({"Error Message": "Invalid API call."});
        assert!(check_payload("OVERVIEW", &value).is_err());
    }

    #[test]
    fn test_parse_global_quote() {
        let value = json!({
            "Global Quote": {"01. symbol": "IBM", "05. price": "185.2300"}
        });
        assert!(check_payload("GLOBAL_QUOTE", &value).is_ok());
        assert_eq!(parse_global_quote_price(&value), Some(185.23));
        assert_eq!(parse_global_quote_price(&json!({})), None);
    }
}
