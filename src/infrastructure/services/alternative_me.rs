//! Alternative.me client for the crypto Fear & Greed index.

use super::ServiceClient;
use crate::domain::{FearGreedReading, PipelineError, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

#[derive(Clone)]
pub struct AlternativeMeClient {
    http: ServiceHttpClient,
}

impl AlternativeMeClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// Latest `limit` daily readings, newest first. `limit = 0` returns all.
    ///
    /// GET /fng/?limit=30&format=json
    pub async fn fetch_fear_greed(&self, limit: u32) -> Result<Value> {
        self.http
            .get_json(
                "/fng/",
                &[("limit", limit.to_string()), ("format", "json".to_string())],
            )
            .await
    }
}

#[async_trait]
impl ServiceClient for AlternativeMeClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        let value = self.fetch_fear_greed(1).await?;
        parse_readings(&value).map(|_| ())
    }
}

/// Parse the `data` array. Values and timestamps arrive as strings.
pub fn parse_readings(value: &Value) -> Result<Vec<FearGreedReading>> {
    if let Some(error) = value["metadata"]["error"].as_str() {
        return Err(PipelineError::data(format!("Alternative.me error: {}", error)).into());
    }
    let rows = value["data"]
        .as_array()
        .ok_or_else(|| PipelineError::data("Fear & Greed response has no data array"))?;

    rows.iter()
        .map(|row| {
            let reading = row["value"]
                .as_str()
                .and_then(|v| v.parse::<u8>().ok())
                .filter(|v| *v <= 100);
            let timestamp = row["timestamp"]
                .as_str()
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ts| DateTime::from_timestamp(ts, 0));

            match (reading, timestamp) {
                (Some(value), Some(timestamp)) => Ok(FearGreedReading {
                    value,
                    classification: row["value_classification"]
                        .as_str()
                        .unwrap_or("Unknown")
                        .to_string(),
                    timestamp,
                }),
                _ => Err(PipelineError::data("malformed Fear & Greed reading")
                    .with_context("row", row.clone())
                    .into()),
            }
        })
        .collect()
}
