//! BGeometrics client for Bitcoin on-chain valuation metrics.

use super::{ensure_one_of, ServiceClient};
use crate::domain::ServiceSettings;
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Metric path segments served under `/v1/`.
pub const METRICS: &[&str] = &[
    "mvrv",
    "mvrv-zscore",
    "nupl",
    "sopr",
    "puell-multiple",
    "realized-price",
    "reserve-risk",
    "nrpl-btc",
    "hashribbons",
    "stock-to-flow",
];

#[derive(Clone)]
pub struct BGeometricsClient {
    http: ServiceHttpClient,
}

impl BGeometricsClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// Full daily series for a metric.
    ///
    /// GET /v1/{metric}
    pub async fn fetch_metric(&self, metric: &str) -> Result<Value> {
        ensure_one_of("metric", metric, METRICS)?;
        info!("Fetching BGeometrics series: {}", metric);
        self.http.get_json(&format!("/v1/{}", metric), &[]).await
    }

    /// Most recent value only.
    ///
    /// GET /v1/{metric}/last
    pub async fn fetch_metric_latest(&self, metric: &str) -> Result<Value> {
        ensure_one_of("metric", metric, METRICS)?;
        self.http.get_json(&format!("/v1/{}/last", metric), &[]).await
    }
}

#[async_trait]
impl ServiceClient for BGeometricsClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_metric_latest("mvrv").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceKind;

    #[tokio::test]
    async fn test_unknown_metric_is_rejected() {
        let client = BGeometricsClient::new(ServiceSettings::defaults(ServiceKind::BGeometrics)).unwrap();
        let err = client.fetch_metric("moon-index").await.unwrap_err();
        assert!(err.to_string().contains("invalid metric"));
        assert!(client.fetch_metric_latest("../admin").await.is_err());
    }
}
