//! Mempool.space client for Bitcoin network state.

use super::{ensure_one_of, ServiceClient};
use crate::domain::ServiceSettings;
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub const HASHRATE_PERIODS: &[&str] = &["1m", "3m", "6m", "1y", "2y", "3y", "all"];

#[derive(Clone)]
pub struct MempoolClient {
    http: ServiceHttpClient,
}

impl MempoolClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// GET /v1/fees/recommended
    pub async fn fetch_recommended_fees(&self) -> Result<Value> {
        self.http.get_json("/v1/fees/recommended", &[]).await
    }

    /// GET /blocks/tip/height
    pub async fn fetch_block_height(&self) -> Result<Value> {
        self.http.get_json("/blocks/tip/height", &[]).await
    }

    /// GET /v1/difficulty-adjustment
    pub async fn fetch_difficulty_adjustment(&self) -> Result<Value> {
        self.http.get_json("/v1/difficulty-adjustment", &[]).await
    }

    /// GET /mempool
    pub async fn fetch_mempool_stats(&self) -> Result<Value> {
        self.http.get_json("/mempool", &[]).await
    }

    /// GET /v1/mining/hashrate/{period}
    pub async fn fetch_hashrate(&self, period: &str) -> Result<Value> {
        ensure_one_of("period", period, HASHRATE_PERIODS)?;
        self.http
            .get_json(&format!("/v1/mining/hashrate/{}", period), &[])
            .await
    }
}

#[async_trait]
impl ServiceClient for MempoolClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_block_height().await.map(|_| ())
    }
}
