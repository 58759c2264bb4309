//! Domain layer - core entities, repository traits and the error taxonomy.
//!
//! This module defines the vocabulary shared by the pipeline:
//! - The external data services and their default policies
//! - Cache requests and the key derivation used by every cache tier
//! - Repository traits that the storage tiers implement
//! - Typed market data models parsed from provider responses

pub mod config;
pub mod error;
pub mod models;

pub use config::{AppConfig, AutoCollectionSettings, ServiceSettings};
pub use error::{ErrorContext, PipelineError};
pub use models::*;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// External data providers the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "yahoo_finance")]
    YahooFinance,
    #[serde(rename = "fred")]
    Fred,
    #[serde(rename = "alpha_vantage")]
    AlphaVantage,
    #[serde(rename = "fmp")]
    Fmp,
    #[serde(rename = "coingecko")]
    CoinGecko,
    #[serde(rename = "mempool")]
    Mempool,
    #[serde(rename = "alternative_me")]
    AlternativeMe,
    #[serde(rename = "bgeometrics")]
    BGeometrics,
}

/// Where an API key is sent on each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyPlacement {
    Query(&'static str),
    Header(&'static str),
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::YahooFinance,
        ServiceKind::Fred,
        ServiceKind::AlphaVantage,
        ServiceKind::Fmp,
        ServiceKind::CoinGecko,
        ServiceKind::Mempool,
        ServiceKind::AlternativeMe,
        ServiceKind::BGeometrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::YahooFinance => "yahoo_finance",
            ServiceKind::Fred => "fred",
            ServiceKind::AlphaVantage => "alpha_vantage",
            ServiceKind::Fmp => "fmp",
            ServiceKind::CoinGecko => "coingecko",
            ServiceKind::Mempool => "mempool",
            ServiceKind::AlternativeMe => "alternative_me",
            ServiceKind::BGeometrics => "bgeometrics",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceKind::YahooFinance => "Yahoo Finance",
            ServiceKind::Fred => "FRED",
            ServiceKind::AlphaVantage => "Alpha Vantage",
            ServiceKind::Fmp => "Financial Modeling Prep",
            ServiceKind::CoinGecko => "CoinGecko",
            ServiceKind::Mempool => "Mempool.space",
            ServiceKind::AlternativeMe => "Alternative.me",
            ServiceKind::BGeometrics => "BGeometrics",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ServiceKind::YahooFinance => "https://query1.finance.yahoo.com",
            ServiceKind::Fred => "https://api.stlouisfed.org/fred",
            ServiceKind::AlphaVantage => "https://www.alphavantage.co",
            ServiceKind::Fmp => "https://financialmodelingprep.com/api/v3",
            ServiceKind::CoinGecko => "https://api.coingecko.com/api/v3",
            ServiceKind::Mempool => "https://mempool.space/api",
            ServiceKind::AlternativeMe => "https://api.alternative.me",
            ServiceKind::BGeometrics => "https://bitcoin-data.com",
        }
    }

    /// Cache TTL applied to responses from this service.
    pub fn default_ttl_secs(&self) -> u64 {
        match self {
            ServiceKind::YahooFinance | ServiceKind::CoinGecko | ServiceKind::Mempool => 900,
            ServiceKind::AlphaVantage => 1800,
            ServiceKind::Fmp | ServiceKind::AlternativeMe => 3600,
            ServiceKind::Fred | ServiceKind::BGeometrics => 7200,
        }
    }

    pub fn default_requests_per_minute(&self) -> u32 {
        match self {
            ServiceKind::AlphaVantage => 5,
            ServiceKind::CoinGecko => 30,
            ServiceKind::BGeometrics => 10,
            ServiceKind::Fred => 120,
            ServiceKind::Fmp => 250,
            ServiceKind::YahooFinance | ServiceKind::Mempool | ServiceKind::AlternativeMe => 60,
        }
    }

    /// Environment variable holding this service's API key, if it takes one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ServiceKind::Fred => Some("FRED_API_KEY"),
            ServiceKind::AlphaVantage => Some("ALPHA_VANTAGE_API_KEY"),
            ServiceKind::Fmp => Some("FMP_API_KEY"),
            ServiceKind::CoinGecko => Some("COINGECKO_API_KEY"),
            _ => None,
        }
    }

    /// CoinGecko works without a key on the public tier.
    pub fn api_key_required(&self) -> bool {
        matches!(self, ServiceKind::Fred | ServiceKind::AlphaVantage | ServiceKind::Fmp)
    }

    pub fn api_key_placement(&self) -> Option<ApiKeyPlacement> {
        match self {
            ServiceKind::Fred => Some(ApiKeyPlacement::Query("api_key")),
            ServiceKind::AlphaVantage | ServiceKind::Fmp => Some(ApiKeyPlacement::Query("apikey")),
            ServiceKind::CoinGecko => Some(ApiKeyPlacement::Header("x-cg-demo-api-key")),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '.', ' '], "_");
        match normalized.as_str() {
            "yahoo_finance" | "yahoo" => Ok(ServiceKind::YahooFinance),
            "fred" => Ok(ServiceKind::Fred),
            "alpha_vantage" | "alphavantage" => Ok(ServiceKind::AlphaVantage),
            "fmp" => Ok(ServiceKind::Fmp),
            "coingecko" | "coin_gecko" => Ok(ServiceKind::CoinGecko),
            "mempool" | "mempool_space" => Ok(ServiceKind::Mempool),
            "alternative_me" | "alternative" | "fear_greed" => Ok(ServiceKind::AlternativeMe),
            "bgeometrics" => Ok(ServiceKind::BGeometrics),
            _ => Err(PipelineError::validation(format!("unknown service: {}", s))
                .with_context("service", s)),
        }
    }
}

/// Upper-case a ticker and reject anything that is not a plain market
/// symbol. Yahoo-style symbols (`^GSPC`, `BTC-USD`, `EURUSD=X`) pass; path
/// separators and leading dots do not.
pub fn normalize_symbol(symbol: &str) -> Result<String, PipelineError> {
    let normalized = symbol.trim().to_uppercase();
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '^' | '=' | '_' | '-');

    if normalized.is_empty()
        || normalized.len() > 32
        || normalized.starts_with('.')
        || !normalized.chars().all(allowed)
    {
        return Err(PipelineError::validation(format!("invalid symbol: {:?}", symbol))
            .with_context("symbol", symbol));
    }
    Ok(normalized)
}

/// Deployment environment; namespaces every on-disk store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Environment {
    #[default]
    #[serde(rename = "dev")]
    Development,
    #[serde(rename = "staging")]
    Staging,
    #[serde(rename = "prod")]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Staging => "staging",
            Environment::Production => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(PipelineError::validation(format!("unknown environment: {}", other))),
        }
    }
}

/// Kind of data kept in the historical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Prices,
    Quote,
    Fundamentals,
    Macro,
    Sentiment,
    Onchain,
    Network,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Prices => "prices",
            DataType::Quote => "quote",
            DataType::Fundamentals => "fundamentals",
            DataType::Macro => "macro",
            DataType::Sentiment => "sentiment",
            DataType::Onchain => "onchain",
            DataType::Network => "network",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prices" => Ok(DataType::Prices),
            "quote" => Ok(DataType::Quote),
            "fundamentals" => Ok(DataType::Fundamentals),
            "macro" => Ok(DataType::Macro),
            "sentiment" => Ok(DataType::Sentiment),
            "onchain" => Ok(DataType::Onchain),
            "network" => Ok(DataType::Network),
            other => Err(PipelineError::validation(format!("unknown data type: {}", other))),
        }
    }
}

/// Symbol and data type under which a response is also kept long-term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalTarget {
    pub symbol: String,
    pub data_type: DataType,
}

/// A cacheable request: the service, the endpoint it hits and its parameters.
///
/// Parameters live in a `BTreeMap` so the derived key does not depend on the
/// order callers inserted them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub service: ServiceKind,
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    pub historical: Option<HistoricalTarget>,
}

impl CacheRequest {
    pub fn new(service: ServiceKind, endpoint: impl Into<String>) -> Self {
        Self {
            service,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            historical: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn param_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    /// Also persist the response into the historical store.
    pub fn keep_history(mut self, symbol: impl Into<String>, data_type: DataType) -> Self {
        self.historical = Some(HistoricalTarget {
            symbol: symbol.into(),
            data_type,
        });
        self
    }

    /// `service:endpoint:a=1&b=2`, the text that gets hashed into the key.
    pub fn canonical(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}:{}", self.service.as_str(), self.endpoint, params)
    }

    /// MD5 hex digest of the canonical form.
    pub fn key(&self) -> String {
        let digest = Md5::digest(self.canonical().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Repository trait for the in-process hot cache tier.
///
/// Implementations must be thread-safe (`Send + Sync`) so the cache can be
/// shared with background collection tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Retrieve a cached value by key.
    ///
    /// Returns `Ok(None)` when the key is absent or expired; never errors on a
    /// plain miss.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Store a value with a time-to-live in seconds.
    async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) -> anyhow::Result<()>;

    /// Drop a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Drop every key.
    async fn clear(&self) -> anyhow::Result<()>;

    /// Number of live entries.
    async fn len(&self) -> usize;
}
