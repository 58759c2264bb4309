//! One client per external data provider.
//!
//! Clients only fetch; they return the provider's JSON untouched so the
//! cache stores exactly what the provider sent. Typed views are produced by
//! the `parse_*` helpers next to each client.

pub mod alpha_vantage;
pub mod alternative_me;
pub mod bgeometrics;
pub mod coingecko;
pub mod fmp;
pub mod fred;
pub mod mempool;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageClient;
pub use alternative_me::AlternativeMeClient;
pub use bgeometrics::BGeometricsClient;
pub use coingecko::CoinGeckoClient;
pub use fmp::FmpClient;
pub use fred::FredClient;
pub use mempool::MempoolClient;
pub use yahoo::YahooFinanceClient;

use crate::domain::{ServiceKind, ServiceSettings};
use async_trait::async_trait;

/// Common surface of every provider client.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn settings(&self) -> &ServiceSettings;

    fn kind(&self) -> ServiceKind {
        self.settings().kind
    }

    /// Whether the client has everything it needs (API key) to make calls.
    fn is_configured(&self) -> bool {
        self.settings().is_configured()
    }

    /// One lightweight call proving the provider is reachable.
    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Fail with a validation error unless `value` is one of `allowed`.
pub(crate) fn ensure_one_of(field: &str, value: &str, allowed: &[&str]) -> anyhow::Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(crate::domain::PipelineError::validation(format!(
            "invalid {} {:?}; expected one of {}",
            field,
            value,
            allowed.join(", ")
        ))
        .with_context("field", field)
        .with_context("value", value)
        .into())
    }
}
