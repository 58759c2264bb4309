//! Typed market data models parsed from provider responses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Latest quote for a listed symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub previous_close: Option<f64>,
    pub change_percent: Option<f64>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub volume: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Condensed statistics over a price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub observations: usize,
    pub last_close: f64,
    pub period_high: f64,
    pub period_low: f64,
    pub period_return_pct: f64,
    /// Annualised standard deviation of daily log returns, in percent.
    pub annualized_volatility_pct: Option<f64>,
}

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

impl PriceSummary {
    /// Summarise bars sorted by date. Returns `None` for an empty history.
    pub fn from_bars(bars: &[PriceBar]) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;

        let period_high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let period_low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let period_return_pct = if first.close > 0.0 {
            (last.close / first.close - 1.0) * 100.0
        } else {
            0.0
        };

        let log_returns: Vec<f64> = bars
            .windows(2)
            .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
            .map(|w| (w[1].close / w[0].close).ln())
            .collect();

        let annualized_volatility_pct = if log_returns.len() >= 2 {
            let n = log_returns.len() as f64;
            let mean = log_returns.iter().sum::<f64>() / n;
            let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0)
        } else {
            None
        };

        Some(Self {
            start_date: first.date,
            end_date: last.date,
            observations: bars.len(),
            last_close: last.close,
            period_high,
            period_low,
            period_return_pct,
            annualized_volatility_pct,
        })
    }
}

/// A FRED series observation. Missing values (".") are kept as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FredObservation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// Crypto Fear & Greed index reading from Alternative.me.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedReading {
    pub value: u8,
    pub classification: String,
    pub timestamp: DateTime<Utc>,
}
