//! Yahoo Finance client (unofficial chart and search endpoints).

use super::{ensure_one_of, ServiceClient};
use crate::domain::{normalize_symbol, PipelineError, PriceBar, Quote, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

pub const RANGES: &[&str] = &["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"];
pub const INTERVALS: &[&str] = &["1m", "5m", "15m", "30m", "1h", "1d", "1wk", "1mo"];

#[derive(Clone)]
pub struct YahooFinanceClient {
    http: ServiceHttpClient,
}

impl YahooFinanceClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// Current quote, taken from the one-day chart metadata.
    ///
    /// GET /v8/finance/chart/{symbol}?range=1d&interval=1d
    pub async fn fetch_quote(&self, symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        info!("Fetching Yahoo quote: {}", symbol);
        self.http
            .get_json(
                &format!("/v8/finance/chart/{}", symbol),
                &[("range", "1d".to_string()), ("interval", "1d".to_string())],
            )
            .await
    }

    /// Price history.
    ///
    /// GET /v8/finance/chart/{symbol}?range=1y&interval=1d
    pub async fn fetch_history(&self, symbol: &str, range: &str, interval: &str) -> Result<Value> {
        let symbol = normalize_symbol(symbol)?;
        ensure_one_of("range", range, RANGES)?;
        ensure_one_of("interval", interval, INTERVALS)?;
        info!("Fetching Yahoo history: {} {} {}", symbol, range, interval);
        self.http
            .get_json(
                &format!("/v8/finance/chart/{}", symbol),
                &[("range", range.to_string()), ("interval", interval.to_string())],
            )
            .await
    }

    /// Symbol search.
    ///
    /// GET /v1/finance/search?q=apple
    pub async fn fetch_search(&self, query: &str) -> Result<Value> {
        if query.trim().is_empty() {
            return Err(PipelineError::validation("search query must not be empty").into());
        }
        self.http
            .get_json(
                "/v1/finance/search",
                &[
                    ("q", query.trim().to_string()),
                    ("quotesCount", "10".to_string()),
                    ("newsCount", "0".to_string()),
                ],
            )
            .await
    }
}

#[async_trait]
impl ServiceClient for YahooFinanceClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        let value = self.fetch_quote("SPY").await?;
        parse_quote("SPY", &value)?;
        Ok(())
    }
}

/// First chart result, or the provider's error description.
fn chart_result(value: &Value) -> Result<&Value> {
    let chart = &value["chart"];
    if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
        let description = error["description"].as_str().unwrap_or("unknown chart error");
        return Err(PipelineError::data(format!("Yahoo chart error: {}", description))
            .with_context("code", error["code"].clone())
            .into());
    }
    chart["result"]
        .get(0)
        .ok_or_else(|| PipelineError::data("Yahoo chart response has no result").into())
}

/// Build a [`Quote`] from a chart response.
pub fn parse_quote(symbol: &str, value: &Value) -> Result<Quote> {
    let meta = &chart_result(value)?["meta"];
    let price = meta["regularMarketPrice"].as_f64().ok_or_else(|| {
        PipelineError::data("Yahoo quote has no regularMarketPrice").with_context("symbol", symbol)
    })?;
    let previous_close = meta["chartPreviousClose"]
        .as_f64()
        .or_else(|| meta["previousClose"].as_f64());
    let change_percent = previous_close
        .filter(|prev| *prev > 0.0)
        .map(|prev| (price / prev - 1.0) * 100.0);
    let timestamp = meta["regularMarketTime"]
        .as_i64()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Ok(Quote {
        symbol: meta["symbol"].as_str().unwrap_or(symbol).to_string(),
        price,
        previous_close,
        change_percent,
        currency: meta["currency"].as_str().map(str::to_string),
        exchange: meta["exchangeName"].as_str().map(str::to_string),
        volume: meta["regularMarketVolume"].as_u64(),
        timestamp,
        source: "yahoo_finance".to_string(),
    })
}

/// Build daily bars from a chart response, skipping bars with gaps.
pub fn parse_bars(value: &Value) -> Result<Vec<PriceBar>> {
    let result = chart_result(value)?;
    let empty = Vec::new();
    let timestamps = result["timestamp"].as_array().unwrap_or(&empty);
    let quote = &result["indicators"]["quote"][0];

    let column = |name: &str| quote[name].as_array().cloned().unwrap_or_default();
    let (opens, highs, lows, closes, volumes) = (
        column("open"),
        column("high"),
        column("low"),
        column("close"),
        column("volume"),
    );

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let fields = (
            ts.as_i64().and_then(|t| DateTime::from_timestamp(t, 0)),
            opens.get(i).and_then(Value::as_f64),
            highs.get(i).and_then(Value::as_f64),
            lows.get(i).and_then(Value::as_f64),
            closes.get(i).and_then(Value::as_f64),
        );
        if let (Some(time), Some(open), Some(high), Some(low), Some(close)) = fields {
            bars.push(PriceBar {
                date: time.date_naive(),
                open,
                high,
                low,
                close,
                volume: volumes.get(i).and_then(Value::as_u64).unwrap_or(0),
            });
        }
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_fixture() -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "AAPL",
                        "currency": "USD",
                        "exchangeName": "NMS",
                        "regularMarketPrice": 110.0,
                        "chartPreviousClose": 100.0,
                        "regularMarketVolume": 5_000_000u64,
                        "regularMarketTime": 1_709_856_000
                    },
                    "timestamp": [1_709_596_800, 1_709_683_200, 1_709_769_600],
                    "indicators": {
                        "quote": [{
                            "open": [100.0, null, 104.0],
                            "high": [101.0, 103.0, 111.0],
                            "low": [99.0, 100.0, 103.5],
                            "close": [100.5, 102.0, 110.0],
                            "volume": [1000, 2000, null]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_parse_quote() {
        let quote = parse_quote("aapl", &chart_fixture()).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, 110.0);
        assert_eq!(quote.previous_close, Some(100.0));
        assert!((quote.change_percent.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(quote.currency.as_deref(), Some("USD"));
        assert_eq!(quote.volume, Some(5_000_000));
        assert_eq!(quote.timestamp.timestamp(), 1_709_856_000);
    }

    #[test]
    fn test_parse_bars_skips_gaps() {
        let bars = parse_bars(&chart_fixture()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[1].close, 110.0);
        assert_eq!(bars[1].volume, 0);
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn test_chart_error_is_data_error() {
        let value = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let err = parse_quote("ZZZZ", &value).unwrap_err();
        let inner = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(inner.kind(), "DataError");
        assert!(err.to_string().contains("delisted"));
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected_before_request() {
        let client = YahooFinanceClient::new(ServiceSettings::defaults(crate::domain::ServiceKind::YahooFinance)).unwrap();
        let err = client.fetch_history("AAPL", "7y", "1d").await.unwrap_err();
        assert!(err.to_string().contains("invalid range"));

        let err = client.fetch_quote("../secrets").await.unwrap_err();
        assert_eq!(err.downcast_ref::<PipelineError>().unwrap().kind(), "ValidationError");
    }
}
