//! Cache-first access to every provider operation.
//!
//! Each operation is described by a [`DataRequest`]; the service turns it
//! into a [`CacheRequest`], serves it from the cache when fresh and calls the
//! matching client otherwise.

use crate::application::auto_collection::AutoCollector;
use crate::application::unified_cache::UnifiedCache;
use crate::domain::{
    normalize_symbol, AppConfig, CacheRequest, DataType, FearGreedReading, FredObservation,
    PriceBar, Quote, ServiceKind,
};
use crate::infrastructure::services::{
    alternative_me, fred, yahoo, AlphaVantageClient, AlternativeMeClient, BGeometricsClient,
    CoinGeckoClient, FmpClient, FredClient, MempoolClient, ServiceClient, YahooFinanceClient,
};
use anyhow::Result;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Symbol used to file the Fear & Greed history.
const FEAR_GREED_SYMBOL: &str = "FEAR_GREED";
/// Symbol used to file Bitcoin network snapshots.
const BITCOIN_SYMBOL: &str = "BTC";

/// One operation against one provider.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    YahooQuote { symbol: String },
    YahooHistory { symbol: String, range: String, interval: String },
    YahooSearch { query: String },
    FredSeries { series_id: String, start: Option<NaiveDate>, end: Option<NaiveDate> },
    FredSeriesInfo { series_id: String },
    FredSearch { text: String, limit: u32 },
    AlphaVantageQuote { symbol: String },
    AlphaVantageDaily { symbol: String, output_size: String },
    AlphaVantageOverview { symbol: String },
    FmpQuote { symbol: String },
    FmpProfile { symbol: String },
    FmpIncomeStatement { symbol: String, period: String, limit: u32 },
    FmpHistoricalPrices { symbol: String },
    CoinGeckoPrice { ids: Vec<String>, vs_currency: String },
    CoinGeckoMarketChart { id: String, vs_currency: String, days: u32 },
    CoinGeckoGlobal,
    MempoolFees,
    MempoolTipHeight,
    MempoolDifficulty,
    MempoolStats,
    MempoolHashrate { period: String },
    FearGreed { limit: u32 },
    OnchainMetric { metric: String },
    OnchainMetricLatest { metric: String },
}

impl DataRequest {
    pub fn service(&self) -> ServiceKind {
        use DataRequest::*;
        match self {
            YahooQuote { .. } | YahooHistory { .. } | YahooSearch { .. } => ServiceKind::YahooFinance,
            FredSeries { .. } | FredSeriesInfo { .. } | FredSearch { .. } => ServiceKind::Fred,
            AlphaVantageQuote { .. } | AlphaVantageDaily { .. } | AlphaVantageOverview { .. } => {
                ServiceKind::AlphaVantage
            }
            FmpQuote { .. } | FmpProfile { .. } | FmpIncomeStatement { .. } | FmpHistoricalPrices { .. } => {
                ServiceKind::Fmp
            }
            CoinGeckoPrice { .. } | CoinGeckoMarketChart { .. } | CoinGeckoGlobal => ServiceKind::CoinGecko,
            MempoolFees | MempoolTipHeight | MempoolDifficulty | MempoolStats | MempoolHashrate { .. } => {
                ServiceKind::Mempool
            }
            FearGreed { .. } => ServiceKind::AlternativeMe,
            OnchainMetric { .. } | OnchainMetricLatest { .. } => ServiceKind::BGeometrics,
        }
    }

    /// Cache identity of the request. Symbols are normalized first so `aapl`
    /// and `AAPL` share an entry.
    pub fn cache_request(&self) -> Result<CacheRequest> {
        use DataRequest::*;
        let service = self.service();
        let request = match self {
            YahooQuote { symbol } => {
                let symbol = normalize_symbol(symbol)?;
                CacheRequest::new(service, "quote")
                    .param("symbol", &symbol)
                    .keep_history(symbol, DataType::Quote)
            }
            YahooHistory { symbol, range, interval } => {
                let symbol = normalize_symbol(symbol)?;
                CacheRequest::new(service, "history")
                    .param("symbol", &symbol)
                    .param("range", range)
                    .param("interval", interval)
                    .keep_history(symbol, DataType::Prices)
            }
            YahooSearch { query } => CacheRequest::new(service, "search").param("q", query.trim()),
            FredSeries { series_id, start, end } => {
                let id = series_id.trim().to_uppercase();
                CacheRequest::new(service, "series/observations")
                    .param("series_id", &id)
                    .param_opt("observation_start", *start)
                    .param_opt("observation_end", *end)
                    .keep_history(id, DataType::Macro)
            }
            FredSeriesInfo { series_id } => {
                CacheRequest::new(service, "series").param("series_id", series_id.trim().to_uppercase())
            }
            FredSearch { text, limit } => CacheRequest::new(service, "series/search")
                .param("search_text", text.trim())
                .param("limit", limit),
            AlphaVantageQuote { symbol } => {
                CacheRequest::new(service, "GLOBAL_QUOTE").param("symbol", normalize_symbol(symbol)?)
            }
            AlphaVantageDaily { symbol, output_size } => CacheRequest::new(service, "TIME_SERIES_DAILY")
                .param("symbol", normalize_symbol(symbol)?)
                .param("outputsize", output_size),
            AlphaVantageOverview { symbol } => {
                CacheRequest::new(service, "OVERVIEW").param("symbol", normalize_symbol(symbol)?)
            }
            FmpQuote { symbol } => CacheRequest::new(service, "quote").param("symbol", normalize_symbol(symbol)?),
            FmpProfile { symbol } => {
                let symbol = normalize_symbol(symbol)?;
                CacheRequest::new(service, "profile")
                    .param("symbol", &symbol)
                    .keep_history(symbol, DataType::Fundamentals)
            }
            FmpIncomeStatement { symbol, period, limit } => CacheRequest::new(service, "income-statement")
                .param("symbol", normalize_symbol(symbol)?)
                .param("period", period)
                .param("limit", limit),
            FmpHistoricalPrices { symbol } => {
                CacheRequest::new(service, "historical-price-full").param("symbol", normalize_symbol(symbol)?)
            }
            CoinGeckoPrice { ids, vs_currency } => {
                let mut ids: Vec<String> = ids.iter().map(|id| id.trim().to_lowercase()).collect();
                ids.sort();
                CacheRequest::new(service, "simple/price")
                    .param("ids", ids.join(","))
                    .param("vs_currencies", vs_currency.to_lowercase())
            }
            CoinGeckoMarketChart { id, vs_currency, days } => CacheRequest::new(service, "market_chart")
                .param("id", id.trim().to_lowercase())
                .param("vs_currency", vs_currency.to_lowercase())
                .param("days", days),
            CoinGeckoGlobal => CacheRequest::new(service, "global"),
            MempoolFees => {
                CacheRequest::new(service, "fees/recommended").keep_history(BITCOIN_SYMBOL, DataType::Network)
            }
            MempoolTipHeight => CacheRequest::new(service, "blocks/tip/height"),
            MempoolDifficulty => CacheRequest::new(service, "difficulty-adjustment"),
            MempoolStats => CacheRequest::new(service, "mempool"),
            MempoolHashrate { period } => CacheRequest::new(service, "mining/hashrate").param("period", period),
            FearGreed { limit } => CacheRequest::new(service, "fng")
                .param("limit", limit)
                .keep_history(FEAR_GREED_SYMBOL, DataType::Sentiment),
            OnchainMetric { metric } => CacheRequest::new(service, "metric")
                .param("metric", metric)
                .keep_history(metric.to_uppercase(), DataType::Onchain),
            OnchainMetricLatest { metric } => CacheRequest::new(service, "metric/last").param("metric", metric),
        };
        Ok(request)
    }
}

pub struct MarketDataService {
    cache: Arc<UnifiedCache>,
    collector: AutoCollector,
    yahoo: YahooFinanceClient,
    fred: FredClient,
    alpha_vantage: AlphaVantageClient,
    fmp: FmpClient,
    coingecko: CoinGeckoClient,
    mempool: MempoolClient,
    alternative_me: AlternativeMeClient,
    bgeometrics: BGeometricsClient,
}

impl MarketDataService {
    pub fn from_config(config: &AppConfig, cache: Arc<UnifiedCache>) -> Result<Self> {
        let service = Self {
            cache,
            collector: AutoCollector::new(&config.auto_collection),
            yahoo: YahooFinanceClient::new(config.service(ServiceKind::YahooFinance))?,
            fred: FredClient::new(config.service(ServiceKind::Fred))?,
            alpha_vantage: AlphaVantageClient::new(config.service(ServiceKind::AlphaVantage))?,
            fmp: FmpClient::new(config.service(ServiceKind::Fmp))?,
            coingecko: CoinGeckoClient::new(config.service(ServiceKind::CoinGecko))?,
            mempool: MempoolClient::new(config.service(ServiceKind::Mempool))?,
            alternative_me: AlternativeMeClient::new(config.service(ServiceKind::AlternativeMe))?,
            bgeometrics: BGeometricsClient::new(config.service(ServiceKind::BGeometrics))?,
        };
        info!(
            "Initialized MarketDataService ({} of {} services configured)",
            service.clients().iter().filter(|c| c.is_configured()).count(),
            ServiceKind::ALL.len()
        );
        Ok(service)
    }

    /// Replace the auto collector, e.g. to switch collection off.
    pub fn with_collector(mut self, collector: AutoCollector) -> Self {
        self.collector = collector;
        self
    }

    pub fn cache(&self) -> &Arc<UnifiedCache> {
        &self.cache
    }

    pub fn clients(&self) -> Vec<&dyn ServiceClient> {
        ServiceKind::ALL.iter().map(|kind| self.client(*kind)).collect()
    }

    pub fn client(&self, kind: ServiceKind) -> &dyn ServiceClient {
        match kind {
            ServiceKind::YahooFinance => &self.yahoo,
            ServiceKind::Fred => &self.fred,
            ServiceKind::AlphaVantage => &self.alpha_vantage,
            ServiceKind::Fmp => &self.fmp,
            ServiceKind::CoinGecko => &self.coingecko,
            ServiceKind::Mempool => &self.mempool,
            ServiceKind::AlternativeMe => &self.alternative_me,
            ServiceKind::BGeometrics => &self.bgeometrics,
        }
    }

    /// Serve the request from cache, or from the provider on a miss.
    /// `refresh` skips the cache reads. A quote also starts background
    /// collection of the symbol's history.
    pub async fn execute(&self, request: &DataRequest, refresh: bool) -> Result<Value> {
        let value = self.execute_cached(request, refresh).await?;
        if let DataRequest::YahooQuote { symbol } = request {
            self.collect_history(symbol);
        }
        Ok(value)
    }

    async fn execute_cached(&self, request: &DataRequest, refresh: bool) -> Result<Value> {
        let cache_request = request.cache_request()?;
        debug!("Executing {:?} (refresh: {})", request, refresh);

        if refresh {
            self.cache.refresh(&cache_request, || self.fetch_remote(request)).await
        } else {
            self.cache.get_or_fetch(&cache_request, || self.fetch_remote(request)).await
        }
    }

    async fn fetch_remote(&self, request: &DataRequest) -> Result<Value> {
        use DataRequest::*;
        match request {
            YahooQuote { symbol } => self.yahoo.fetch_quote(symbol).await,
            YahooHistory { symbol, range, interval } => self.yahoo.fetch_history(symbol, range, interval).await,
            YahooSearch { query } => self.yahoo.fetch_search(query).await,
            FredSeries { series_id, start, end } => {
                self.fred.fetch_series_observations(series_id, *start, *end).await
            }
            FredSeriesInfo { series_id } => self.fred.fetch_series_info(series_id).await,
            FredSearch { text, limit } => self.fred.search_series(text, *limit).await,
            AlphaVantageQuote { symbol } => self.alpha_vantage.fetch_global_quote(symbol).await,
            AlphaVantageDaily { symbol, output_size } => {
                self.alpha_vantage.fetch_daily_series(symbol, output_size).await
            }
            AlphaVantageOverview { symbol } => self.alpha_vantage.fetch_company_overview(symbol).await,
            FmpQuote { symbol } => self.fmp.fetch_quote(symbol).await,
            FmpProfile { symbol } => self.fmp.fetch_profile(symbol).await,
            FmpIncomeStatement { symbol, period, limit } => {
                self.fmp.fetch_income_statement(symbol, period, *limit).await
            }
            FmpHistoricalPrices { symbol } => self.fmp.fetch_historical_prices(symbol).await,
            CoinGeckoPrice { ids, vs_currency } => {
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                self.coingecko.fetch_simple_price(&ids, vs_currency).await
            }
            CoinGeckoMarketChart { id, vs_currency, days } => {
                self.coingecko.fetch_market_chart(id, vs_currency, *days).await
            }
            CoinGeckoGlobal => self.coingecko.fetch_global().await,
            MempoolFees => self.mempool.fetch_recommended_fees().await,
            MempoolTipHeight => self.mempool.fetch_block_height().await,
            MempoolDifficulty => self.mempool.fetch_difficulty_adjustment().await,
            MempoolStats => self.mempool.fetch_mempool_stats().await,
            MempoolHashrate { period } => self.mempool.fetch_hashrate(period).await,
            FearGreed { limit } => self.alternative_me.fetch_fear_greed(*limit).await,
            OnchainMetric { metric } => self.bgeometrics.fetch_metric(metric).await,
            OnchainMetricLatest { metric } => self.bgeometrics.fetch_metric_latest(metric).await,
        }
    }

    /// Pull the symbol's full daily history into the cache and historical
    /// store in the background. `None` when collection is off or throttled.
    pub fn collect_history(&self, symbol: &str) -> Option<JoinHandle<()>> {
        let Ok(symbol) = normalize_symbol(symbol) else {
            return None;
        };
        let cache = self.cache.clone();
        let yahoo = self.yahoo.clone();
        let range = self.collector.history_range().to_string();

        self.collector.trigger(&symbol, move |symbol| async move {
            let request = DataRequest::YahooHistory {
                symbol: symbol.clone(),
                range: range.clone(),
                interval: "1d".to_string(),
            };
            let cache_request = request.cache_request()?;
            cache
                .get_or_fetch(&cache_request, || yahoo.fetch_history(&symbol, &range, "1d"))
                .await?;
            Ok(())
        })
    }

    pub async fn quote(&self, symbol: &str, refresh: bool) -> Result<Quote> {
        let value = self
            .execute(&DataRequest::YahooQuote { symbol: symbol.to_string() }, refresh)
            .await?;
        yahoo::parse_quote(symbol, &value)
    }

    /// Quote for callers that fetch history themselves and start collection
    /// with [`collect_history`](Self::collect_history) afterwards.
    pub async fn quote_without_collection(&self, symbol: &str, refresh: bool) -> Result<Quote> {
        let value = self
            .execute_cached(&DataRequest::YahooQuote { symbol: symbol.to_string() }, refresh)
            .await?;
        yahoo::parse_quote(symbol, &value)
    }

    pub async fn daily_bars(&self, symbol: &str, range: &str) -> Result<Vec<PriceBar>> {
        let request = DataRequest::YahooHistory {
            symbol: symbol.to_string(),
            range: range.to_string(),
            interval: "1d".to_string(),
        };
        yahoo::parse_bars(&self.execute(&request, false).await?)
    }

    pub async fn fred_observations(
        &self,
        series_id: &str,
        start: Option<NaiveDate>,
    ) -> Result<Vec<FredObservation>> {
        let request = DataRequest::FredSeries {
            series_id: series_id.to_string(),
            start,
            end: None,
        };
        fred::parse_observations(&self.execute(&request, false).await?)
    }

    pub async fn fear_greed(&self, limit: u32) -> Result<Vec<FearGreedReading>> {
        let value = self.execute(&DataRequest::FearGreed { limit }, false).await?;
        alternative_me::parse_readings(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_case_shares_cache_entry() {
        let lower = DataRequest::YahooQuote { symbol: "aapl".into() }.cache_request().unwrap();
        let upper = DataRequest::YahooQuote { symbol: "AAPL".into() }.cache_request().unwrap();
        assert_eq!(lower.key(), upper.key());
        assert_eq!(upper.historical.unwrap().data_type, DataType::Quote);
    }

    #[test]
    fn test_coin_order_does_not_change_key() {
        let a = DataRequest::CoinGeckoPrice {
            ids: vec!["ethereum".into(), "bitcoin".into()],
            vs_currency: "usd".into(),
        };
        let b = DataRequest::CoinGeckoPrice {
            ids: vec!["Bitcoin".into(), "ethereum".into()],
            vs_currency: "USD".into(),
        };
        assert_eq!(a.cache_request().unwrap().key(), b.cache_request().unwrap().key());
    }

    #[test]
    fn test_history_ranges_are_distinct_entries() {
        let one_year = DataRequest::YahooHistory {
            symbol: "SPY".into(),
            range: "1y".into(),
            interval: "1d".into(),
        };
        let five_years = DataRequest::YahooHistory {
            symbol: "SPY".into(),
            range: "5y".into(),
            interval: "1d".into(),
        };
        assert_ne!(
            one_year.cache_request().unwrap().key(),
            five_years.cache_request().unwrap().key()
        );
    }

    #[test]
    fn test_service_routing() {
        assert_eq!(DataRequest::MempoolFees.service(), ServiceKind::Mempool);
        assert_eq!(DataRequest::FearGreed { limit: 1 }.service(), ServiceKind::AlternativeMe);
        assert_eq!(
            DataRequest::OnchainMetric { metric: "mvrv".into() }.service(),
            ServiceKind::BGeometrics
        );
    }

    #[test]
    fn test_invalid_symbol_fails_before_cache() {
        let err = DataRequest::FmpProfile { symbol: "../x".into() }.cache_request().unwrap_err();
        assert!(err.downcast_ref::<crate::domain::PipelineError>().is_some());
    }
}
