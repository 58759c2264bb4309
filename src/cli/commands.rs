//! CLI command definitions and handlers.

use super::output::{self, OutputFormat};
use crate::application::{discovery, health, DataRequest, DiscoveryService, MarketDataService, UnifiedCache};
use crate::domain::{AppConfig, DataType, Environment, ServiceKind};
use crate::mcp::{serve_stdio, McpServer};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Personal finance data pipeline
#[derive(Parser, Debug)]
#[command(
    name = "finance-data-pipeline",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fetch, cache and archive market, macro and on-chain data",
    long_about = "Pulls quotes, price history, fundamentals, macro series, sentiment and Bitcoin \
                  network data from public APIs through a memory, file and historical cache."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Environment namespacing the cache, history and output directories
    #[arg(long, global = true, env = "APP_ENV")]
    pub env: Option<Environment>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub output_format: OutputFormat,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "FILE", env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch data from one provider operation
    Fetch(FetchCmd),

    /// Check that the providers respond
    Health {
        /// Only check this service
        #[arg(long)]
        service: Option<ServiceKind>,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect the historical store
    Historical {
        #[command(subcommand)]
        action: HistoricalAction,
    },

    /// Build a discovery document for a ticker
    Discover {
        ticker: String,

        /// Defaults to the configured output directory
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Validate a discovery document
    Validate { file: PathBuf },

    /// Serve MCP tools over stdio
    Mcp,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Entry counts, sizes and hit rates
    Stats,
    /// Delete cached entries
    Clear {
        #[arg(long)]
        service: Option<ServiceKind>,
    },
    /// Delete entries older than their TTL
    Cleanup,
}

#[derive(Subcommand, Debug)]
pub enum HistoricalAction {
    /// Symbols with stored history
    Symbols,
    /// Index entry for a symbol, one stored day or a range of days
    Show {
        symbol: String,
        #[arg(long)]
        data_type: Option<DataType>,
        /// Day to load (YYYY-MM-DD); latest when omitted
        #[arg(long, requires = "data_type", conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,
        /// First day of a range to load (inclusive)
        #[arg(long, requires = "data_type")]
        from: Option<NaiveDate>,
        /// Last day of a range to load (inclusive)
        #[arg(long, requires = "data_type")]
        to: Option<NaiveDate>,
    },
    /// Rebuild metadata.json from the files on disk
    RebuildIndex,
}

#[derive(Args, Debug)]
pub struct FetchCmd {
    #[command(subcommand)]
    pub operation: FetchOp,

    /// Skip the cache and fetch from the provider
    #[arg(long, global = true)]
    pub refresh: bool,
}

#[derive(Subcommand, Debug)]
pub enum FetchOp {
    /// Yahoo Finance quote
    YahooQuote { symbol: String },
    /// Yahoo Finance price history
    YahooHistory {
        symbol: String,
        #[arg(long, default_value = "1y")]
        range: String,
        #[arg(long, default_value = "1d")]
        interval: String,
    },
    /// Yahoo Finance symbol search
    YahooSearch { query: String },
    /// FRED series observations
    FredSeries {
        series_id: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// FRED series metadata
    FredInfo { series_id: String },
    /// FRED series search
    FredSearch {
        text: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Alpha Vantage global quote
    AvQuote { symbol: String },
    /// Alpha Vantage daily series
    AvDaily {
        symbol: String,
        #[arg(long, default_value = "compact")]
        output_size: String,
    },
    /// Alpha Vantage company overview
    AvOverview { symbol: String },
    /// FMP quote
    FmpQuote { symbol: String },
    /// FMP company profile
    FmpProfile { symbol: String },
    /// FMP income statements
    FmpIncome {
        symbol: String,
        #[arg(long, default_value = "annual")]
        period: String,
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// FMP full price history
    FmpHistory { symbol: String },
    /// CoinGecko spot prices
    CoingeckoPrice {
        /// Comma separated coin ids, e.g. bitcoin,ethereum
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<String>,
        #[arg(long, default_value = "usd")]
        vs: String,
    },
    /// CoinGecko market chart
    CoingeckoChart {
        id: String,
        #[arg(long, default_value = "usd")]
        vs: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// CoinGecko global market totals
    CoingeckoGlobal,
    /// Mempool.space recommended fees
    MempoolFees,
    /// Mempool.space tip height
    MempoolHeight,
    /// Mempool.space difficulty adjustment
    MempoolDifficulty,
    /// Mempool.space mempool statistics
    MempoolStats,
    /// Mempool.space network hashrate
    MempoolHashrate {
        #[arg(long, default_value = "1m")]
        period: String,
    },
    /// Alternative.me Fear & Greed index
    FearGreed {
        #[arg(long, default_value_t = 1)]
        limit: u32,
    },
    /// BGeometrics on-chain metric
    Onchain {
        metric: String,
        /// Only the most recent value
        #[arg(long)]
        latest: bool,
    },
}

impl From<FetchOp> for DataRequest {
    fn from(op: FetchOp) -> Self {
        match op {
            FetchOp::YahooQuote { symbol } => DataRequest::YahooQuote { symbol },
            FetchOp::YahooHistory { symbol, range, interval } => {
                DataRequest::YahooHistory { symbol, range, interval }
            }
            FetchOp::YahooSearch { query } => DataRequest::YahooSearch { query },
            FetchOp::FredSeries { series_id, start, end } => DataRequest::FredSeries { series_id, start, end },
            FetchOp::FredInfo { series_id } => DataRequest::FredSeriesInfo { series_id },
            FetchOp::FredSearch { text, limit } => DataRequest::FredSearch { text, limit },
            FetchOp::AvQuote { symbol } => DataRequest::AlphaVantageQuote { symbol },
            FetchOp::AvDaily { symbol, output_size } => DataRequest::AlphaVantageDaily { symbol, output_size },
            FetchOp::AvOverview { symbol } => DataRequest::AlphaVantageOverview { symbol },
            FetchOp::FmpQuote { symbol } => DataRequest::FmpQuote { symbol },
            FetchOp::FmpProfile { symbol } => DataRequest::FmpProfile { symbol },
            FetchOp::FmpIncome { symbol, period, limit } => {
                DataRequest::FmpIncomeStatement { symbol, period, limit }
            }
            FetchOp::FmpHistory { symbol } => DataRequest::FmpHistoricalPrices { symbol },
            FetchOp::CoingeckoPrice { ids, vs } => DataRequest::CoinGeckoPrice { ids, vs_currency: vs },
            FetchOp::CoingeckoChart { id, vs, days } => {
                DataRequest::CoinGeckoMarketChart { id, vs_currency: vs, days }
            }
            FetchOp::CoingeckoGlobal => DataRequest::CoinGeckoGlobal,
            FetchOp::MempoolFees => DataRequest::MempoolFees,
            FetchOp::MempoolHeight => DataRequest::MempoolTipHeight,
            FetchOp::MempoolDifficulty => DataRequest::MempoolDifficulty,
            FetchOp::MempoolStats => DataRequest::MempoolStats,
            FetchOp::MempoolHashrate { period } => DataRequest::MempoolHashrate { period },
            FetchOp::FearGreed { limit } => DataRequest::FearGreed { limit },
            FetchOp::Onchain { metric, latest: false } => DataRequest::OnchainMetric { metric },
            FetchOp::Onchain { metric, latest: true } => DataRequest::OnchainMetricLatest { metric },
        }
    }
}

/// Load configuration with the command line's environment applied.
pub fn load_config(app: &CliApp) -> Result<AppConfig> {
    let mut config = AppConfig::load(&app.config)?;
    if let Some(env) = app.env {
        config.environment = env;
    }
    info!("Using environment {}", config.environment);
    Ok(config)
}

/// Run the command. Returns false when the command completed but reports a
/// failure (an unhealthy service) so the caller can set the exit status.
pub async fn execute(app: CliApp) -> Result<bool> {
    let config = load_config(&app)?;
    let format = app.output_format;
    let cache = Arc::new(UnifiedCache::from_config(&config));

    match app.command {
        Command::Cache { action } => {
            match action {
                CacheAction::Stats => output::print(&cache.stats().await?, format)?,
                CacheAction::Clear { service } => {
                    let removed = cache.clear(service).await?;
                    output::print(&json!({ "removed": removed, "service": service }), format)?;
                }
                CacheAction::Cleanup => {
                    let removed = cache.cleanup_expired()?;
                    output::print(&json!({ "removed": removed }), format)?;
                }
            }
            return Ok(true);
        }
        Command::Historical { action } => {
            let store = cache
                .historical()
                .context("historical storage is disabled in the configuration")?;
            match action {
                HistoricalAction::Symbols => output::print(&store.list_symbols()?, format)?,
                HistoricalAction::Show { symbol, data_type, date, from, to } => match (data_type, date, from, to) {
                    (None, ..) => output::print(&store.symbol_metadata(&symbol)?, format)?,
                    (Some(data_type), Some(date), ..) => {
                        let value = store.load(&symbol, data_type, date)?;
                        output::print(&value, format)?
                    }
                    (Some(data_type), None, None, None) => {
                        let latest = store
                            .load_latest(&symbol, data_type)?
                            .map(|(date, data)| json!({ "date": date, "data": data }));
                        output::print(&latest, format)?
                    }
                    (Some(data_type), None, from, to) => {
                        let days: Vec<_> = store
                            .load_range(
                                &symbol,
                                data_type,
                                from.unwrap_or(NaiveDate::MIN),
                                to.unwrap_or(NaiveDate::MAX),
                            )?
                            .into_iter()
                            .map(|(date, data)| json!({ "date": date, "data": data }))
                            .collect();
                        output::print(&days, format)?
                    }
                },
                HistoricalAction::RebuildIndex => output::print(&store.rebuild_index()?, format)?,
            }
            return Ok(true);
        }
        Command::Validate { file } => {
            let doc = discovery::validate_file(&file)?;
            output::print(
                &json!({
                    "valid": true,
                    "file": file.display().to_string(),
                    "ticker": doc.metadata.ticker,
                    "confidence": doc.metadata.confidence,
                    "data_gaps": doc.data_gaps.len(),
                }),
                format,
            )?;
            return Ok(true);
        }
        _ => {}
    }

    let market = Arc::new(MarketDataService::from_config(&config, cache)?);
    match app.command {
        Command::Fetch(cmd) => {
            let request = DataRequest::from(cmd.operation);
            let value = market.execute(&request, cmd.refresh).await?;
            output::print(&value, format)?;
        }
        Command::Health { service } => {
            let clients = match service {
                Some(kind) => vec![market.client(kind)],
                None => market.clients(),
            };
            let report = health::check_all(clients).await;
            output::print(&report, format)?;
            return Ok(report.is_ok());
        }
        Command::Discover { ticker, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir());
            let service = DiscoveryService::new(market.clone(), config.environment);
            let doc = service.discover(&ticker).await?;
            let path = service.write(&doc, &output_dir)?;
            output::print(
                &json!({
                    "file": path.display().to_string(),
                    "ticker": doc.metadata.ticker,
                    "confidence": doc.metadata.confidence,
                    "data_sources": doc.metadata.data_sources,
                    "data_gaps": doc.data_gaps,
                }),
                format,
            )?;
        }
        Command::Mcp => {
            serve_stdio(McpServer::new(market, config.output_dir())).await?;
        }
        Command::Cache { .. } | Command::Historical { .. } | Command::Validate { .. } => {}
    }
    Ok(true)
}
