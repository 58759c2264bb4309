//! Read-only MCP (Model Context Protocol) server for market data access.
//!
//! Tools are exposed as JSON-RPC 2.0 methods over stdio, one request per
//! line. Every tool goes through the same cache as the CLI.

use crate::application::discovery;
use crate::application::{DataRequest, MarketDataService};
use crate::domain::PipelineError;
use crate::infrastructure::services::{alternative_me, fred, yahoo};
use chrono::NaiveDate;
use futures::future;
use futures::FutureExt;
use jsonrpc_core::{BoxFuture, Error, ErrorCode, IoHandler, Params, Result, Value};
use jsonrpc_derive::rpc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// MCP server implementation.
#[derive(Clone)]
pub struct McpServer {
    market: Arc<MarketDataService>,
    output_dir: PathBuf,
}

impl McpServer {
    pub fn new(market: Arc<MarketDataService>, output_dir: PathBuf) -> Self {
        Self { market, output_dir }
    }

    fn run<F>(&self, request: DataRequest, parse: F) -> BoxFuture<Result<Value>>
    where
        F: FnOnce(Value) -> anyhow::Result<Value> + Send + 'static,
    {
        let market = self.market.clone();
        async move {
            let value = market.execute(&request, false).await.map_err(to_rpc_error)?;
            parse(value).map_err(to_rpc_error)
        }
        .boxed()
    }
}

/// Map a pipeline failure to a JSON-RPC error, carrying the structured
/// error document as `data`.
fn to_rpc_error(error: anyhow::Error) -> Error {
    match error.downcast_ref::<PipelineError>() {
        Some(pipeline) => {
            let code = match pipeline.kind() {
                "ValidationError" | "TypeValidationError" => ErrorCode::InvalidParams,
                _ => ErrorCode::InternalError,
            };
            Error {
                code,
                message: format!("{:#}", error),
                data: Some(pipeline.to_json()),
            }
        }
        None => Error {
            code: ErrorCode::InternalError,
            message: format!("{:#}", error),
            data: None,
        },
    }
}

fn to_value<T: serde::Serialize>(value: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Parse tool arguments given either by name (`{"symbol": "AAPL"}`) or by
/// position (`["AAPL"]`). A missing `params` member counts as `{}`.
fn parse_params<T: DeserializeOwned>(params: Params) -> Result<T> {
    match params {
        Params::None => Params::Map(Default::default()),
        other => other,
    }
    .parse()
}

fn rejected(error: Error) -> BoxFuture<Result<Value>> {
    future::ready(Err(error)).boxed()
}

#[derive(Debug, Deserialize)]
struct SymbolParams {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct HistoricalParams {
    symbol: String,
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MacroSeriesParams {
    series_id: String,
    /// YYYY-MM-DD
    #[serde(default)]
    start: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct FearGreedParams {
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MetricParams {
    metric: String,
}

#[derive(Debug, Deserialize)]
struct FileParams {
    name: String,
}

#[rpc(server)]
pub trait McpRpc {
    /// Describe the available tools.
    #[rpc(name = "list_tools")]
    fn list_tools(&self) -> Result<Value>;

    /// Current quote for a symbol.
    #[rpc(name = "get_quote", params = "raw")]
    fn get_quote(&self, params: Params) -> BoxFuture<Result<Value>>;

    /// Daily bars for a symbol.
    #[rpc(name = "get_historical", params = "raw")]
    fn get_historical(&self, params: Params) -> BoxFuture<Result<Value>>;

    /// FRED series observations.
    #[rpc(name = "get_macro_series", params = "raw")]
    fn get_macro_series(&self, params: Params) -> BoxFuture<Result<Value>>;

    /// Crypto Fear & Greed readings.
    #[rpc(name = "get_fear_greed", params = "raw")]
    fn get_fear_greed(&self, params: Params) -> BoxFuture<Result<Value>>;

    /// Bitcoin on-chain metric series.
    #[rpc(name = "get_onchain_metric", params = "raw")]
    fn get_onchain_metric(&self, params: Params) -> BoxFuture<Result<Value>>;

    /// Cache tier statistics.
    #[rpc(name = "cache_stats")]
    fn cache_stats(&self) -> BoxFuture<Result<Value>>;

    /// Discovery files available for reading.
    #[rpc(name = "list_discovery_files")]
    fn list_discovery_files(&self) -> Result<Value>;

    /// One discovery file by name.
    #[rpc(name = "read_discovery_file", params = "raw")]
    fn read_discovery_file(&self, params: Params) -> Result<Value>;
}

impl McpRpc for McpServer {
    fn list_tools(&self) -> Result<Value> {
        Ok(json!([
            {"name": "get_quote", "params": {"symbol": "string"}, "description": "Current quote from Yahoo Finance"},
            {"name": "get_historical", "params": {"symbol": "string", "range": "string?", "interval": "string?"}, "description": "Price bars from Yahoo Finance"},
            {"name": "get_macro_series", "params": {"series_id": "string", "start": "YYYY-MM-DD?"}, "description": "FRED series observations"},
            {"name": "get_fear_greed", "params": {"limit": "integer?"}, "description": "Crypto Fear & Greed index"},
            {"name": "get_onchain_metric", "params": {"metric": "string"}, "description": "BGeometrics on-chain metric"},
            {"name": "cache_stats", "params": {}, "description": "Cache tier statistics"},
            {"name": "list_discovery_files", "params": {}, "description": "Discovery documents on disk"},
            {"name": "read_discovery_file", "params": {"name": "string"}, "description": "Read one discovery document"}
        ]))
    }

    fn get_quote(&self, params: Params) -> BoxFuture<Result<Value>> {
        let SymbolParams { symbol } = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        let request = DataRequest::YahooQuote { symbol: symbol.clone() };
        self.run(request, move |value| to_value(yahoo::parse_quote(&symbol, &value)?))
    }

    fn get_historical(&self, params: Params) -> BoxFuture<Result<Value>> {
        let HistoricalParams { symbol, range, interval } = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        let request = DataRequest::YahooHistory {
            symbol,
            range: range.unwrap_or_else(|| "1y".to_string()),
            interval: interval.unwrap_or_else(|| "1d".to_string()),
        };
        self.run(request, |value| to_value(yahoo::parse_bars(&value)?))
    }

    fn get_macro_series(&self, params: Params) -> BoxFuture<Result<Value>> {
        let MacroSeriesParams { series_id, start } = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        let request = DataRequest::FredSeries { series_id, start, end: None };
        self.run(request, |value| to_value(fred::parse_observations(&value)?))
    }

    fn get_fear_greed(&self, params: Params) -> BoxFuture<Result<Value>> {
        let FearGreedParams { limit } = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        let request = DataRequest::FearGreed { limit: limit.unwrap_or(1) };
        self.run(request, |value| to_value(alternative_me::parse_readings(&value)?))
    }

    fn get_onchain_metric(&self, params: Params) -> BoxFuture<Result<Value>> {
        let MetricParams { metric } = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        self.run(DataRequest::OnchainMetric { metric }, Ok)
    }

    fn cache_stats(&self) -> BoxFuture<Result<Value>> {
        let market = self.market.clone();
        async move {
            let stats = market.cache().stats().await.map_err(to_rpc_error)?;
            to_value(stats).map_err(to_rpc_error)
        }
        .boxed()
    }

    fn list_discovery_files(&self) -> Result<Value> {
        let files = discovery::list_files(&self.output_dir).map_err(to_rpc_error)?;
        Ok(json!({ "files": files }))
    }

    fn read_discovery_file(&self, params: Params) -> Result<Value> {
        let FileParams { name } = parse_params(params)?;
        discovery::read_file(&self.output_dir, &name).map_err(to_rpc_error)
    }
}

/// Request handler with every tool registered.
pub fn io_handler(server: McpServer) -> IoHandler {
    let mut io = IoHandler::new();
    io.extend_with(server.to_delegate());
    io
}

/// Serve JSON-RPC requests from stdin until it closes.
pub async fn serve_stdio(server: McpServer) -> anyhow::Result<()> {
    let io = io_handler(server);
    info!("MCP server listening on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("MCP request: {}", line);
        if let Some(response) = io.handle_request(&line).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    info!("MCP stdin closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_become_invalid_params() {
        let err: anyhow::Error = PipelineError::validation("bad symbol").with_context("symbol", "../x").into();
        let rpc = to_rpc_error(err);
        assert_eq!(rpc.code, ErrorCode::InvalidParams);
        assert_eq!(rpc.data.unwrap()["context"]["symbol"], "../x");

        let rpc = to_rpc_error(anyhow::anyhow!("socket closed"));
        assert_eq!(rpc.code, ErrorCode::InternalError);
        assert!(rpc.data.is_none());
    }

    #[test]
    fn test_params_by_name_or_position() {
        let named: HistoricalParams = parse_params(Params::Map(
            json!({"symbol": "MSFT", "range": "5y"}).as_object().unwrap().clone(),
        ))
        .unwrap();
        assert_eq!(named.symbol, "MSFT");
        assert_eq!(named.range.as_deref(), Some("5y"));
        assert!(named.interval.is_none());

        let positional: HistoricalParams = parse_params(Params::Array(vec![json!("MSFT")])).unwrap();
        assert_eq!(positional.symbol, "MSFT");
        assert!(positional.range.is_none());

        let empty: FearGreedParams = parse_params(Params::None).unwrap();
        assert!(empty.limit.is_none());
    }

    #[test]
    fn test_missing_or_malformed_params_are_invalid() {
        let err = parse_params::<SymbolParams>(Params::None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);

        let err = parse_params::<MacroSeriesParams>(Params::Map(
            json!({"series_id": "DFF", "start": "yesterday"}).as_object().unwrap().clone(),
        ))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }
}
