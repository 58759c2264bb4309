//! Discovery documents: everything known about a ticker at one point in time.
//!
//! A discovery run gathers the quote and price history (required) plus
//! company profile, rates and sentiment (optional). Optional sources that
//! fail are listed in `data_gaps` and lower the document's confidence.

use crate::application::market_data_service::{DataRequest, MarketDataService};
use crate::domain::{
    normalize_symbol, Environment, FearGreedReading, PipelineError, PriceSummary, Quote, ServiceKind,
};
use crate::infrastructure::services::{fmp, fred};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

const BASE_CONFIDENCE: f64 = 0.9;
const GAP_PENALTY: f64 = 0.1;
const MIN_CONFIDENCE: f64 = 0.5;
const FILE_SUFFIX: &str = "_discovery.json";

/// Fed funds effective rate and 10-year treasury yield.
const MACRO_SERIES: [(&str, &str); 2] = [("DFF", "fed_funds_rate"), ("DGS10", "treasury_10y")];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DiscoveryMetadata {
    pub command: String,
    #[validate(length(min = 1, message = "ticker must not be empty"))]
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub environment: Environment,
    pub data_sources: Vec<String>,
    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub quote: Quote,
    pub price_summary: Option<PriceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroPoint {
    pub series_id: String,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentContext {
    pub fear_greed: FearGreedReading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub metadata: DiscoveryMetadata,
    pub market_data: MarketData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fundamentals: Option<Value>,
    /// Keyed by indicator name, e.g. `fed_funds_rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_context: Option<std::collections::BTreeMap<String, MacroPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentContext>,
    #[serde(default)]
    pub data_gaps: Vec<DataGap>,
}

impl DiscoveryDocument {
    /// `<TICKER>_<YYYYMMDD>_discovery.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}{}",
            self.metadata.ticker,
            self.metadata.generated_at.format("%Y%m%d"),
            FILE_SUFFIX
        )
    }
}

pub fn confidence_for_gaps(gaps: usize) -> f64 {
    let raw = BASE_CONFIDENCE - GAP_PENALTY * gaps as f64;
    (raw.max(MIN_CONFIDENCE) * 100.0).round() / 100.0
}

/// Check a document against the declarative and business rules, collecting
/// every violation into one validation error.
pub fn validate_document(doc: &DiscoveryDocument) -> Result<()> {
    let mut violations: Vec<String> = Vec::new();

    if let Err(errors) = doc.metadata.validate() {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        fields.sort();
        violations.extend(fields);
    }
    if doc.metadata.ticker.trim().is_empty() && !violations.iter().any(|v| v.starts_with("ticker")) {
        violations.push("ticker: ticker must not be empty".to_string());
    }

    let quote = &doc.market_data.quote;
    if !(quote.price > 0.0) {
        violations.push(format!("quote price must be positive, got {}", quote.price));
    }
    if let Some(summary) = &doc.market_data.price_summary {
        if summary.period_high < summary.period_low {
            violations.push(format!(
                "period high {} is below period low {}",
                summary.period_high, summary.period_low
            ));
        }
    }

    if violations.is_empty() {
        return Ok(());
    }
    Err(PipelineError::validation(format!(
        "discovery document for {:?} failed validation",
        doc.metadata.ticker
    ))
    .with_context("ticker", doc.metadata.ticker.clone())
    .with_context("violations", violations)
    .into())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a discovery document, reporting shape mismatches as type
/// validation errors.
pub fn parse_document(content: &str) -> Result<DiscoveryDocument> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| PipelineError::data(format!("discovery file is not valid JSON: {}", e)))?;
    let actual = json_type_name(&value);

    serde_json::from_value(value).map_err(|e| {
        PipelineError::type_validation(
            format!("discovery document has an unexpected shape: {}", e),
            "DiscoveryDocument",
            actual,
        )
        .into()
    })
}

/// Read, parse and validate a discovery file.
pub fn validate_file(path: &Path) -> Result<DiscoveryDocument> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::file("read", path, e))?;
    let doc = parse_document(&content)?;
    validate_document(&doc)?;
    info!("Validated discovery file {}", path.display());
    Ok(doc)
}

fn discovery_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("discovery")
}

/// Discovery file names under the output directory, newest name last.
pub fn list_files(output_dir: &Path) -> Result<Vec<String>> {
    let dir = discovery_dir(output_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(&dir)
        .map_err(|e| PipelineError::file("list", &dir, e))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(FILE_SUFFIX))
        .collect();
    names.sort();
    Ok(names)
}

/// Read one discovery file by bare name. Names with path components are
/// rejected.
pub fn read_file(output_dir: &Path, name: &str) -> Result<Value> {
    if name.contains('/') || name.contains('\\') || name.starts_with('.') || !name.ends_with(FILE_SUFFIX) {
        return Err(PipelineError::validation(format!("invalid discovery file name: {:?}", name))
            .with_context("name", name)
            .into());
    }
    let path = discovery_dir(output_dir).join(name);
    let content = fs::read_to_string(&path).map_err(|e| PipelineError::file("read", &path, e))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub struct DiscoveryService {
    market: Arc<MarketDataService>,
    environment: Environment,
}

impl DiscoveryService {
    pub fn new(market: Arc<MarketDataService>, environment: Environment) -> Self {
        Self { market, environment }
    }

    /// Collect a discovery document for the ticker. Only a failing quote
    /// aborts the run.
    pub async fn discover(&self, ticker: &str) -> Result<DiscoveryDocument> {
        let ticker = normalize_symbol(ticker)?;
        info!("Starting discovery for {}", ticker);

        let mut sources = vec![ServiceKind::YahooFinance.as_str().to_string()];
        let mut gaps = Vec::new();
        let mut gap = |source: &str, reason: String| {
            warn!("Discovery gap for {} ({}): {}", ticker, source, reason);
            gaps.push(DataGap {
                source: source.to_string(),
                reason,
            });
        };

        let quote = self
            .market
            .quote_without_collection(&ticker, false)
            .await
            .with_context(|| format!("Failed to fetch quote for {}", ticker))?;

        let bars = self.market.daily_bars(&ticker, "1y").await;
        // Collection starts once the 1y bars are cached so it can reuse them.
        self.market.collect_history(&ticker);
        let price_summary = match bars {
            Ok(bars) => {
                let summary = PriceSummary::from_bars(&bars);
                if summary.is_none() {
                    gap("price_history", format!("only {} daily bars available", bars.len()));
                }
                summary
            }
            Err(e) => {
                gap("price_history", format!("{:#}", e));
                None
            }
        };

        let fundamentals = if !self.market.client(ServiceKind::Fmp).is_configured() {
            gap("fundamentals", "FMP_API_KEY is not set".to_string());
            None
        } else {
            match self
                .market
                .execute(&DataRequest::FmpProfile { symbol: ticker.clone() }, false)
                .await
            {
                Ok(value) => match fmp::first_profile(&value) {
                    Some(profile) => {
                        sources.push(ServiceKind::Fmp.as_str().to_string());
                        Some(profile.clone())
                    }
                    None => {
                        gap("fundamentals", "FMP returned no profile".to_string());
                        None
                    }
                },
                Err(e) => {
                    gap("fundamentals", format!("{:#}", e));
                    None
                }
            }
        };

        let macro_context = if !self.market.client(ServiceKind::Fred).is_configured() {
            gap("macro", "FRED_API_KEY is not set".to_string());
            None
        } else {
            let start = Some(Utc::now().date_naive() - chrono::Duration::days(30));
            let mut points = std::collections::BTreeMap::new();
            for (series_id, label) in MACRO_SERIES {
                match self.market.fred_observations(series_id, start).await {
                    Ok(observations) => match fred::latest_observation(&observations) {
                        Some(obs) => {
                            points.insert(
                                label.to_string(),
                                MacroPoint {
                                    series_id: series_id.to_string(),
                                    date: obs.date,
                                    value: obs.value.unwrap_or_default(),
                                },
                            );
                        }
                        None => gap("macro", format!("{} has no recent observations", series_id)),
                    },
                    Err(e) => gap("macro", format!("{}: {:#}", series_id, e)),
                }
            }
            if points.is_empty() {
                None
            } else {
                sources.push(ServiceKind::Fred.as_str().to_string());
                Some(points)
            }
        };

        let sentiment = match self.market.fear_greed(1).await {
            Ok(readings) => match readings.into_iter().next() {
                Some(fear_greed) => {
                    sources.push(ServiceKind::AlternativeMe.as_str().to_string());
                    Some(SentimentContext { fear_greed })
                }
                None => {
                    gap("sentiment", "no Fear & Greed reading returned".to_string());
                    None
                }
            },
            Err(e) => {
                gap("sentiment", format!("{:#}", e));
                None
            }
        };

        let doc = DiscoveryDocument {
            metadata: DiscoveryMetadata {
                command: "discover".to_string(),
                ticker: ticker.clone(),
                generated_at: Utc::now(),
                run_id: Uuid::new_v4(),
                environment: self.environment,
                data_sources: sources,
                confidence: confidence_for_gaps(gaps.len()),
            },
            market_data: MarketData {
                quote,
                price_summary,
            },
            fundamentals,
            macro_context,
            sentiment,
            data_gaps: gaps,
        };
        validate_document(&doc)?;
        info!(
            "Discovery for {} complete: confidence {:.2}, {} gap(s)",
            ticker,
            doc.metadata.confidence,
            doc.data_gaps.len()
        );
        Ok(doc)
    }

    /// Write the document under `<output_dir>/discovery/`.
    pub fn write(&self, doc: &DiscoveryDocument, output_dir: &Path) -> Result<PathBuf> {
        let dir = discovery_dir(output_dir);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::file("create directory", &dir, e))?;
        let path = dir.join(doc.file_name());
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&path, content).map_err(|e| PipelineError::file("write", &path, e))?;
        info!("Wrote discovery file {}", path.display());
        Ok(path)
    }
}
