//! Personal finance data pipeline
//!
//! Fetches market quotes, price history, fundamentals, macro series,
//! sentiment and Bitcoin network data from eight public providers and keeps
//! every response in a three-tier cache.
//!
//! # Architecture
//!
//! - **Domain**: configuration, request and model types, the error taxonomy
//! - **Infrastructure**: HTTP plumbing, rate limiting, cache tiers and one client per provider
//! - **Application**: the unified cache, auto-collection, health checks and discovery documents
//! - **CLI / MCP**: the two front ends, both routed through the same cache
//!
//! # Configuration
//!
//! `config.yaml` plus environment variables:
//! - `FRED_API_KEY`, `ALPHA_VANTAGE_API_KEY`, `FMP_API_KEY`, `COINGECKO_API_KEY`
//! - `APP_ENV`: `dev`, `staging` or `prod`; namespaces every directory on disk
//! - `CACHE_DIR`, `HISTORICAL_DIR`, `OUTPUT_DIR`: override the base directories
//! - `RUST_LOG`, `LOG_FORMAT=json`: logging
//!
//! # Quick Start
//!
//! ```bash
//! finance-data-pipeline fetch yahoo-quote AAPL
//! finance-data-pipeline --output-format table fetch fred-series DFF --start 2024-01-01
//! finance-data-pipeline cache stats
//! finance-data-pipeline discover MSFT
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod mcp;
