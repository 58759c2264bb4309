//! Integration tests for the cache stack, the historical store and the
//! market data service.
//!
//! Run with: `cargo test --test integration`
//!
//! Tests marked `#[ignore]` call the real providers and need network access
//! (and API keys for FRED, Alpha Vantage and FMP).

mod cache_stack_test;
mod live_services_test;
mod mcp_test;
mod market_data_test;
mod stub_server;
