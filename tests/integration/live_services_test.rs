//! Calls against the real providers.

use finance_data_pipeline::application::health::{self, HealthStatus};
use finance_data_pipeline::application::{DataRequest, MarketDataService, UnifiedCache};
use finance_data_pipeline::domain::{AppConfig, ServiceKind};
use std::sync::Arc;
use tempfile::TempDir;

fn live_market(dir: &TempDir) -> MarketDataService {
    let mut config = AppConfig::default();
    config.cache.base_dir = dir.path().join("cache");
    config.historical.base_dir = dir.path().join("historical");
    let cache = Arc::new(UnifiedCache::from_config(&config));
    MarketDataService::from_config(&config, cache).unwrap()
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_yahoo_quote_live() {
    let dir = TempDir::new().unwrap();
    let market = live_market(&dir);
    let quote = market.quote("SPY", false).await.unwrap();
    assert_eq!(quote.symbol, "SPY");
    assert!(quote.price > 0.0);
}

#[tokio::test]
#[ignore]
async fn test_mempool_height_live() {
    let dir = TempDir::new().unwrap();
    let market = live_market(&dir);
    let height = market.execute(&DataRequest::MempoolTipHeight, false).await.unwrap();
    assert!(height.as_u64().unwrap() > 800_000);
}

#[tokio::test]
#[ignore]
async fn test_fear_greed_live() {
    let dir = TempDir::new().unwrap();
    let market = live_market(&dir);
    let readings = market.fear_greed(7).await.unwrap();
    assert_eq!(readings.len(), 7);
    assert!(readings.iter().all(|r| r.value <= 100));
}

#[tokio::test]
#[ignore]
async fn test_health_of_keyless_services_live() {
    let dir = TempDir::new().unwrap();
    let market = live_market(&dir);
    let clients = vec![
        market.client(ServiceKind::YahooFinance),
        market.client(ServiceKind::Mempool),
        market.client(ServiceKind::AlternativeMe),
    ];
    let report = health::check_all(clients).await;
    assert!(report
        .services
        .iter()
        .all(|s| s.status == HealthStatus::Healthy));
}
