use crate::stub_server::StubServer;
use finance_data_pipeline::application::{
    discovery, AutoCollector, DataRequest, DiscoveryService, MarketDataService, UnifiedCache,
};
use finance_data_pipeline::domain::config::ServiceOverrides;
use finance_data_pipeline::domain::{AppConfig, AutoCollectionSettings, DataType, Environment, ServiceKind};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FEES_BODY: &str = r#"{"fastestFee":21,"halfHourFee":18,"hourFee":15,"economyFee":8,"minimumFee":4}"#;

const CHART_BODY: &str = r#"{"chart":{"result":[{"meta":{"symbol":"AAPL","currency":"USD","exchangeName":"NMS","regularMarketPrice":189.5,"chartPreviousClose":187.0,"regularMarketTime":1718841600,"regularMarketVolume":51234567},"timestamp":[1718668800,1718755200,1718841600],"indicators":{"quote":[{"open":[185.0,186.5,188.0],"high":[187.0,188.2,190.1],"low":[184.1,185.9,187.3],"close":[186.9,187.0,189.5],"volume":[40000000,45000000,51234567]}]}}],"error":null}}"#;

/// Point every provider at the stub server.
fn config_for(dir: &TempDir, base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Development;
    config.cache.base_dir = dir.path().join("cache");
    config.historical.base_dir = dir.path().join("historical");
    config.output.base_dir = dir.path().join("outputs");
    for kind in ServiceKind::ALL {
        config.services.insert(
            kind,
            ServiceOverrides {
                base_url: Some(base_url.to_string()),
                max_retries: Some(0),
                ..Default::default()
            },
        );
    }
    config
}

fn market_for(config: &AppConfig) -> Arc<MarketDataService> {
    let cache = Arc::new(UnifiedCache::from_config(config));
    let market = MarketDataService::from_config(config, cache)
        .unwrap()
        .with_collector(AutoCollector::disabled());
    Arc::new(market)
}

#[tokio::test]
async fn test_repeated_requests_hit_the_provider_once() {
    let server = StubServer::start(FEES_BODY).await;
    let dir = TempDir::new().unwrap();
    let market = market_for(&config_for(&dir, &server.base_url));

    let first = market.execute(&DataRequest::MempoolFees, false).await.unwrap();
    let second = market.execute(&DataRequest::MempoolFees, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first["fastestFee"], 21);
    assert_eq!(server.hits(), 1);

    // Network snapshots are filed under BTC.
    let store = market.cache().historical().unwrap();
    let (_, stored) = store.load_latest("BTC", DataType::Network).unwrap().unwrap();
    assert_eq!(stored["hourFee"], 15);
}

#[tokio::test]
async fn test_refresh_bypasses_the_cache() {
    let server = StubServer::start(FEES_BODY).await;
    let dir = TempDir::new().unwrap();
    let market = market_for(&config_for(&dir, &server.base_url));

    market.execute(&DataRequest::MempoolFees, false).await.unwrap();
    market.execute(&DataRequest::MempoolFees, true).await.unwrap();

    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_invalid_request_never_reaches_the_provider() {
    let server = StubServer::start(FEES_BODY).await;
    let dir = TempDir::new().unwrap();
    let market = market_for(&config_for(&dir, &server.base_url));

    let request = DataRequest::YahooHistory {
        symbol: "AAPL".to_string(),
        range: "2w".to_string(),
        interval: "1d".to_string(),
    };
    assert!(market.execute(&request, false).await.is_err());

    let request = DataRequest::YahooQuote { symbol: "../etc".to_string() };
    assert!(market.execute(&request, false).await.is_err());
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_quote_is_parsed_from_chart_response() {
    let server = StubServer::start(CHART_BODY).await;
    let dir = TempDir::new().unwrap();
    let market = market_for(&config_for(&dir, &server.base_url));

    let quote = market.quote("aapl", false).await.unwrap();
    assert_eq!(quote.symbol, "AAPL");
    assert_eq!(quote.price, 189.5);
    assert_eq!(quote.currency.as_deref(), Some("USD"));
    assert!(quote.change_percent.unwrap() > 1.0);
}

#[tokio::test]
async fn test_discovery_document_round_trips_through_validation() {
    let server = StubServer::start(CHART_BODY).await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &server.base_url);
    let market = market_for(&config);

    let service = DiscoveryService::new(market, config.environment);
    let doc = service.discover("aapl").await.unwrap();
    assert_eq!(doc.metadata.ticker, "AAPL");
    assert_eq!(doc.market_data.quote.price, 189.5);
    assert!(doc.data_gaps.iter().any(|gap| gap.source == "sentiment"));
    assert_eq!(
        doc.metadata.confidence,
        discovery::confidence_for_gaps(doc.data_gaps.len())
    );

    let path = service.write(&doc, &config.output_dir()).unwrap();
    let parsed = discovery::validate_file(&path).unwrap();
    assert_eq!(parsed.metadata.run_id, doc.metadata.run_id);
    assert_eq!(parsed.data_gaps, doc.data_gaps);

    let files = discovery::list_files(&config.output_dir()).unwrap();
    assert_eq!(files, vec![doc.file_name()]);
}

/// Provider calls made by one discovery run.
async fn discovery_hits(collection_enabled: bool) -> usize {
    let server = StubServer::start(CHART_BODY).await;
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir, &server.base_url);
    config.auto_collection = AutoCollectionSettings {
        enabled: collection_enabled,
        throttle_secs: 3600,
        history_range: "1y".to_string(),
    };
    let cache = Arc::new(UnifiedCache::from_config(&config));
    let market = Arc::new(MarketDataService::from_config(&config, cache).unwrap());

    DiscoveryService::new(market.clone(), config.environment)
        .discover("AAPL")
        .await
        .unwrap();
    // Let any background collection finish.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(market.collect_history("AAPL").is_none());
    server.hits()
}

#[tokio::test]
async fn test_discovery_with_collection_fetches_history_once() {
    let without = discovery_hits(false).await;
    let with = discovery_hits(true).await;
    assert_eq!(with, without);
}
