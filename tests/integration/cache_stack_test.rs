use chrono::Utc;
use finance_data_pipeline::application::{CacheTier, UnifiedCache};
use finance_data_pipeline::domain::{AppConfig, CacheRequest, DataType, Environment, ServiceKind};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Staging;
    config.cache.base_dir = dir.path().join("cache");
    config.historical.base_dir = dir.path().join("historical");
    config.output.base_dir = dir.path().join("outputs");
    config
}

#[tokio::test]
async fn test_second_lookup_is_served_without_fetching() {
    let dir = TempDir::new().unwrap();
    let cache = UnifiedCache::from_config(&config_in(&dir));
    let request = CacheRequest::new(ServiceKind::CoinGecko, "simple/price")
        .param("ids", "bitcoin")
        .param("vs_currencies", "usd");
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value = cache
            .get_or_fetch(&request, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"bitcoin": {"usd": 67000.0}}))
            })
            .await
            .unwrap();
        assert_eq!(value["bitcoin"]["usd"], 67000.0);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats().await.unwrap();
    let coingecko = &stats.services[&ServiceKind::CoinGecko];
    assert_eq!(coingecko.hits, 2);
    assert_eq!(coingecko.misses, 1);
}

#[tokio::test]
async fn test_file_tier_survives_a_new_process() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let request = CacheRequest::new(ServiceKind::Fred, "series").param("series_id", "GDP");

    UnifiedCache::from_config(&config)
        .set(&request, &json!({"seriess": [{"id": "GDP"}]}))
        .await;

    // Same directories, empty memory tier.
    let cache = UnifiedCache::from_config(&config);
    let (value, tier) = cache.lookup(&request).await.unwrap();
    assert_eq!(tier, CacheTier::File);
    assert_eq!(value["seriess"][0]["id"], "GDP");

    let (_, tier) = cache.lookup(&request).await.unwrap();
    assert_eq!(tier, CacheTier::Memory);
}

#[tokio::test]
async fn test_files_are_namespaced_by_environment() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let cache = UnifiedCache::from_config(&config);
    let request = CacheRequest::new(ServiceKind::Mempool, "v1/fees/recommended");
    cache.set(&request, &json!({"fastestFee": 9})).await;

    assert!(dir.path().join("cache").join("staging").exists());
    assert!(!dir.path().join("cache").join("dev").exists());
}

#[tokio::test]
async fn test_historical_tier_answers_after_file_cache_is_cleared() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let request = CacheRequest::new(ServiceKind::AlternativeMe, "fng")
        .param("limit", 1)
        .keep_history("FEAR_GREED", DataType::Sentiment);
    let payload = json!({"data": [{"value": "72", "value_classification": "Greed", "timestamp": "1718841600"}]});

    let cache = UnifiedCache::from_config(&config);
    cache.set(&request, &payload).await;
    cache.clear(Some(ServiceKind::AlternativeMe)).await.unwrap();

    let (value, tier) = cache.lookup(&request).await.unwrap();
    assert_eq!(tier, CacheTier::Historical);
    assert_eq!(value["data"][0]["value_classification"], "Greed");

    let store = cache.historical().unwrap();
    assert_eq!(store.list_symbols().unwrap(), vec!["FEAR_GREED".to_string()]);
    let today = Utc::now().date_naive();
    assert!(store.load("FEAR_GREED", DataType::Sentiment, today).unwrap().is_some());

    // A different request for the same symbol and day is not served from history.
    let other = CacheRequest::new(ServiceKind::AlternativeMe, "fng")
        .param("limit", 30)
        .keep_history("FEAR_GREED", DataType::Sentiment);
    assert!(cache.lookup(&other).await.is_none());
}

#[tokio::test]
async fn test_disabled_historical_store() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.historical.enabled = false;
    let cache = UnifiedCache::from_config(&config);

    let request = CacheRequest::new(ServiceKind::YahooFinance, "chart")
        .param("symbol", "AAPL")
        .keep_history("AAPL", DataType::Quote);
    cache.set(&request, &json!({"chart": {"result": []}})).await;

    assert!(cache.historical().is_none());
    assert!(!dir.path().join("historical").exists());
    let stats = cache.stats().await.unwrap();
    assert!(!stats.historical_enabled);
    assert_eq!(stats.files.total_entries, 1);
}
