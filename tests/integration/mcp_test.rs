use crate::stub_server::StubServer;
use finance_data_pipeline::application::{AutoCollector, MarketDataService, UnifiedCache};
use finance_data_pipeline::domain::config::ServiceOverrides;
use finance_data_pipeline::domain::{AppConfig, ServiceKind};
use finance_data_pipeline::mcp::{io_handler, McpServer};
use jsonrpc_core::IoHandler;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const FEAR_GREED_BODY: &str = r#"{"name":"Fear and Greed Index","data":[{"value":"72","value_classification":"Greed","timestamp":"1718841600"}],"metadata":{"error":null}}"#;

fn handler_for(dir: &TempDir, base_url: &str) -> IoHandler {
    let mut config = AppConfig::default();
    config.cache.base_dir = dir.path().join("cache");
    config.historical.base_dir = dir.path().join("historical");
    config.output.base_dir = dir.path().join("outputs");
    config.services.insert(
        ServiceKind::AlternativeMe,
        ServiceOverrides {
            base_url: Some(base_url.to_string()),
            max_retries: Some(0),
            ..Default::default()
        },
    );
    let cache = Arc::new(UnifiedCache::from_config(&config));
    let market = MarketDataService::from_config(&config, cache)
        .unwrap()
        .with_collector(AutoCollector::disabled());
    io_handler(McpServer::new(Arc::new(market), config.output_dir()))
}

async fn call(io: &IoHandler, method: &str, params: Value) -> Value {
    let request = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string();
    let response = io.handle_request(&request).await.unwrap();
    serde_json::from_str(&response).unwrap()
}

#[tokio::test]
async fn test_fear_greed_tool_accepts_named_and_positional_params() {
    let server = StubServer::start(FEAR_GREED_BODY).await;
    let dir = TempDir::new().unwrap();
    let io = handler_for(&dir, &server.base_url);

    let response = call(&io, "get_fear_greed", json!({"limit": 1})).await;
    assert_eq!(response["result"][0]["value"], 72);
    assert_eq!(response["result"][0]["classification"], "Greed");

    let response = call(&io, "get_fear_greed", json!([1])).await;
    assert_eq!(response["result"][0]["value"], 72);

    // Second and third calls were answered from the cache.
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_fear_greed_tool_rejects_bad_params() {
    let server = StubServer::start(FEAR_GREED_BODY).await;
    let dir = TempDir::new().unwrap();
    let io = handler_for(&dir, &server.base_url);

    let response = call(&io, "get_fear_greed", json!({"limit": "many"})).await;
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_read_discovery_file_tool() {
    let dir = TempDir::new().unwrap();
    let io = handler_for(&dir, "http://127.0.0.1:9");

    let discovery_dir = dir.path().join("outputs").join("dev").join("discovery");
    std::fs::create_dir_all(&discovery_dir).unwrap();
    std::fs::write(
        discovery_dir.join("AAPL_20240610_discovery.json"),
        r#"{"metadata": {"ticker": "AAPL"}}"#,
    )
    .unwrap();

    let response = call(&io, "list_discovery_files", json!([])).await;
    assert_eq!(response["result"]["files"], json!(["AAPL_20240610_discovery.json"]));

    let response = call(&io, "read_discovery_file", json!({"name": "AAPL_20240610_discovery.json"})).await;
    assert_eq!(response["result"]["metadata"]["ticker"], "AAPL");

    let response = call(&io, "read_discovery_file", json!({"name": "../AAPL_20240610_discovery.json"})).await;
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(response["error"]["data"]["error_type"], "ValidationError");

    let response = call(&io, "read_discovery_file", json!({})).await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn test_unknown_tool_is_method_not_found() {
    let dir = TempDir::new().unwrap();
    let io = handler_for(&dir, "http://127.0.0.1:9");
    let response = call(&io, "delete_everything", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);
}
