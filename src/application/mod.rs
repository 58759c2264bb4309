pub mod auto_collection;
pub mod discovery;
pub mod health;
pub mod market_data_service;
pub mod unified_cache;

pub use auto_collection::AutoCollector;
pub use discovery::{DiscoveryDocument, DiscoveryService};
pub use health::{HealthReport, HealthStatus};
pub use market_data_service::{DataRequest, MarketDataService};
pub use unified_cache::{CacheTier, UnifiedCache, UnifiedCacheStats};
