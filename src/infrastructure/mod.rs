pub mod file_cache;
pub mod historical_store;
pub mod http;
pub mod memory_cache;
pub mod rate_limiter;
pub mod services;

pub use file_cache::{CacheEntry, FileCache, FileCacheStats, ServiceFileStats};
pub use historical_store::{FileMetadata, HistoricalIndex, HistoricalStore};
pub use http::ServiceHttpClient;
pub use memory_cache::MemoryCache;
pub use rate_limiter::{RateLimitStats, RateLimiter};
pub use services::ServiceClient;
