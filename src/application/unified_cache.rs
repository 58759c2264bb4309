//! Unified cache over the memory, file and historical tiers.
//!
//! Lookup order:
//! 1. Memory (hot, LRU bounded)
//! 2. File cache (per-service TTL, survives restarts)
//! 3. Historical store (today's file, when the request keeps history)
//! 4. Remote API through the caller's fetcher
//!
//! Hits in a lower tier back-fill the memory tier.

use crate::domain::{AppConfig, CacheRepository, CacheRequest, ServiceKind};
use crate::infrastructure::{FileCache, FileCacheStats, HistoricalStore, MemoryCache};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Tier that answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    File,
    Historical,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::File => "file",
            CacheTier::Historical => "historical",
        }
    }
}

#[derive(Debug, Default)]
struct ServiceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceCacheStats {
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnifiedCacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub files: FileCacheStats,
    pub historical_enabled: bool,
    pub historical_symbols: usize,
    pub services: BTreeMap<ServiceKind, ServiceCacheStats>,
}

pub struct UnifiedCache {
    memory: Arc<dyn CacheRepository>,
    memory_capacity: usize,
    files: FileCache,
    historical: Option<HistoricalStore>,
    ttls: BTreeMap<ServiceKind, u64>,
    counters: Mutex<HashMap<ServiceKind, ServiceCounters>>,
}

impl UnifiedCache {
    pub fn new(
        memory: Arc<dyn CacheRepository>,
        memory_capacity: usize,
        files: FileCache,
        historical: Option<HistoricalStore>,
        ttls: BTreeMap<ServiceKind, u64>,
    ) -> Self {
        Self {
            memory,
            memory_capacity,
            files,
            historical,
            ttls,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Build the three tiers from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let ttls = ServiceKind::ALL
            .iter()
            .map(|kind| (*kind, config.service(*kind).ttl_secs))
            .collect();
        let historical = config
            .historical
            .enabled
            .then(|| HistoricalStore::new(config.historical_dir()));

        Self::new(
            Arc::new(MemoryCache::new(config.cache.memory_capacity)),
            config.cache.memory_capacity,
            FileCache::new(config.cache_dir()),
            historical,
            ttls,
        )
    }

    pub fn ttl_for(&self, service: ServiceKind) -> u64 {
        self.ttls
            .get(&service)
            .copied()
            .unwrap_or_else(|| service.default_ttl_secs())
    }

    pub fn historical(&self) -> Option<&HistoricalStore> {
        self.historical.as_ref()
    }

    pub fn files(&self) -> &FileCache {
        &self.files
    }

    fn record(&self, service: ServiceKind, hit: bool, tier: Option<CacheTier>) {
        match self.counters.lock() {
            Ok(mut counters) => {
                let entry = counters.entry(service).or_default();
                if hit {
                    entry.hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    entry.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => warn!("Failed to acquire lock for cache counters (mutex poisoned)"),
        }

        match tier {
            Some(tier) => metrics::counter!(
                "cache_hits_total",
                "service" => service.as_str(),
                "tier" => tier.as_str()
            )
            .increment(1),
            None => metrics::counter!("cache_misses_total", "service" => service.as_str()).increment(1),
        }
    }

    /// Look the request up in every tier, reporting which one answered.
    pub async fn lookup(&self, request: &CacheRequest) -> Option<(Value, CacheTier)> {
        let key = request.key();
        let ttl = self.ttl_for(request.service);

        // 1. Memory
        match self.memory.get(&key).await {
            Ok(Some(value)) => {
                debug!("Memory cache hit: {}", request.canonical());
                return Some((value, CacheTier::Memory));
            }
            Ok(None) => {}
            Err(e) => warn!("Memory cache read failed: {}", e),
        }

        // 2. File
        match self.files.read(request, ttl) {
            Ok(Some(entry)) => {
                debug!("File cache hit: {}", request.canonical());
                self.backfill_memory(&key, &entry.data, ttl.saturating_sub(entry.age_secs()))
                    .await;
                return Some((entry.data, CacheTier::File));
            }
            Ok(None) => {}
            Err(e) => warn!("File cache read failed for {}: {:#}", request.canonical(), e),
        }

        // 3. Historical
        if let (Some(store), Some(target)) = (&self.historical, &request.historical) {
            let today = Utc::now().date_naive();
            match store.load_response(&target.symbol, target.data_type, today, &key, ttl) {
                Ok(Some((value, age))) => {
                    debug!("Historical cache hit: {}", request.canonical());
                    self.backfill_memory(&key, &value, ttl.saturating_sub(age)).await;
                    return Some((value, CacheTier::Historical));
                }
                Ok(None) => {}
                Err(e) => warn!("Historical read failed for {}: {:#}", request.canonical(), e),
            }
        }

        None
    }

    async fn backfill_memory(&self, key: &str, value: &Value, ttl: u64) {
        if let Err(e) = self.memory.set(key, value, ttl).await {
            warn!("Failed to back-fill memory cache: {}", e);
        }
    }

    /// Cached value for the request, if any tier has a fresh one.
    pub async fn get(&self, request: &CacheRequest) -> Option<Value> {
        let found = self.lookup(request).await;
        self.record(request.service, found.is_some(), found.as_ref().map(|(_, tier)| *tier));
        found.map(|(value, _)| value)
    }

    /// Write the value to every tier. Tier failures are logged, not raised.
    pub async fn set(&self, request: &CacheRequest, value: &Value) {
        let key = request.key();
        let ttl = self.ttl_for(request.service);

        if let Err(e) = self.memory.set(&key, value, ttl).await {
            warn!("Failed to write to memory cache: {}", e);
        }
        if let Err(e) = self.files.write(request, value, ttl) {
            warn!("Failed to write to file cache: {:#}", e);
        }
        if let (Some(store), Some(target)) = (&self.historical, &request.historical) {
            let today = Utc::now().date_naive();
            if let Err(e) = store.store_response(
                &target.symbol,
                target.data_type,
                today,
                value,
                request.service.as_str(),
                Some(&key),
            ) {
                warn!("Failed to write to historical store: {:#}", e);
            }
        }
    }

    /// Cached value, or fetch it, store it and return it.
    pub async fn get_or_fetch<F, Fut>(&self, request: &CacheRequest, fetcher: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(value) = self.get(request).await {
            return Ok(value);
        }

        info!("Cache miss, fetching from {}: {}", request.service.display_name(), request.endpoint);
        let value = fetcher().await?;
        self.set(request, &value).await;
        Ok(value)
    }

    /// Skip every read tier, fetch and store.
    pub async fn refresh<F, Fut>(&self, request: &CacheRequest, fetcher: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        info!("Force refreshing {}: {}", request.service.display_name(), request.endpoint);
        let value = fetcher().await?;
        self.set(request, &value).await;
        Ok(value)
    }

    /// Drop the cached response for one request from the memory and file
    /// tiers. History is left alone.
    pub async fn invalidate(&self, request: &CacheRequest) -> Result<bool> {
        let key = request.key();
        self.memory.delete(&key).await?;
        let removed = self.files.delete(request.service, &key)?;
        info!("Invalidated cache: {}", request.canonical());
        Ok(removed)
    }

    /// Remove cached files for one service, or for all of them. The memory
    /// tier only holds copies and is flushed entirely.
    pub async fn clear(&self, service: Option<ServiceKind>) -> Result<usize> {
        self.memory.clear().await?;
        let services: Vec<ServiceKind> = match service {
            Some(kind) => vec![kind],
            None => ServiceKind::ALL.to_vec(),
        };

        let mut removed = 0;
        for kind in services {
            removed += self.files.clear_service(kind)?;
        }
        info!("Cleared {} cached files", removed);
        Ok(removed)
    }

    /// Delete file entries older than their service's TTL.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for kind in ServiceKind::ALL.iter() {
            removed += self.files.cleanup_expired(*kind, self.ttl_for(*kind))?;
        }
        if removed > 0 {
            info!("Removed {} expired cache files", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<UnifiedCacheStats> {
        let files = self.files.get_stats()?;
        let historical_symbols = match &self.historical {
            Some(store) => store.list_symbols()?.len(),
            None => 0,
        };

        let services = {
            let counters = self
                .counters
                .lock()
                .map_err(|_| anyhow::anyhow!("cache counters mutex poisoned"))?;
            ServiceKind::ALL
                .iter()
                .map(|kind| {
                    let (hits, misses) = counters
                        .get(kind)
                        .map(|c| (c.hits.load(Ordering::Relaxed), c.misses.load(Ordering::Relaxed)))
                        .unwrap_or((0, 0));
                    let total = hits + misses;
                    let stats = ServiceCacheStats {
                        ttl_secs: self.ttl_for(*kind),
                        hits,
                        misses,
                        hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
                    };
                    (*kind, stats)
                })
                .collect::<BTreeMap<_, _>>()
        };

        Ok(UnifiedCacheStats {
            memory_entries: self.memory.len().await,
            memory_capacity: self.memory_capacity,
            files,
            historical_enabled: self.historical.is_some(),
            historical_symbols,
            services,
        })
    }
}
