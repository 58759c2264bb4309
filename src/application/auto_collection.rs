//! Background collection of full price history when a symbol is looked up.
//!
//! A symbol is collected at most once per throttle window per process. The
//! throttle map lives in memory and is not shared between processes.

use crate::domain::AutoCollectionSettings;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AutoCollector {
    enabled: bool,
    throttle: Duration,
    history_range: String,
    last_collected: Arc<Mutex<HashMap<String, Instant>>>,
}

impl AutoCollector {
    pub fn new(settings: &AutoCollectionSettings) -> Self {
        Self {
            enabled: settings.enabled,
            throttle: Duration::from_secs(settings.throttle_secs),
            history_range: settings.history_range.clone(),
            last_collected: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(&AutoCollectionSettings::default())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn history_range(&self) -> &str {
        &self.history_range
    }

    /// Claim the symbol for collection. Returns false when collection is
    /// disabled or the symbol was claimed within the throttle window.
    pub fn should_collect(&self, symbol: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Instant::now();
        let mut last = match self.last_collected.lock() {
            Ok(map) => map,
            Err(_) => {
                warn!("Failed to acquire lock for auto collection map (mutex poisoned)");
                return false;
            }
        };

        match last.get(symbol) {
            Some(at) if now.duration_since(*at) < self.throttle => {
                debug!("Auto collection for {} throttled", symbol);
                false
            }
            _ => {
                last.insert(symbol.to_string(), now);
                true
            }
        }
    }

    /// Run `collect` for the symbol on a background task unless throttled.
    ///
    /// Failures are logged; the caller's request never waits on the task.
    pub fn trigger<F, Fut>(&self, symbol: &str, collect: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.should_collect(symbol) {
            return None;
        }

        let symbol = symbol.to_string();
        info!("Starting comprehensive collection for {}", symbol);
        Some(tokio::spawn(async move {
            match collect(symbol.clone()).await {
                Ok(()) => {
                    metrics::counter!("auto_collections_total", "outcome" => "ok").increment(1);
                    info!("Comprehensive collection finished for {}", symbol);
                }
                Err(e) => {
                    metrics::counter!("auto_collections_total", "outcome" => "error").increment(1);
                    warn!("Comprehensive collection failed for {}: {:#}", symbol, e);
                }
            }
        }))
    }
}
