//! In-process hot cache tier.
//!
//! Holds at most `capacity` entries and evicts the least recently used one
//! when full. Each entry expires with the TTL it was stored under.

use crate::domain::CacheRepository;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Keys from least to most recently used
    order: VecDeque<String>,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}

pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from least to most recently used.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.order.iter().cloned().collect()
    }
}

#[async_trait]
impl CacheRepository for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let mut inner = self.inner.lock().await;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            inner.remove(key);
            return Ok(None);
        }

        inner.touch(key);
        Ok(inner.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                debug!("Evicted least recently used entry {}", oldest);
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        inner.touch(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}
