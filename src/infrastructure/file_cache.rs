//! File-backed cache tier.
//!
//! Each response is stored as one JSON document at
//! `<base>/<service>/<md5 key>.json` together with the time it was cached.
//! An entry is valid while its age is below the TTL the caller asks for.
//! Corrupted documents are treated as misses and removed.

use crate::domain::{CacheRequest, PipelineError, ServiceKind};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// On-disk cache document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub service: ServiceKind,
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Unix timestamp when cached
    pub cached_at: i64,
    pub ttl_seconds: u64,
    pub data: Value,
}

impl CacheEntry {
    pub fn age_secs(&self) -> u64 {
        let now = chrono::Utc::now().timestamp();
        now.saturating_sub(self.cached_at).max(0) as u64
    }

    pub fn is_fresh(&self, max_age_secs: u64) -> bool {
        self.age_secs() < max_age_secs
    }
}

#[derive(Clone)]
pub struct FileCache {
    base_path: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        let path = base_path.as_ref().to_path_buf();

        if let Err(e) = fs::create_dir_all(&path) {
            warn!("Failed to create cache directory {}: {}", path.display(), e);
        }

        Self { base_path: path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn service_dir(&self, service: ServiceKind) -> PathBuf {
        self.base_path.join(service.as_str())
    }

    fn entry_path(&self, service: ServiceKind, key: &str) -> PathBuf {
        self.service_dir(service).join(format!("{}.json", key))
    }

    /// Load an entry regardless of age. Corrupted files are deleted.
    pub fn load(&self, service: ServiceKind, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(service, key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::file("read", &path, e).into()),
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Corrupted cache entry {}, removing: {}", path.display(), e);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove corrupted cache entry {}: {}", path.display(), e);
                }
                Ok(None)
            }
        }
    }

    /// Load an entry if it is younger than `max_age_secs`.
    pub fn read(&self, request: &CacheRequest, max_age_secs: u64) -> Result<Option<CacheEntry>> {
        let key = request.key();
        match self.load(request.service, &key)? {
            Some(entry) if entry.is_fresh(max_age_secs) => {
                debug!("File cache hit: {}/{}", request.service, key);
                Ok(Some(entry))
            }
            Some(_) => {
                debug!("File cache entry expired: {}/{}", request.service, key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Persist a response. The document is written to a temporary file and
    /// renamed into place so readers never observe a partial write.
    pub fn write(&self, request: &CacheRequest, data: &Value, ttl_seconds: u64) -> Result<()> {
        let dir = self.service_dir(request.service);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::file("create directory", &dir, e))?;

        let key = request.key();
        let entry = CacheEntry {
            key: key.clone(),
            service: request.service,
            endpoint: request.endpoint.clone(),
            params: request.params.clone(),
            cached_at: chrono::Utc::now().timestamp(),
            ttl_seconds,
            data: data.clone(),
        };

        let path = self.entry_path(request.service, &key);
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let content = serde_json::to_string_pretty(&entry)?;
        fs::write(&tmp, content).map_err(|e| PipelineError::file("write", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| PipelineError::file("rename", &path, e))?;

        debug!("Wrote cache entry: {}/{}", request.service, key);
        Ok(())
    }

    /// Delete an entry. Returns whether a file was removed.
    pub fn delete(&self, service: ServiceKind, key: &str) -> Result<bool> {
        let path = self.entry_path(service, key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| PipelineError::file("delete", &path, e))?;
        debug!("Deleted cache entry: {}/{}", service, key);
        Ok(true)
    }

    /// List all cached keys of a service.
    pub fn list_keys(&self, service: ServiceKind) -> Result<Vec<String>> {
        let dir = self.service_dir(service);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| PipelineError::file("list", &dir, e))? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string_lossy().to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove every entry of a service.
    pub fn clear_service(&self, service: ServiceKind) -> Result<usize> {
        let mut deleted = 0;
        for key in self.list_keys(service)? {
            if self.delete(service, &key)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!("Cleared {} cache entries for {}", deleted, service);
        }
        Ok(deleted)
    }

    /// Remove entries of a service older than `max_age_secs`, plus corrupted ones.
    pub fn cleanup_expired(&self, service: ServiceKind, max_age_secs: u64) -> Result<usize> {
        let mut deleted = 0;
        for key in self.list_keys(service)? {
            match self.load(service, &key)? {
                Some(entry) if entry.is_fresh(max_age_secs) => {}
                Some(_) => {
                    if self.delete(service, &key)? {
                        deleted += 1;
                    }
                }
                // load() already removed the corrupted file
                None => deleted += 1,
            }
        }

        if deleted > 0 {
            info!("Cleaned up {} expired entries from {}", deleted, service);
        }
        Ok(deleted)
    }

    /// Per-service entry counts and sizes.
    pub fn get_stats(&self) -> Result<FileCacheStats> {
        let mut services = BTreeMap::new();
        let mut total_entries = 0;
        let mut total_size = 0u64;

        for service in ServiceKind::ALL {
            let keys = self.list_keys(service)?;
            let size_bytes = keys
                .iter()
                .filter_map(|key| fs::metadata(self.entry_path(service, key)).ok())
                .map(|meta| meta.len())
                .sum::<u64>();

            total_entries += keys.len();
            total_size += size_bytes;
            services.insert(
                service.as_str().to_string(),
                ServiceFileStats {
                    entries: keys.len(),
                    size_bytes,
                },
            );
        }

        Ok(FileCacheStats {
            base_path: self.base_path.to_string_lossy().to_string(),
            total_entries,
            total_size_bytes: total_size,
            services,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceFileStats {
    pub entries: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCacheStats {
    pub base_path: String,
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub services: BTreeMap<String, ServiceFileStats>,
}
