//! Application configuration loaded from `config.yaml`.
//!
//! Every section has serde defaults so the pipeline runs without a config
//! file. Paths can be overridden from the environment (`CACHE_DIR`,
//! `HISTORICAL_DIR`, `OUTPUT_DIR`) and API keys always come from the
//! environment, never from the file.

use super::{Environment, PipelineError, ServiceKind};
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use validator::Validate;

/// Top-level configuration.
#[derive(Deserialize, Debug, Clone, Default, Validate)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub historical: HistoricalSettings,
    #[serde(default)]
    #[validate(nested)]
    pub auto_collection: AutoCollectionSettings,
    #[serde(default)]
    pub output: OutputSettings,
    /// Per-service overrides keyed by service name (`yahoo_finance`, `fred`, ...)
    #[serde(default)]
    pub services: BTreeMap<ServiceKind, ServiceOverrides>,
}

#[derive(Deserialize, Debug, Clone, Validate)]
pub struct CacheSettings {
    #[serde(default = "default_cache_dir")]
    pub base_dir: PathBuf,
    /// Maximum entries held by the in-memory tier
    #[serde(default = "default_memory_capacity")]
    #[validate(range(min = 1, max = 100000))]
    pub memory_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            base_dir: default_cache_dir(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_memory_capacity() -> usize {
    100
}

#[derive(Deserialize, Debug, Clone)]
pub struct HistoricalSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_historical_dir")]
    pub base_dir: PathBuf,
}

impl Default for HistoricalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: default_historical_dir(),
        }
    }
}

fn default_historical_dir() -> PathBuf {
    PathBuf::from("data/historical")
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone, Validate)]
pub struct AutoCollectionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum seconds between two collections of the same symbol
    #[serde(default = "default_throttle_secs")]
    #[validate(range(min = 60))]
    pub throttle_secs: u64,
    /// Yahoo range pulled by a comprehensive collection
    #[serde(default = "default_history_range")]
    pub history_range: String,
}

impl Default for AutoCollectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_secs: default_throttle_secs(),
            history_range: default_history_range(),
        }
    }
}

fn default_throttle_secs() -> u64 {
    3600
}

fn default_history_range() -> String {
    "1y".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub base_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            base_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/outputs")
}

/// Optional per-service settings from the config file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServiceOverrides {
    pub base_url: Option<String>,
    pub ttl_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<usize>,
    pub requests_per_minute: Option<u32>,
}

/// Fully resolved settings for one service client.
#[derive(Debug, Clone, Validate)]
pub struct ServiceSettings {
    pub kind: ServiceKind,
    #[validate(url)]
    pub base_url: String,
    #[validate(range(min = 60, max = 86400))]
    pub ttl_secs: u64,
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,
    #[validate(range(max = 10))]
    pub max_retries: usize,
    #[validate(range(min = 1))]
    pub requests_per_minute: u32,
    pub api_key: Option<String>,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: usize = 3;

impl ServiceSettings {
    /// Defaults for a service, with the API key read from its env var.
    pub fn defaults(kind: ServiceKind) -> Self {
        let api_key = kind
            .api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            ttl_secs: kind.default_ttl_secs(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            requests_per_minute: kind.default_requests_per_minute(),
            api_key,
        }
    }

    /// A service that needs a key but has none cannot be called.
    pub fn is_configured(&self) -> bool {
        !self.kind.api_key_required() || self.api_key.is_some()
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist, then apply environment overrides and validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| PipelineError::file("read", path, e))?;
            let config: AppConfig = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {} - check YAML syntax and structure", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CACHE_DIR") {
            self.cache.base_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("HISTORICAL_DIR") {
            self.historical.base_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(dir);
        }
    }

    /// Run the declarative validators over every section and resolved service.
    pub fn check(&self) -> anyhow::Result<()> {
        self.validate().map_err(|e| {
            PipelineError::configuration(format!("invalid configuration: {}", e))
        })?;

        for kind in ServiceKind::ALL {
            self.service(kind).validate().map_err(|e| {
                PipelineError::configuration(format!("invalid settings for {}: {}", kind, e))
                    .with_context("service", kind.as_str())
            })?;
        }
        Ok(())
    }

    /// Resolved settings for a service: defaults overlaid with file overrides.
    pub fn service(&self, kind: ServiceKind) -> ServiceSettings {
        let mut settings = ServiceSettings::defaults(kind);
        if let Some(overrides) = self.services.get(&kind) {
            if let Some(url) = &overrides.base_url {
                settings.base_url = url.trim_end_matches('/').to_string();
            }
            if let Some(ttl) = overrides.ttl_secs {
                settings.ttl_secs = ttl;
            }
            if let Some(timeout) = overrides.timeout_secs {
                settings.timeout_secs = timeout;
            }
            if let Some(retries) = overrides.max_retries {
                settings.max_retries = retries;
            }
            if let Some(rpm) = overrides.requests_per_minute {
                settings.requests_per_minute = rpm;
            }
        }
        settings
    }

    /// File cache directory for the active environment.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.base_dir.join(self.environment.as_str())
    }

    /// Historical store directory for the active environment.
    pub fn historical_dir(&self) -> PathBuf {
        self.historical.base_dir.join(self.environment.as_str())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.base_dir.join(self.environment.as_str())
    }
}
