//! Provider health checks.

use crate::domain::ServiceKind;
use crate::infrastructure::ServiceClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// A required API key is missing; no request was made.
    Unconfigured,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: ServiceKind,
    pub name: &'static str,
    pub status: HealthStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unconfigured: usize,
    pub services: Vec<ServiceHealth>,
}

impl HealthReport {
    /// True when no configured service failed its check.
    pub fn is_ok(&self) -> bool {
        self.unhealthy == 0
    }
}

pub async fn check_service(client: &dyn ServiceClient) -> ServiceHealth {
    let kind = client.kind();
    if !client.is_configured() {
        return ServiceHealth {
            service: kind,
            name: kind.display_name(),
            status: HealthStatus::Unconfigured,
            latency_ms: None,
            error: kind.api_key_env().map(|var| format!("{} is not set", var)),
        };
    }

    let started = Instant::now();
    let result = client.health_check().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => ServiceHealth {
            service: kind,
            name: kind.display_name(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e) => {
            warn!("{} health check failed: {:#}", kind.display_name(), e);
            ServiceHealth {
                service: kind,
                name: kind.display_name(),
                status: HealthStatus::Unhealthy,
                latency_ms: Some(latency_ms),
                error: Some(format!("{:#}", e)),
            }
        }
    }
}

/// Check all given clients concurrently.
pub async fn check_all(clients: Vec<&dyn ServiceClient>) -> HealthReport {
    let services = join_all(clients.into_iter().map(check_service)).await;
    let count = |status: HealthStatus| services.iter().filter(|s| s.status == status).count();

    let report = HealthReport {
        checked_at: Utc::now(),
        healthy: count(HealthStatus::Healthy),
        unhealthy: count(HealthStatus::Unhealthy),
        unconfigured: count(HealthStatus::Unconfigured),
        services,
    };
    info!(
        "Health check: {} healthy, {} unhealthy, {} unconfigured",
        report.healthy, report.unhealthy, report.unconfigured
    );
    report
}
