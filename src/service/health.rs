//! Health checks for the ready-room service
//!
//! Liveness only asks whether the service is running. Readiness and the full
//! check also query the coordination store and the broker connection.

use crate::amqp::AmqpConnection;
use crate::matchmaking::LobbyQueue;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Worst status across all components
    pub status: HealthStatus,
    /// Configured service name
    pub service: String,
    /// Crate version of the running binary
    pub version: String,
    /// When the check ran
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// One entry per checked component
    pub checks: Vec<ComponentCheck>,
    /// Queue and uptime figures
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name, e.g. "coordination_store"
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceStats {
    /// Lobbies queued across every type and region
    pub queued_lobbies: usize,
    /// Seconds since the monitor was created
    pub uptime_seconds: u64,
}

/// Answers health checks for a running service
pub struct HealthMonitor {
    service_name: String,
    running: Arc<RwLock<bool>>,
    queue: Arc<LobbyQueue>,
    amqp: Option<Arc<AmqpConnection>>,
    started_at: Instant,
}

impl HealthMonitor {
    pub fn new(
        service_name: impl Into<String>,
        running: Arc<RwLock<bool>>,
        queue: Arc<LobbyQueue>,
        amqp: Option<Arc<AmqpConnection>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            running,
            queue,
            amqp,
            started_at: Instant::now(),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Perform a comprehensive health check of the service
    pub async fn check(&self) -> Result<HealthCheck> {
        let service_check = self.check_service_running().await;
        let (store_check, queued_lobbies) = self.check_store().await;
        let amqp_check = self.check_amqp();

        let status = [&service_check, &store_check, &amqp_check]
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks: vec![service_check, store_check, amqp_check],
            stats: ServiceStats {
                queued_lobbies: queued_lobbies.unwrap_or_default(),
                uptime_seconds: self.uptime_seconds(),
            },
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(&self) -> HealthStatus {
        if self.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(&self) -> HealthStatus {
        if !self.is_running().await {
            return HealthStatus::Unhealthy;
        }
        let (store_check, _) = self.check_store().await;
        store_check.status.worst(self.check_amqp().status)
    }

    async fn check_service_running(&self) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if self.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Reading the queue size doubles as a store round trip
    async fn check_store(&self) -> (ComponentCheck, Option<usize>) {
        let start = Instant::now();

        let (status, message, total) = match self.queue.total().await {
            Ok(total) => (HealthStatus::Healthy, None, Some(total)),
            Err(e) => {
                debug!("Coordination store check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store unreachable: {}", e)),
                    None,
                )
            }
        };

        let check = ComponentCheck {
            name: "coordination_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, total)
    }

    /// Without a broker the service can still be driven in-process
    fn check_amqp(&self) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &self.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (HealthStatus::Healthy, Some("AMQP not configured".to_string())),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
