//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the ready-room matchmaking
//! service using Prometheus metrics.

use crate::types::MatchType;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Matchmaking pass and ready-check metrics
    matchmaking_metrics: MatchmakingMetrics,

    /// Delayed job metrics
    job_metrics: JobMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Passes by outcome (ran, skipped, failed)
    pub passes_total: IntCounterVec,

    pub pass_duration: HistogramVec,

    /// Ready checks by terminal or initial status
    pub confirmations_total: IntCounterVec,

    pub lobbies_requeued_total: IntCounter,

    pub lobbies_dropped_total: IntCounter,

    pub match_creation_failures_total: IntCounterVec,

    /// Players left unplaced by the last pass
    pub unplaced_players: IntGaugeVec,

    /// Lobbies currently queued per (type, region)
    pub queued_lobbies: IntGaugeVec,
}

#[derive(Clone)]
pub struct JobMetrics {
    pub jobs_scheduled_total: IntCounterVec,

    pub jobs_run_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let job_metrics = JobMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            matchmaking_metrics,
            job_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    pub fn jobs(&self) -> &JobMetrics {
        &self.job_metrics
    }

    /// Record a matchmaking pass that got past the region lock
    pub fn record_pass(&self, match_type: MatchType, region: &str, unplaced: usize, duration: Duration) {
        self.matchmaking_metrics
            .passes_total
            .with_label_values(&[match_type.as_str(), "ran"])
            .inc();
        self.matchmaking_metrics
            .pass_duration
            .with_label_values(&[match_type.as_str()])
            .observe(duration.as_secs_f64());
        self.matchmaking_metrics
            .unplaced_players
            .with_label_values(&[match_type.as_str(), region])
            .set(unplaced as i64);
    }

    /// Record a pass that returned early because the region was claimed
    pub fn record_pass_skipped(&self, match_type: MatchType) {
        self.matchmaking_metrics
            .passes_total
            .with_label_values(&[match_type.as_str(), "skipped"])
            .inc();
    }

    pub fn record_pass_failed(&self, match_type: MatchType) {
        self.matchmaking_metrics
            .passes_total
            .with_label_values(&[match_type.as_str(), "failed"])
            .inc();
    }

    /// Record a ready-check transition (created, finalized, cancelled)
    pub fn record_confirmation(&self, match_type: MatchType, status: &str) {
        self.matchmaking_metrics
            .confirmations_total
            .with_label_values(&[match_type.as_str(), status])
            .inc();
    }

    pub fn record_lobby_outcomes(&self, requeued: usize, dropped: usize) {
        self.matchmaking_metrics
            .lobbies_requeued_total
            .inc_by(requeued as u64);
        self.matchmaking_metrics
            .lobbies_dropped_total
            .inc_by(dropped as u64);
    }

    pub fn record_match_creation_failure(&self, match_type: MatchType) {
        self.matchmaking_metrics
            .match_creation_failures_total
            .with_label_values(&[match_type.as_str()])
            .inc();
    }

    pub fn update_queue_count(&self, match_type: MatchType, region: &str, lobbies: usize) {
        self.matchmaking_metrics
            .queued_lobbies
            .with_label_values(&[match_type.as_str(), region])
            .set(lobbies as i64);
    }

    pub fn record_job_scheduled(&self, job: &str) {
        self.job_metrics
            .jobs_scheduled_total
            .with_label_values(&[job])
            .inc();
    }

    pub fn record_job_run(&self, job: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.job_metrics
            .jobs_run_total
            .with_label_values(&[job, status])
            .inc();
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("ready_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "ready_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("ready_room_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "ready_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("ready_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let passes_total = IntCounterVec::new(
            Opts::new("ready_room_passes_total", "Matchmaking passes by outcome"),
            &["match_type", "outcome"],
        )?;
        registry.register(Box::new(passes_total.clone()))?;

        let pass_duration = HistogramVec::new(
            HistogramOpts::new(
                "ready_room_pass_duration_seconds",
                "Matchmaking pass duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["match_type"],
        )?;
        registry.register(Box::new(pass_duration.clone()))?;

        let confirmations_total = IntCounterVec::new(
            Opts::new(
                "ready_room_confirmations_total",
                "Ready checks by status",
            ),
            &["match_type", "status"],
        )?;
        registry.register(Box::new(confirmations_total.clone()))?;

        let lobbies_requeued_total = IntCounter::new(
            "ready_room_lobbies_requeued_total",
            "Lobbies requeued after a cancelled ready check",
        )?;
        registry.register(Box::new(lobbies_requeued_total.clone()))?;

        let lobbies_dropped_total = IntCounter::new(
            "ready_room_lobbies_dropped_total",
            "Lobbies dropped after a cancelled ready check",
        )?;
        registry.register(Box::new(lobbies_dropped_total.clone()))?;

        let match_creation_failures_total = IntCounterVec::new(
            Opts::new(
                "ready_room_match_creation_failures_total",
                "Failed match creations",
            ),
            &["match_type"],
        )?;
        registry.register(Box::new(match_creation_failures_total.clone()))?;

        let unplaced_players = IntGaugeVec::new(
            Opts::new(
                "ready_room_unplaced_players",
                "Players left unplaced by the last pass",
            ),
            &["match_type", "region"],
        )?;
        registry.register(Box::new(unplaced_players.clone()))?;

        let queued_lobbies = IntGaugeVec::new(
            Opts::new("ready_room_queued_lobbies", "Lobbies currently queued"),
            &["match_type", "region"],
        )?;
        registry.register(Box::new(queued_lobbies.clone()))?;

        Ok(Self {
            passes_total,
            pass_duration,
            confirmations_total,
            lobbies_requeued_total,
            lobbies_dropped_total,
            match_creation_failures_total,
            unplaced_players,
            queued_lobbies,
        })
    }
}

impl JobMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let jobs_scheduled_total = IntCounterVec::new(
            Opts::new("ready_room_jobs_scheduled_total", "Delayed jobs scheduled"),
            &["job"],
        )?;
        registry.register(Box::new(jobs_scheduled_total.clone()))?;

        let jobs_run_total = IntCounterVec::new(
            Opts::new("ready_room_jobs_run_total", "Delayed jobs run"),
            &["job", "status"],
        )?;
        registry.register(Box::new(jobs_run_total.clone()))?;

        Ok(Self {
            jobs_scheduled_total,
            jobs_run_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _matchmaking = collector.matchmaking();
        let _jobs = collector.jobs();
    }

    #[test]
    fn test_pass_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_pass(MatchType::Competitive, "na", 3, Duration::from_millis(12));
        collector.record_pass_skipped(MatchType::Competitive);

        let passes = &collector.matchmaking().passes_total;
        assert_eq!(passes.with_label_values(&["competitive", "ran"]).get(), 1);
        assert_eq!(passes.with_label_values(&["competitive", "skipped"]).get(), 1);
        assert_eq!(
            collector
                .matchmaking()
                .unplaced_players
                .with_label_values(&["competitive", "na"])
                .get(),
            3
        );
    }

    #[test]
    fn test_confirmation_and_lobby_outcomes() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_confirmation(MatchType::Wingman, "cancelled");
        collector.record_lobby_outcomes(2, 1);
        collector.record_match_creation_failure(MatchType::Wingman);

        let mm = collector.matchmaking();
        assert_eq!(
            mm.confirmations_total
                .with_label_values(&["wingman", "cancelled"])
                .get(),
            1
        );
        assert_eq!(mm.lobbies_requeued_total.get(), 2);
        assert_eq!(mm.lobbies_dropped_total.get(), 1);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().unwrap();

        collector.update_health_status(2);
        collector.update_component_health("store", true);
        collector.update_component_health("amqp", false);
        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
