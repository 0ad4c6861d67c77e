//! Service layer for the ready-room matchmaking service
//!
//! Production wiring, background tasks and health checks.

pub mod app;
pub mod health;

pub use app::{run_job_worker, AppState, MatchmakerCommandHandler, ServiceError};
pub use health::{HealthCheck, HealthMonitor, HealthStatus};
