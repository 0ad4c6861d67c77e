//! Configuration management for the ready-room service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values for the matchmaking service.

pub mod app;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, MatchmakingSettings, ServiceSettings,
    StoreBackend, StoreSettings,
};
