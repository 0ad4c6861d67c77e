//! Main application state and service coordination
//!
//! `AppState` wires the matchmaking core to its production collaborators,
//! then runs the command consumer, the delayed-job worker, the periodic
//! sweep and the health server until shutdown.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{command_name, CommandConsumer, CommandHandler};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::{AppConfig, StoreBackend};
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::game::{MatchService, StoreMatchService};
use crate::jobs::{DueJob, JobScheduler, TokioJobScheduler};
use crate::lobby::{LobbyRegistry, StoreLobbyRegistry};
use crate::matchmaking::{Collaborators, ConfirmOutcome, Matchmaker};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::HealthMonitor;
use crate::store::{CoordinationStore, MemoryStore};
use crate::types::MatchmakingCommand;
use amqprs::channel::QueueDeclareArguments;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Routes consumed commands into the matchmaking core
pub struct MatchmakerCommandHandler {
    matchmaker: Arc<Matchmaker>,
    metrics: Arc<MetricsCollector>,
}

impl MatchmakerCommandHandler {
    pub fn new(matchmaker: Arc<Matchmaker>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            matchmaker,
            metrics,
        }
    }

    async fn execute(&self, command: MatchmakingCommand) -> MatchmakingResult<()> {
        match command {
            MatchmakingCommand::AddLobby { lobby_id } => {
                if !self.matchmaker.add_lobby_to_queue(lobby_id).await? {
                    warn!("Ignoring queue request for unknown lobby {}", lobby_id);
                }
            }
            MatchmakingCommand::LeaveQueue { lobby_id } => {
                self.matchmaker.remove_lobby_from_queue(lobby_id).await?;
            }
            MatchmakingCommand::Matchmake { match_type, region } => {
                let outcome = self.matchmaker.matchmake(match_type, &region).await?;
                debug!(
                    "Requested pass for {} in {} - ran: {}, confirmations: {}",
                    match_type,
                    region,
                    outcome.ran,
                    outcome.confirmations.len()
                );
            }
            MatchmakingCommand::ConfirmPlayer {
                confirmation_id,
                steam_id,
            } => match self
                .matchmaker
                .confirm_player(confirmation_id, &steam_id)
                .await?
            {
                ConfirmOutcome::Finalized { match_id } => info!(
                    "Confirmation {} finalized as match {}",
                    confirmation_id, match_id
                ),
                ConfirmOutcome::CreationFailed { reason } => warn!(
                    "Confirmation {} could not create a match: {}",
                    confirmation_id, reason
                ),
                ConfirmOutcome::Waiting { confirmed, expected } => debug!(
                    "Confirmation {} at {}/{}",
                    confirmation_id, confirmed, expected
                ),
                ConfirmOutcome::Closed => debug!(
                    "Player {} confirmed closed confirmation {}",
                    steam_id, confirmation_id
                ),
            },
            MatchmakingCommand::CancelMatchmaking {
                confirmation_id,
                has_match,
            } => {
                self.matchmaker
                    .cancel_matchmaking(confirmation_id, has_match)
                    .await?;
            }
            MatchmakingCommand::CancelMatchmakingByMatch { match_id } => {
                self.matchmaker
                    .cancel_matchmaking_by_match_id(match_id)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for MatchmakerCommandHandler {
    async fn handle_command(&self, command: MatchmakingCommand) -> MatchmakingResult<()> {
        let name = command_name(&command);
        let result = self.execute(command).await;
        self.metrics.record_amqp_operation(name, result.is_ok());
        result
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        let operation = match &error {
            MatchmakingError::InvalidCommand { .. } => "decode",
            _ => "command",
        };
        self.metrics.record_amqp_operation(operation, false);

        error!(
            "Command handling error - type: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );
        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

/// Deliver due jobs to the matchmaker until the channel closes
pub async fn run_job_worker(matchmaker: Arc<Matchmaker>, mut due: mpsc::UnboundedReceiver<DueJob>) {
    info!("Job worker started");
    while let Some(job) = due.recv().await {
        let matchmaker = matchmaker.clone();
        // Jobs run concurrently; ordering between them is not guaranteed.
        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            if let Err(e) = matchmaker.run_job(job).await {
                warn!("Job {} failed: {}", job_id, e);
            }
        });
    }
    info!("Job worker stopped");
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    matchmaker: Arc<Matchmaker>,
    amqp_connection: Arc<AmqpConnection>,
    metrics_service: Arc<MetricsService>,
    monitor: Arc<HealthMonitor>,
    due_jobs: Option<mpsc::UnboundedReceiver<DueJob>>,
    background_tasks: Vec<JoinHandle<()>>,
    command_consumer: Option<CommandConsumer>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing ready-room matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}, store={:?}, regions={:?}",
            config.service.name, config.amqp.url, config.store.backend, config.matchmaking.regions
        );

        let store = Self::initialize_store(&config).await?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;
        let publisher_config = PublisherConfig {
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let publisher: Arc<dyn EventPublisher> = Arc::new(
            AmqpEventPublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        let (jobs, due_jobs) = TokioJobScheduler::new();
        let registry: Arc<dyn LobbyRegistry> =
            Arc::new(StoreLobbyRegistry::new(store.clone(), publisher.clone()));
        let matches: Arc<dyn MatchService> =
            Arc::new(StoreMatchService::new(store.clone(), publisher.clone()));
        let jobs: Arc<dyn JobScheduler> = Arc::new(jobs);

        let matchmaker = Arc::new(Matchmaker::new(
            config.matchmaking.clone(),
            Collaborators {
                store,
                registry,
                jobs,
                matches,
                publisher,
                metrics: metrics_collector.clone(),
            },
        ));

        let is_running = Arc::new(RwLock::new(false));
        let monitor = Arc::new(HealthMonitor::new(
            config.service.name.clone(),
            is_running.clone(),
            matchmaker.queue().clone(),
            Some(amqp_connection.clone()),
        ));

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_monitor(monitor.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(Self {
            config,
            matchmaker,
            amqp_connection,
            metrics_service,
            monitor,
            due_jobs: Some(due_jobs),
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting ready-room matchmaking service");

        *self.is_running.write().await = true;

        self.start_metrics_service();
        self.start_job_worker()?;
        self.start_sweep_task();
        self.start_amqp_consumption().await?;

        info!("✅ Ready-room matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of ready-room service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP command consumption stopped");
            }
        }

        self.metrics_service.stop();
        self.stop_background_tasks().await;

        let queued = self
            .matchmaker
            .queue()
            .total()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to read final queue size: {}", e),
            })?;
        info!("Lobbies still queued at shutdown: {}", queued);
        info!("✅ Ready-room service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn monitor(&self) -> Arc<HealthMonitor> {
        self.monitor.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn CoordinationStore>, ServiceError> {
        match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-process coordination store");
                Ok(Arc::new(MemoryStore::new()))
            }
            #[cfg(feature = "redis")]
            StoreBackend::Redis => {
                let store = crate::store::RedisStore::connect(&config.store.redis_url)
                    .await
                    .map_err(|e| ServiceError::Initialization {
                        message: format!("Failed to connect to coordination store: {}", e),
                    })?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis"))]
            StoreBackend::Redis => Err(ServiceError::Configuration {
                message: "Redis store requested but the `redis` feature is not enabled"
                    .to_string(),
            }),
        }
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        info!("Health and metrics endpoints starting on port {}", port);
    }

    fn start_job_worker(&mut self) -> Result<(), ServiceError> {
        let due = self
            .due_jobs
            .take()
            .ok_or_else(|| ServiceError::BackgroundTask {
                message: "Job worker already started".to_string(),
            })?;
        let handle = tokio::spawn(run_job_worker(self.matchmaker.clone(), due));
        self.background_tasks.push(handle);
        Ok(())
    }

    /// Periodic pass over every type and region so nothing waits on an event
    fn start_sweep_task(&mut self) {
        let matchmaker = self.matchmaker.clone();
        let is_running = self.is_running.clone();
        let sweep_interval = self.config.sweep_interval();
        info!("Starting sweep task ({}s interval)", sweep_interval.as_secs());

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while *is_running.read().await {
                interval.tick().await;
                match matchmaker.sweep().await {
                    Ok(0) => debug!("Sweep completed - no confirmations opened"),
                    Ok(opened) => info!("Sweep opened {} confirmations", opened),
                    Err(e) => warn!("Sweep failed: {}", e),
                }
            }

            info!("Sweep task stopped");
        });
        self.background_tasks.push(handle);
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.command_queue.clone();

        let channel = self
            .amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;
        info!("Queue '{}' declared successfully", queue_name);

        let handler = Arc::new(MatchmakerCommandHandler::new(
            self.matchmaker.clone(),
            self.metrics_service.collector(),
        ));
        let consumer = CommandConsumer::new(handler, channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        self.metrics_service
            .collector()
            .update_component_health("amqp", true);
        info!("Listening for matchmaking commands on '{}'", queue_name);
        Ok(())
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        // Give aborted tasks a moment to unwind.
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}
