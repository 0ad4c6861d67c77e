//! AMQP command consumer
//!
//! Deliveries on the command queue are decoded into [`MatchmakingCommand`]s
//! and handed to a [`CommandHandler`]. Malformed messages and handler
//! failures go to the handler's error hook; the consumer never stops on them.

use crate::amqp::messages::CommandUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::MatchmakingCommand;
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Receives decoded commands from the consumer
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(&self, command: MatchmakingCommand) -> Result<()>;

    /// Called for undecodable messages and failed commands
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Consumer bound to the matchmaking command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("ready-room-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(false)
            .finish();

        self.channel
            .basic_consume(CommandDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

struct CommandDelivery {
    handler: Arc<dyn CommandHandler>,
}

impl CommandDelivery {
    fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for CommandDelivery {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        debug!(
            "Command received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            deliver.delivery_tag(),
            deliver.routing_key(),
            content.len()
        );
        dispatch_message(self.handler.as_ref(), &content).await;
    }
}

/// Decode one message and hand it to `handler`; returns whether it succeeded
pub async fn dispatch_message(handler: &dyn CommandHandler, content: &[u8]) -> bool {
    let start_time = std::time::Instant::now();

    let command = match CommandUtils::deserialize_command(content) {
        Ok(command) => command,
        Err(e) => {
            let error = match e.downcast::<MatchmakingError>() {
                Ok(error) => error,
                Err(other) => MatchmakingError::InternalError {
                    message: other.to_string(),
                },
            };
            handler.handle_error(error, content).await;
            return false;
        }
    };

    let name = command_name(&command);
    match handler.handle_command(command).await {
        Ok(()) => {
            debug!(
                "Command {} processed in {:.2}ms",
                name,
                start_time.elapsed().as_secs_f64() * 1000.0
            );
            true
        }
        Err(e) => {
            error!(
                "Command {} failed after {:.2}ms: {}",
                name,
                start_time.elapsed().as_secs_f64() * 1000.0,
                e
            );
            let error = match e.downcast::<MatchmakingError>() {
                Ok(error) => error,
                Err(other) => MatchmakingError::InternalError {
                    message: other.to_string(),
                },
            };
            handler.handle_error(error, content).await;
            false
        }
    }
}

/// Short label used in logs and metrics
pub fn command_name(command: &MatchmakingCommand) -> &'static str {
    match command {
        MatchmakingCommand::AddLobby { .. } => "add_lobby",
        MatchmakingCommand::LeaveQueue { .. } => "leave_queue",
        MatchmakingCommand::Matchmake { .. } => "matchmake",
        MatchmakingCommand::ConfirmPlayer { .. } => "confirm_player",
        MatchmakingCommand::CancelMatchmaking { .. } => "cancel_matchmaking",
        MatchmakingCommand::CancelMatchmakingByMatch { .. } => "cancel_matchmaking_by_match",
    }
}

/// Mock command handler for testing
pub struct MockCommandHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<MatchmakingCommand>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
    fail_commands: bool,
}

impl Default for MockCommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self {
            received_commands: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            fail_commands: false,
        }
    }

    /// A handler that rejects every command it receives
    pub fn failing() -> Self {
        Self {
            fail_commands: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, command: MatchmakingCommand) -> Result<()> {
        self.received_commands.lock().await.push(command);
        if self.fail_commands {
            return Err(MatchmakingError::InternalError {
                message: "mock handler rejects commands".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}
