//! AMQP event publisher for outbound broadcasts
//!
//! Broadcasts are best-effort telemetry: callers log failures and carry on.

use crate::amqp::messages::{exchange_for, routing_key, MessageEnvelope};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish updated queue counts for a (type, region) pair
    async fn publish_queue_counts(&self, event: QueueCounts) -> Result<()>;

    /// Publish a ready-check state change
    async fn publish_confirmation_update(&self, event: ConfirmationUpdate) -> Result<()>;

    /// Publish a single lobby's queue state to its clients
    async fn publish_lobby_update(&self, event: LobbyUpdate) -> Result<()>;

    /// Publish a match that has been created and marked live
    async fn publish_match_live(&self, event: MatchLive) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchanges().await?;
        Ok(publisher)
    }

    /// Set up AMQP exchanges for events
    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [
            crate::amqp::messages::QUEUE_EVENTS_EXCHANGE,
            crate::amqp::messages::MATCH_EVENTS_EXCHANGE,
        ] {
            let args = ExchangeDeclareArguments::new(exchange, "topic");
            self.channel.exchange_declare(args).await.map_err(|e| {
                MatchmakingError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange {}: {}", exchange, e),
                }
            })?;
        }

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    /// Publish a broadcast with bounded retries
    async fn publish_event(&self, event: BroadcastEvent) -> Result<()> {
        let exchange = exchange_for(&event);
        let envelope = MessageEnvelope::new(event.clone(), routing_key(&event));

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, &envelope).await {
                Ok(_) => {
                    debug!(
                        "Published {} to {} ({})",
                        envelope.routing_key, exchange, envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish {} after {} retries: {}",
                            envelope.routing_key, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for {}: {}. Retrying in {:?}",
                        retry_count, envelope.routing_key, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(2000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<BroadcastEvent>,
    ) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_queue_counts(&self, event: QueueCounts) -> Result<()> {
        self.publish_event(BroadcastEvent::QueueCounts(event)).await
    }

    async fn publish_confirmation_update(&self, event: ConfirmationUpdate) -> Result<()> {
        self.publish_event(BroadcastEvent::ConfirmationUpdate(event))
            .await
    }

    async fn publish_lobby_update(&self, event: LobbyUpdate) -> Result<()> {
        self.publish_event(BroadcastEvent::LobbyUpdate(event)).await
    }

    async fn publish_match_live(&self, event: MatchLive) -> Result<()> {
        self.publish_event(BroadcastEvent::MatchLive(event)).await
    }
}

/// Event publisher that records everything it is given
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<BroadcastEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<BroadcastEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Count events of specific type
    pub fn count_events_of_type(&self, event_type: &str) -> usize {
        self.get_published_events()
            .iter()
            .filter(|event| {
                let name = match event {
                    BroadcastEvent::QueueCounts(_) => "QueueCounts",
                    BroadcastEvent::ConfirmationUpdate(_) => "ConfirmationUpdate",
                    BroadcastEvent::LobbyUpdate(_) => "LobbyUpdate",
                    BroadcastEvent::MatchLive(_) => "MatchLive",
                };
                name == event_type
            })
            .count()
    }

    /// Confirmation broadcasts with the given status
    pub fn confirmation_updates(&self, status: ConfirmationStatus) -> Vec<ConfirmationUpdate> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                BroadcastEvent::ConfirmationUpdate(update) if update.status == status => {
                    Some(update)
                }
                _ => None,
            })
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: BroadcastEvent) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_queue_counts(&self, event: QueueCounts) -> Result<()> {
        self.record(BroadcastEvent::QueueCounts(event));
        Ok(())
    }

    async fn publish_confirmation_update(&self, event: ConfirmationUpdate) -> Result<()> {
        self.record(BroadcastEvent::ConfirmationUpdate(event));
        Ok(())
    }

    async fn publish_lobby_update(&self, event: LobbyUpdate) -> Result<()> {
        self.record(BroadcastEvent::LobbyUpdate(event));
        Ok(())
    }

    async fn publish_match_live(&self, event: MatchLive) -> Result<()> {
        self.record(BroadcastEvent::MatchLive(event));
        Ok(())
    }
}
