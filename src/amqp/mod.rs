//! AMQP integration for the matchmaking service
//!
//! Connection handling, the inbound command consumer and the outbound event
//! publisher.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
