//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;

/// Queue that inbound matchmaking commands arrive on
pub const COMMAND_QUEUE: &str = "ready_room.commands";
/// Exchange for queue-count and lobby broadcasts
pub const QUEUE_EVENTS_EXCHANGE: &str = "ready_room.queue_events";
/// Exchange for ready-check and match broadcasts
pub const MATCH_EVENTS_EXCHANGE: &str = "ready_room.match_events";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }
}

/// Routing key a broadcast is published under; doubles as its scope
pub fn routing_key(event: &BroadcastEvent) -> String {
    match event {
        BroadcastEvent::QueueCounts(counts) => {
            format!("queue.counts.{}.{}", counts.match_type, counts.region)
        }
        BroadcastEvent::LobbyUpdate(update) => format!("lobby.{}", update.lobby_id),
        BroadcastEvent::ConfirmationUpdate(update) => {
            format!("confirmation.{}.{}", update.status.as_str(), update.region)
        }
        BroadcastEvent::MatchLive(live) => format!("match.live.{}", live.region),
    }
}

/// Exchange a broadcast belongs on
pub fn exchange_for(event: &BroadcastEvent) -> &'static str {
    match event {
        BroadcastEvent::QueueCounts(_) | BroadcastEvent::LobbyUpdate(_) => QUEUE_EVENTS_EXCHANGE,
        BroadcastEvent::ConfirmationUpdate(_) | BroadcastEvent::MatchLive(_) => {
            MATCH_EVENTS_EXCHANGE
        }
    }
}

/// Command parsing and validation utilities
pub struct CommandUtils;

impl CommandUtils {
    /// Deserialize a command from bytes, accepting either a bare command or an envelope
    pub fn deserialize_command(bytes: &[u8]) -> Result<MatchmakingCommand> {
        let command = match serde_json::from_slice::<MatchmakingCommand>(bytes) {
            Ok(command) => command,
            Err(bare_err) => serde_json::from_slice::<MessageEnvelope<MatchmakingCommand>>(bytes)
                .map(|envelope| envelope.payload)
                .map_err(|_| MatchmakingError::InvalidCommand {
                    reason: format!("Failed to deserialize command: {}", bare_err),
                })?,
        };

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Validate a command
    pub fn validate_command(command: &MatchmakingCommand) -> Result<()> {
        match command {
            MatchmakingCommand::Matchmake { region, .. } if region.trim().is_empty() => {
                Err(MatchmakingError::InvalidCommand {
                    reason: "Region cannot be empty".to_string(),
                }
                .into())
            }
            MatchmakingCommand::ConfirmPlayer { steam_id, .. } if steam_id.trim().is_empty() => {
                Err(MatchmakingError::InvalidCommand {
                    reason: "Steam ID cannot be empty".to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Serialize any command to bytes
    pub fn serialize_command(command: &MatchmakingCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        serde_json::to_vec(command).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize command: {}", e),
            }
            .into()
        })
    }
}
