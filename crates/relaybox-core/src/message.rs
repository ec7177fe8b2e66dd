use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optional per-message key/value context, persisted as JSONB. Carries
/// cross-cutting data such as trace identifiers through to the broker.
pub type Metadata = HashMap<String, String>;

/// A durable outbox message.
///
/// Written by a `Writer` in the same transaction as the business entities
/// it announces, later read back and delivered to a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the database on insert; zero before the message is
    /// written.
    #[serde(default)]
    pub id: i64,

    /// Target broker family, e.g. "kafka" or "sns".
    pub broker: String,

    /// Destination within the broker: a topic name or an ARN.
    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Message body; must be valid JSON. Ideally published as-is, but a
    /// [`crate::MessageTransformer`] may reshape it for its broker.
    pub payload: Vec<u8>,
}

impl Message {
    /// Check the model invariants: `broker`, `topic` and `payload` are
    /// required, and `payload` must parse as JSON.
    pub fn validate(&self) -> Result<()> {
        if self.broker.is_empty() {
            return Err(Error::BrokerEmpty);
        }
        if self.topic.is_empty() {
            return Err(Error::TopicEmpty);
        }
        if self.payload.is_empty() {
            return Err(Error::PayloadEmpty);
        }
        if let Err(e) = serde_json::from_slice::<serde_json::Value>(&self.payload) {
            return Err(Error::PayloadNotJson(e));
        }
        Ok(())
    }

    /// Parse the payload into a JSON value. Only valid after
    /// [`Message::validate`] has passed, hence the error passthrough.
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.payload).map_err(Error::PayloadNotJson)
    }
}

/// Validate a batch, reporting the index of the first invalid message.
pub fn validate_all(messages: &[Message]) -> Result<()> {
    for (index, message) in messages.iter().enumerate() {
        if let Err(source) = message.validate() {
            return Err(Error::Invalid {
                index,
                source: Box::new(source),
            });
        }
    }
    Ok(())
}
