use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use scribe_core::EventId;

use crate::{Event, Topic};

/// Schema version stamped on every envelope this build publishes.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope for a lifecycle event, carrying log metadata.
///
/// This is the unit published on the durable log.
///
/// Notes:
/// - `topic` selects the partition (`user.created`, `user.updated`, `user.deleted`).
/// - `key` is the entity id; it is **not** an ordering key across topics.
/// - `payload` is the JSON body (`{id, ...fields}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E = JsonValue> {
    event_id: EventId,
    topic: String,
    key: String,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    payload: E,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        topic: impl Into<String>,
        key: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            topic: topic.into(),
            key: key.into(),
            schema_version: SCHEMA_VERSION,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Parsed topic, if it is one of the known lifecycle topics.
    pub fn known_topic(&self) -> Option<Topic> {
        Topic::parse(&self.topic)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event into a JSON envelope ready for publication.
    pub fn from_typed<T>(event: &T) -> Result<Self, serde_json::Error>
    where
        T: Event + Serialize,
    {
        Ok(Self::new(
            EventId::new(),
            event.topic().as_str(),
            event.key(),
            Utc::now(),
            serde_json::to_value(event)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_version_defaults_to_current() {
        let raw = serde_json::json!({
            "event_id": EventId::new(),
            "topic": "user.deleted",
            "key": "abc",
            "occurred_at": Utc::now(),
            "payload": { "id": "abc" },
        });

        let env: EventEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.schema_version(), SCHEMA_VERSION);
        assert_eq!(env.known_topic(), Some(Topic::UserDeleted));
    }

    #[test]
    fn unknown_topic_is_not_a_lifecycle_topic() {
        let env = EventEnvelope::new(EventId::new(), "article.viewed", "1", Utc::now(), JsonValue::Null);
        assert_eq!(env.known_topic(), None);
    }
}
