//! Lifecycle publication from the service that owns user data.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use scribe_auth::{UserDeleted, UserLifecycleEvent, UserPatch, UserReplica, UserUpdated};
use scribe_core::UserId;
use scribe_events::{Event, EventBus, EventEnvelope};

/// Object-safe view of an envelope bus (erases the transport error type).
trait EnvelopeSink: Send + Sync {
    fn send(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String>;
}

impl<B> EnvelopeSink for B
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn send(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String> {
        self.publish(envelope).map_err(|e| e.to_string())
    }
}

/// Publishes `user.*` events after writes to the system of record.
///
/// Fire-and-forget: a failed publish is logged and reported as `false`, never
/// raised into the write path.
#[derive(Clone)]
pub struct LifecyclePublisher {
    sink: Arc<dyn EnvelopeSink>,
}

impl core::fmt::Debug for LifecyclePublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecyclePublisher").finish_non_exhaustive()
    }
}

impl LifecyclePublisher {
    pub fn new<B>(bus: B) -> Self
    where
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        Self { sink: Arc::new(bus) }
    }

    pub fn publish(&self, event: &UserLifecycleEvent) -> bool {
        let envelope = match EventEnvelope::from_typed(event) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %event.topic(), user_id = %event.user_id(), error = %e, "lifecycle event not serializable");
                return false;
            }
        };
        let event_id = envelope.event_id();
        match self.sink.send(envelope) {
            Ok(()) => {
                debug!(topic = %event.topic(), user_id = %event.user_id(), event_id = %event_id, "lifecycle event published");
                true
            }
            Err(e) => {
                warn!(topic = %event.topic(), user_id = %event.user_id(), error = %e, "lifecycle event publish failed");
                false
            }
        }
    }

    pub fn user_created(&self, row: UserReplica) -> bool {
        self.publish(&UserLifecycleEvent::Created(row))
    }

    pub fn user_updated(&self, id: UserId, patch: UserPatch) -> bool {
        self.publish(&UserLifecycleEvent::Updated(UserUpdated { id, patch }))
    }

    pub fn user_deleted(&self, id: UserId) -> bool {
        self.publish(&UserLifecycleEvent::Deleted(UserDeleted { id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_events::{InMemoryEventBus, Topic};

    #[test]
    fn publishes_one_envelope_per_event_on_its_topic() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let mut sub = bus.subscribe();
        let publisher = LifecyclePublisher::new(bus);

        let id = UserId::new();
        assert!(publisher.user_deleted(id));

        let delivery = sub.try_recv().unwrap();
        let envelope = delivery.message();
        assert_eq!(envelope.known_topic(), Some(Topic::UserDeleted));
        assert_eq!(envelope.key(), id.to_string());
        assert_eq!(envelope.payload(), &serde_json::json!({ "id": id }));
    }
}
