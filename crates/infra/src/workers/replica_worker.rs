use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use scribe_auth::ReplicaStore;
use scribe_events::{EventEnvelope, Subscription};

use crate::replication::ReplicaSynchronizer;

/// Handle to control and join a background worker.
///
/// Dropping the handle also stops the worker; keep it for the worker's lifetime.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A delivery already being applied finishes first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
}

/// Replica consume loop.
///
/// - Reads one subscription sequentially (ordering within a topic is kept)
/// - Applies each delivery through the synchronizer, which logs and counts failures
/// - Acknowledges every delivery, applied or not, so a poisoned event is not redelivered forever
/// - Stops on shutdown or when the bus side goes away
#[derive(Debug)]
pub struct ReplicaWorker;

impl ReplicaWorker {
    pub fn spawn<S>(
        name: &'static str,
        subscription: Subscription<EventEnvelope<JsonValue>>,
        synchronizer: Arc<ReplicaSynchronizer<S>>,
    ) -> WorkerHandle
    where
        S: ReplicaStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(worker_loop(name, subscription, synchronizer, shutdown_rx));

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

async fn worker_loop<S>(
    name: &'static str,
    mut subscription: Subscription<EventEnvelope<JsonValue>>,
    synchronizer: Arc<ReplicaSynchronizer<S>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    S: ReplicaStore,
{
    info!(worker = name, "replica worker started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            next = subscription.recv() => match next {
                Some(delivery) => delivery,
                None => {
                    debug!(worker = name, "subscription closed");
                    break;
                }
            },
        };

        synchronizer.handle(delivery.message()).await;
        subscription.ack(&delivery);
    }

    let stats = synchronizer.stats();
    info!(
        worker = name,
        applied = stats.applied,
        already_applied = stats.already_applied,
        missed = stats.missed,
        removed = stats.removed,
        absent = stats.absent,
        failed = stats.failed,
        "replica worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use scribe_auth::{UserLifecycleEvent, UserReplica, UserUpdated, UserPatch};
    use scribe_core::UserId;
    use scribe_events::{EventBus, InMemoryEventBus};

    use crate::store::InMemoryIdentityStore;

    fn created(id: UserId) -> EventEnvelope<JsonValue> {
        EventEnvelope::from_typed(&UserLifecycleEvent::Created(UserReplica {
            id,
            email: format!("{id}@example.com"),
            username: "u".to_string(),
            password_hash: "$argon2id$fake".to_string(),
            first_name: None,
            last_name: None,
            is_active: true,
            is_verified: true,
        }))
        .unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn poisoned_event_does_not_stop_replication() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sync = Arc::new(ReplicaSynchronizer::new(InMemoryIdentityStore::new()));
        let handle = ReplicaWorker::spawn("replica-test", bus.subscribe(), sync.clone());

        let poisoned = EventEnvelope::new(
            scribe_core::EventId::new(),
            "user.created",
            "x",
            chrono::Utc::now(),
            serde_json::json!({ "garbage": true }),
        );
        let early_update = EventEnvelope::from_typed(&UserLifecycleEvent::Updated(UserUpdated {
            id: UserId::new(),
            patch: UserPatch::default(),
        }))
        .unwrap();
        let id = UserId::new();

        bus.publish(poisoned).unwrap();
        bus.publish(early_update).unwrap();
        bus.publish(created(id)).unwrap();

        wait_for(|| sync.stats().applied == 1).await;
        let stats = sync.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.missed, 1);
        assert_eq!(sync.store().user_count(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn worker_stops_when_bus_is_dropped() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sync = Arc::new(ReplicaSynchronizer::new(InMemoryIdentityStore::new()));
        let handle = ReplicaWorker::spawn("replica-test", bus.subscribe(), sync);

        drop(bus);
        wait_for(|| handle.is_finished()).await;
    }
}
