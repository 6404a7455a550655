//! Replica synchronizer: applies `user.created` / `user.updated` /
//! `user.deleted` to a local replica store.
//!
//! ## Idempotency
//!
//! Every handler is independently idempotent, because delivery is
//! at-least-once and topics share no ordering:
//!
//! - create: insert-if-absent; an existing row means already applied
//! - update: patch the existing row; a missing row is a logged miss (no row is created)
//! - delete: remove if present; absence is not an error
//!
//! ## Failure Policy
//!
//! [`ReplicaSynchronizer::handle`] catches and logs every failure. One bad
//! event never stops replication for other users.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use scribe_auth::{ReplicaStore, StoreError, UserLifecycleEvent, UserPatch, UserReplica};
use scribe_core::UserId;
use scribe_events::{EventEnvelope, SCHEMA_VERSION, Topic};

/// Result of applying one lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Row inserted or patched.
    Applied,
    /// Create replayed for a row that already exists.
    AlreadyApplied,
    /// Update for a row that does not exist; dropped.
    Missed,
    /// Row deleted.
    Removed,
    /// Delete for a row that does not exist.
    Absent,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::AlreadyApplied => "already_applied",
            ApplyOutcome::Missed => "missed",
            ApplyOutcome::Removed => "removed",
            ApplyOutcome::Absent => "absent",
        }
    }
}

/// Per-event apply failure (non-fatal to the consume loop).
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u32),

    #[error("undecodable {topic} payload: {reason}")]
    Decode { topic: Topic, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Snapshot of synchronizer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub applied: u64,
    pub already_applied: u64,
    pub missed: u64,
    pub removed: u64,
    pub absent: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    already_applied: AtomicU64,
    missed: AtomicU64,
    removed: AtomicU64,
    absent: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Applied => &self.applied,
            ApplyOutcome::AlreadyApplied => &self.already_applied,
            ApplyOutcome::Missed => &self.missed,
            ApplyOutcome::Removed => &self.removed,
            ApplyOutcome::Absent => &self.absent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SyncStats {
        SyncStats {
            applied: self.applied.load(Ordering::Relaxed),
            already_applied: self.already_applied.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            absent: self.absent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct ReplicaSynchronizer<S> {
    store: S,
    counters: Counters,
}

impl<S> ReplicaSynchronizer<S>
where
    S: ReplicaStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    pub async fn on_created(&self, row: UserReplica) -> Result<ApplyOutcome, ReplicationError> {
        if self.store.insert_if_absent(row).await? {
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::AlreadyApplied)
        }
    }

    pub async fn on_updated(&self, id: UserId, patch: &UserPatch) -> Result<ApplyOutcome, ReplicationError> {
        if self.store.apply_patch(id, patch).await? {
            Ok(ApplyOutcome::Applied)
        } else {
            warn!(user_id = %id, "update for unknown user dropped");
            Ok(ApplyOutcome::Missed)
        }
    }

    pub async fn on_deleted(&self, id: UserId) -> Result<ApplyOutcome, ReplicationError> {
        if self.store.remove(id).await? {
            Ok(ApplyOutcome::Removed)
        } else {
            Ok(ApplyOutcome::Absent)
        }
    }

    pub async fn apply_event(&self, event: UserLifecycleEvent) -> Result<ApplyOutcome, ReplicationError> {
        match event {
            UserLifecycleEvent::Created(row) => self.on_created(row).await,
            UserLifecycleEvent::Updated(update) => self.on_updated(update.id, &update.patch).await,
            UserLifecycleEvent::Deleted(delete) => self.on_deleted(delete.id).await,
        }
    }

    /// Decode and apply one envelope off the log.
    pub async fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, ReplicationError> {
        if envelope.schema_version() != SCHEMA_VERSION {
            return Err(ReplicationError::UnsupportedSchema(envelope.schema_version()));
        }
        let topic = envelope
            .known_topic()
            .ok_or_else(|| ReplicationError::UnknownTopic(envelope.topic().to_string()))?;
        let event = UserLifecycleEvent::decode(topic, envelope.payload()).map_err(|e| ReplicationError::Decode {
            topic,
            reason: e.to_string(),
        })?;
        self.apply_event(event).await
    }

    /// Apply an envelope, logging and counting the outcome. Never fails.
    #[instrument(
        skip(self, envelope),
        fields(topic = %envelope.topic(), key = %envelope.key(), event_id = %envelope.event_id())
    )]
    pub async fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Option<ApplyOutcome> {
        match self.apply(envelope).await {
            Ok(outcome) => {
                self.counters.record(outcome);
                info!(outcome = outcome.as_str(), "replica event handled");
                Some(outcome)
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "replica event failed to apply");
                None
            }
        }
    }
}
