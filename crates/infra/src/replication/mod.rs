//! User replication: publishing lifecycle events from the owning service and
//! applying them to a local replica everywhere else.

pub mod publisher;
pub mod synchronizer;

pub use publisher::LifecyclePublisher;
pub use synchronizer::{ApplyOutcome, ReplicaSynchronizer, ReplicationError, SyncStats};
