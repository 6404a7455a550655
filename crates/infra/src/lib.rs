//! Infrastructure layer: stores, Redis transport, replication, config,
//! external service clients.

pub mod config;
pub mod event_bus;
pub mod external;
pub mod replication;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, IdentityConfig, VerifierMode};
pub use external::{IntrospectionError, RemoteIntrospector};
pub use replication::{ApplyOutcome, LifecyclePublisher, ReplicaSynchronizer, ReplicationError, SyncStats};
pub use store::{IdentityBackend, InMemoryIdentityStore, PostgresIdentityStore, RoleAdmin};
pub use workers::{ReplicaWorker, WorkerHandle};
