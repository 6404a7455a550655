//! Background workers.

pub mod replica_worker;

pub use replica_worker::{ReplicaWorker, WorkerHandle};
