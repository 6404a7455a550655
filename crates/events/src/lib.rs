//! `scribe-events`: lifecycle events and the transport-agnostic event bus.
//!
//! This crate holds the mechanics only: envelopes, topics, pub/sub and
//! delivery receipts. Durable transports live in `scribe-infra`.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{Delivery, DeliveryReceipt, EventBus, Subscription};
pub use envelope::{EventEnvelope, SCHEMA_VERSION};
pub use event::{Event, Topic};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
