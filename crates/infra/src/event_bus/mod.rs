//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `scribe-events` as pure mechanics. This module
//! provides the durable Redis Streams transport for user lifecycle events.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
