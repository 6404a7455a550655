//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! - **Durable delivery**: entries persist until the consumer acknowledges them
//! - **At-least-once**: unacknowledged entries are reclaimed after an idle timeout
//! - **Consumer groups**: each replica service reads through its own group
//! - **Dead-letter handling**: entries delivered `max_retries` times go to the DLQ
//!
//! ## Layout
//!
//! - **Stream keys**: one per topic, `{prefix}:{topic}` (e.g. `scribe:events:user.created`).
//!   Ordering holds inside a stream, never across streams.
//! - **Consumer groups**: one per replica service (e.g. `identity.replica`)
//! - **Dead-letter queue**: `{prefix}:dlq`
//!
//! ## Acknowledgement
//!
//! Deliveries carry a [`DeliveryReceipt`] naming the stream and entry id.
//! `Subscription::ack` forwards the receipt to the polling thread, which issues
//! `XACK` before its next read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, instrument, warn};

use scribe_events::{Delivery, DeliveryReceipt, EventBus, EventEnvelope, Subscription, Topic};

const DEFAULT_STREAM_PREFIX: &str = "scribe:events";

const DEFAULT_MAX_RETRIES: u32 = 5;

/// Entries pending longer than this are reclaimed for redelivery.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

const DEFAULT_BATCH_SIZE: usize = 10;

const DEFAULT_BLOCK_MS: u64 = 100;

/// `(stream, entry id)` delivered by this consumer and not yet acknowledged.
type InFlight = HashSet<(String, String)>;

/// Back-off after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_prefix: String,
    max_retries: u32,
    pending_timeout_ms: u64,
    batch_size: usize,
    block_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

impl RedisStreamsEventBus {
    /// Create a new bus for `redis_url` (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            block_ms: DEFAULT_BLOCK_MS,
        })
    }

    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = prefix.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn stream_key(&self, topic: Topic) -> String {
        format!("{}:{}", self.stream_prefix, topic.as_str())
    }

    pub fn dlq_key(&self) -> String {
        format!("{}:dlq", self.stream_prefix)
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists on every topic stream (idempotent).
    ///
    /// New groups start at `0`, so a fresh replica reads each stream from the
    /// beginning.
    pub fn ensure_consumer_group(&self, group_name: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        for topic in Topic::ALL {
            let created: redis::RedisResult<String> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.stream_key(topic))
                .arg(group_name)
                .arg("0")
                .arg("MKSTREAM")
                .query(&mut conn);

            if let Err(e) = created {
                if e.code() != Some("BUSYGROUP") {
                    return Err(RedisStreamsError::ConsumerGroup(e.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Append an envelope to its topic stream.
    #[instrument(
        skip(self, message),
        fields(topic = %message.topic(), key = %message.key(), event_id = %message.event_id()),
        err
    )]
    fn publish_sync(&self, message: &EventEnvelope<JsonValue>) -> Result<String, RedisStreamsError> {
        let topic = message
            .known_topic()
            .ok_or_else(|| RedisStreamsError::UnknownTopic(message.topic().to_string()))?;
        let payload = serde_json::to_string(message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;

        redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg("event_id")
            .arg(message.event_id().to_string())
            .arg("key")
            .arg(message.key())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))
    }

    fn acknowledge_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        stream: &str,
        message_ids: &[String],
    ) -> Result<(), RedisStreamsError> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group_name)
            .arg(message_ids)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    /// Copy an entry to the dead-letter queue. The caller acknowledges it.
    fn send_to_dlq_sync(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        message_id: &str,
        raw_payload: &str,
        retry_count: u64,
        reason: &str,
    ) -> Result<(), RedisStreamsError> {
        let _: String = redis::cmd("XADD")
            .arg(self.dlq_key())
            .arg("*")
            .arg("original_stream")
            .arg(stream)
            .arg("original_message_id")
            .arg(message_id)
            .arg("retry_count")
            .arg(retry_count.to_string())
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(raw_payload)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(
            stream = %stream,
            message_id = %message_id,
            retry_count = retry_count,
            reason = %reason,
            "Message sent to dead-letter queue"
        );

        Ok(())
    }

    /// Reclaim entries other consumers (or this one) left pending too long.
    ///
    /// Entries already delivered `max_retries` times are dead-lettered instead.
    fn claim_stale_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        in_flight: &InFlight,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let mut reclaimed = Vec::new();

        for topic in Topic::ALL {
            let stream = self.stream_key(topic);

            // XPENDING extended form: [id, consumer, idle_ms, delivery_count]
            let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
                .arg(&stream)
                .arg(group_name)
                .arg("IDLE")
                .arg(self.pending_timeout_ms)
                .arg("-")
                .arg("+")
                .arg(self.batch_size)
                .query(conn)
                .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

            let deliveries = reclaimable(pending, &stream, consumer_name, in_flight);
            if deliveries.is_empty() {
                continue;
            }
            let ids: Vec<String> = deliveries.keys().cloned().collect();

            let claimed: redis::Value = redis::cmd("XCLAIM")
                .arg(&stream)
                .arg(group_name)
                .arg(consumer_name)
                .arg(self.pending_timeout_ms)
                .arg(&ids[..])
                .query(conn)
                .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

            let redis::Value::Bulk(entries) = claimed else {
                continue;
            };

            let mut to_ack = Vec::new();
            for raw in entries {
                let entry = match RawEntry::parse(&stream, raw) {
                    Ok(Some(entry)) => entry,
                    // Trimmed from the stream while pending.
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(stream = %stream, error = %e, "Skipping unreadable claimed entry");
                        continue;
                    }
                };
                let retry_count = deliveries.get(&entry.message_id).copied().unwrap_or(0);
                if retry_count >= u64::from(self.max_retries) {
                    self.send_to_dlq_sync(
                        conn,
                        &stream,
                        &entry.message_id,
                        entry.payload.as_deref().unwrap_or_default(),
                        retry_count,
                        "max retries exceeded",
                    )?;
                    to_ack.push(entry.message_id);
                    continue;
                }
                let message_id = entry.message_id.clone();
                let payload = entry.payload.clone().unwrap_or_default();
                match entry.decode() {
                    Ok(decoded) => reclaimed.push(decoded),
                    Err(reason) => {
                        self.send_to_dlq_sync(conn, &stream, &message_id, &payload, retry_count, &reason.to_string())?;
                        to_ack.push(message_id);
                    }
                }
            }
            self.acknowledge_sync(conn, group_name, &stream, &to_ack)?;
        }

        Ok(reclaimed)
    }

    /// Read new entries across every topic stream (blocking up to `block_ms`).
    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let streams: Vec<String> = Topic::ALL.iter().map(|t| self.stream_key(*t)).collect();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group_name)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("STREAMS")
            .arg(&streams[..]);
        for _ in &streams {
            cmd.arg(">");
        }

        let reply: redis::Value = cmd
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        let mut messages = Vec::new();
        for raw in parse_read_reply(reply)? {
            let stream = raw.stream.clone();
            let message_id = raw.message_id.clone();
            let payload = raw.payload.clone().unwrap_or_default();
            match raw.decode() {
                Ok(entry) => messages.push(entry),
                Err(e) => {
                    self.send_to_dlq_sync(conn, &stream, &message_id, &payload, 1, &e.to_string())?;
                    self.acknowledge_sync(conn, group_name, &stream, &[message_id])?;
                }
            }
        }

        Ok(messages)
    }

    /// One poll cycle: flush acks, reclaim stale entries, read new ones.
    fn poll_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        acks: &mut UnboundedReceiver<DeliveryReceipt>,
        in_flight: &mut InFlight,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let mut by_stream: HashMap<String, Vec<String>> = HashMap::new();
        while let Ok(receipt) = acks.try_recv() {
            in_flight.remove(&(receipt.stream.clone(), receipt.message_id.clone()));
            by_stream.entry(receipt.stream).or_default().push(receipt.message_id);
        }
        for (stream, ids) in by_stream {
            self.acknowledge_sync(conn, group_name, &stream, &ids)?;
        }

        let mut entries = self.claim_stale_sync(conn, group_name, consumer_name, in_flight)?;
        entries.extend(self.read_new_sync(conn, group_name, consumer_name)?);
        Ok(entries)
    }

    /// Subscribe through a consumer group.
    ///
    /// A background thread polls Redis and forwards deliveries; it exits once
    /// the subscription is dropped. Acknowledged receipts are flushed at the
    /// start of each poll cycle.
    pub fn subscribe_with_group(
        &self,
        group_name: &str,
        consumer_name: &str,
    ) -> Subscription<EventEnvelope<JsonValue>> {
        if let Err(e) = self.ensure_consumer_group(group_name) {
            error!(group = %group_name, error = %e, "Failed to create consumer group");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let bus = self.clone();
        let group_name = group_name.to_string();
        let consumer_name = consumer_name.to_string();
        std::thread::spawn(move || bus.poll_loop(&group_name, &consumer_name, tx, ack_rx));

        Subscription::with_acks(rx, ack_tx)
    }

    fn poll_loop(
        &self,
        group_name: &str,
        consumer_name: &str,
        tx: UnboundedSender<Delivery<EventEnvelope<JsonValue>>>,
        mut acks: UnboundedReceiver<DeliveryReceipt>,
    ) {
        let mut conn: Option<redis::Connection> = None;
        let mut in_flight = InFlight::new();

        while !tx.is_closed() {
            if conn.is_none() {
                match self.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(error = %e, "Failed to connect to Redis");
                        std::thread::sleep(ERROR_BACKOFF);
                        continue;
                    }
                }
            }
            let Some(active) = conn.as_mut() else {
                continue;
            };

            match self.poll_sync(active, group_name, consumer_name, &mut acks, &mut in_flight) {
                Ok(entries) => {
                    for entry in entries {
                        debug!(stream = %entry.receipt.stream, message_id = %entry.receipt.message_id, "delivering");
                        in_flight.insert((entry.receipt.stream.clone(), entry.receipt.message_id.clone()));
                        if tx.send(Delivery::with_receipt(entry.envelope, entry.receipt)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from stream");
                    conn = None;
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }
}

/// Pending entries to reclaim, keyed by id with their delivery count.
///
/// This consumer's own entries still queued locally are left alone; after a
/// restart nothing is in flight, so its stale entries are reclaimed as usual.
fn reclaimable(
    pending: Vec<(String, String, u64, u64)>,
    stream: &str,
    consumer_name: &str,
    in_flight: &InFlight,
) -> HashMap<String, u64> {
    pending
        .into_iter()
        .filter(|(id, owner, _, _)| {
            !(owner == consumer_name && in_flight.contains(&(stream.to_string(), id.clone())))
        })
        .map(|(id, _, _, count)| (id, count))
        .collect()
}

/// Decoded entry ready for delivery.
#[derive(Debug, Clone)]
struct StreamEntry {
    envelope: EventEnvelope<JsonValue>,
    receipt: DeliveryReceipt,
}

/// Entry as read off a stream, before the payload is decoded.
#[derive(Debug, Clone, PartialEq)]
struct RawEntry {
    stream: String,
    message_id: String,
    payload: Option<String>,
}

impl RawEntry {
    /// Entry format: `[message_id, [field1, value1, ...]]`; `Nil` for entries
    /// deleted while pending.
    fn parse(stream: &str, value: redis::Value) -> Result<Option<Self>, RedisStreamsError> {
        let parts = match value {
            redis::Value::Nil => return Ok(None),
            redis::Value::Bulk(parts) => parts,
            _ => return Err(RedisStreamsError::Deserialization("Invalid entry format".to_string())),
        };

        let mut parts = parts.into_iter();
        let message_id = match parts.next() {
            Some(redis::Value::Data(id)) => String::from_utf8_lossy(&id).to_string(),
            _ => return Err(RedisStreamsError::Deserialization("Invalid message ID format".to_string())),
        };

        let fields = match parts.next() {
            Some(redis::Value::Bulk(fields)) => fields,
            Some(redis::Value::Nil) | None => return Ok(None),
            _ => return Err(RedisStreamsError::Deserialization("Invalid fields format".to_string())),
        };

        let mut payload = None;
        for chunk in fields.chunks(2) {
            if let [redis::Value::Data(k), redis::Value::Data(v)] = chunk {
                if k.as_slice() == b"payload" {
                    payload = Some(String::from_utf8_lossy(v).to_string());
                }
            }
        }

        Ok(Some(Self {
            stream: stream.to_string(),
            message_id,
            payload,
        }))
    }

    fn decode(self) -> Result<StreamEntry, RedisStreamsError> {
        let payload = self
            .payload
            .ok_or_else(|| RedisStreamsError::Deserialization("Missing payload field".to_string()))?;
        let envelope: EventEnvelope<JsonValue> = serde_json::from_str(&payload)
            .map_err(|e| RedisStreamsError::Deserialization(format!("Failed to deserialize envelope: {e}")))?;

        Ok(StreamEntry {
            envelope,
            receipt: DeliveryReceipt {
                stream: self.stream,
                message_id: self.message_id,
            },
        })
    }
}

/// `XREADGROUP` reply: `[[stream, [entry, ...]], ...]`, or `Nil` on timeout.
fn parse_read_reply(reply: redis::Value) -> Result<Vec<RawEntry>, RedisStreamsError> {
    let streams = match reply {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Bulk(streams) => streams,
        _ => return Err(RedisStreamsError::Deserialization("Invalid XREADGROUP reply".to_string())),
    };

    let mut out = Vec::new();
    for stream in streams {
        let redis::Value::Bulk(pair) = stream else {
            return Err(RedisStreamsError::Deserialization("Invalid stream block".to_string()));
        };
        let mut pair = pair.into_iter();
        let name = match pair.next() {
            Some(redis::Value::Data(name)) => String::from_utf8_lossy(&name).to_string(),
            _ => return Err(RedisStreamsError::Deserialization("Missing stream name".to_string())),
        };
        let Some(redis::Value::Bulk(entries)) = pair.next() else {
            continue;
        };
        for entry in entries {
            if let Some(raw) = RawEntry::parse(&name, entry)? {
                out.push(raw);
            }
        }
    }
    Ok(out)
}

impl EventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.publish_sync(&message).map(|_| ())
    }

    /// Subscribes through the `default` group with a fresh consumer name.
    /// Replica workers should use [`RedisStreamsEventBus::subscribe_with_group`].
    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.subscribe_with_group("default", &format!("consumer-{}", uuid::Uuid::now_v7()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn envelope_json() -> String {
        let envelope = EventEnvelope::new(
            scribe_core::EventId::new(),
            "user.deleted",
            "k",
            chrono::Utc::now(),
            serde_json::json!({ "id": uuid::Uuid::now_v7() }),
        );
        serde_json::to_string(&envelope).unwrap()
    }

    #[test]
    fn own_queued_entries_are_not_reclaimed() {
        let stream = "scribe:events:user.created";
        let pending = vec![
            ("1-0".to_string(), "me".to_string(), 90_000, 1),
            ("2-0".to_string(), "me".to_string(), 90_000, 2),
            ("3-0".to_string(), "crashed".to_string(), 90_000, 3),
        ];
        let mut in_flight = InFlight::new();
        in_flight.insert((stream.to_string(), "1-0".to_string()));
        in_flight.insert(("scribe:events:user.deleted".to_string(), "2-0".to_string()));

        let claim = reclaimable(pending, stream, "me", &in_flight);

        assert!(!claim.contains_key("1-0"));
        assert_eq!(claim.get("2-0"), Some(&2));
        assert_eq!(claim.get("3-0"), Some(&3));
    }

    #[test]
    fn stream_keys_are_per_topic() {
        let bus = RedisStreamsEventBus::new("redis://localhost:6379").unwrap();
        assert_eq!(bus.stream_key(Topic::UserCreated), "scribe:events:user.created");
        assert_eq!(bus.dlq_key(), "scribe:events:dlq");

        let bus = bus.with_stream_prefix("test");
        assert_eq!(bus.stream_key(Topic::UserDeleted), "test:user.deleted");
    }

    #[test]
    fn parses_xreadgroup_reply_into_receipted_entries() {
        let payload = envelope_json();
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("scribe:events:user.deleted"),
            Value::Bulk(vec![Value::Bulk(vec![
                data("1700000000000-0"),
                Value::Bulk(vec![data("key"), data("k"), data("payload"), data(&payload)]),
            ])]),
        ])]);

        let raws = parse_read_reply(reply).unwrap();
        assert_eq!(raws.len(), 1);

        let entry = raws.into_iter().next().unwrap().decode().unwrap();
        assert_eq!(entry.receipt.stream, "scribe:events:user.deleted");
        assert_eq!(entry.receipt.message_id, "1700000000000-0");
        assert_eq!(entry.envelope.topic(), "user.deleted");
    }

    #[test]
    fn nil_reply_means_no_entries() {
        assert!(parse_read_reply(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn entry_without_payload_fails_to_decode() {
        let raw = RawEntry::parse(
            "s",
            Value::Bulk(vec![data("1-0"), Value::Bulk(vec![data("key"), data("k")])]),
        )
        .unwrap()
        .unwrap();
        assert!(raw.decode().is_err());
    }

    #[test]
    fn deleted_pending_entry_is_skipped() {
        assert_eq!(RawEntry::parse("s", Value::Nil).unwrap(), None);
        let half = Value::Bulk(vec![data("1-0"), Value::Nil]);
        assert_eq!(RawEntry::parse("s", half).unwrap(), None);
    }
}
