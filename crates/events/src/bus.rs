//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes lifecycle events from the service that owns user data
//! to every service holding a replica.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a message may be delivered more than once (redelivery
//!   after a crash, a missed ack, a network retry). Consumers must be idempotent.
//! - **No cross-topic ordering**: each topic is its own partition. Within one
//!   topic and one subscription, messages arrive in publish order.
//! - **Explicit acks**: a durable transport only forgets a message after the
//!   consumer acknowledges its [`DeliveryReceipt`]. Transports without
//!   persistence hand out deliveries without receipts.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Transport-specific handle identifying one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub stream: String,
    pub message_id: String,
}

/// A message as handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    message: M,
    receipt: Option<DeliveryReceipt>,
}

impl<M> Delivery<M> {
    /// A delivery from a transport that does not track acknowledgements.
    pub fn unacked(message: M) -> Self {
        Self { message, receipt: None }
    }

    pub fn with_receipt(message: M, receipt: DeliveryReceipt) -> Self {
        Self {
            message,
            receipt: Some(receipt),
        }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn receipt(&self) -> Option<&DeliveryReceipt> {
        self.receipt.as_ref()
    }

    pub fn into_parts(self) -> (M, Option<DeliveryReceipt>) {
        (self.message, self.receipt)
    }
}

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = bus.subscribe();
///
/// while let Some(delivery) = subscription.recv().await {
///     handle(delivery.message()).await;
///     subscription.ack(&delivery);
/// }
/// ```
///
/// Subscriptions are designed for a single consuming task. `recv` returns
/// `None` once the bus side has gone away.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<Delivery<M>>,
    acks: Option<UnboundedSender<DeliveryReceipt>>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<Delivery<M>>) -> Self {
        Self { receiver, acks: None }
    }

    /// A subscription whose acknowledgements are forwarded to the transport.
    pub fn with_acks(
        receiver: UnboundedReceiver<Delivery<M>>,
        acks: UnboundedSender<DeliveryReceipt>,
    ) -> Self {
        Self {
            receiver,
            acks: Some(acks),
        }
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery<M>> {
        self.receiver.recv().await
    }

    /// Try to receive a delivery without waiting.
    pub fn try_recv(&mut self) -> Result<Delivery<M>, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Acknowledge a delivery so the transport stops redelivering it.
    ///
    /// No-op for deliveries without a receipt.
    pub fn ack(&self, delivery: &Delivery<M>) {
        if let (Some(acks), Some(receipt)) = (&self.acks, delivery.receipt()) {
            if acks.send(receipt.clone()).is_err() {
                tracing::warn!(
                    stream = %receipt.stream,
                    message_id = %receipt.message_id,
                    "ack dropped: transport is gone"
                );
            }
        }
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// users write path → publish(user.*) → Event Bus → Subscription → Replica Synchronizer
/// ```
///
/// `publish()` can fail (e.g. broker unreachable). Failures are surfaced to the
/// caller, which decides whether the write path cares (lifecycle publication is
/// fire-and-forget).
///
/// The trait requires `Send + Sync`; multiple tasks can publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
