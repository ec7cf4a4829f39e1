//! Task broker abstraction (mechanics only).
//!
//! A broker moves serialized [`TaskEnvelope`]s from the gateway to the worker
//! fleet through one durable work queue, with a dead-letter queue for tasks that
//! can never succeed.
//!
//! ## Delivery guarantees
//!
//! Delivery is **at-least-once**: a message that is not acknowledged before its
//! consumer disappears is handed out again. Exactly-one *successful* handling is
//! layered on top by the idempotency store, not by the broker.
//!
//! ## Settling a delivery
//!
//! Every [`Delivery`] must be settled exactly once, with [`Delivery::ack`]
//! (removes it from the queue) or [`Delivery::reject`] (routes it to the
//! dead-letter queue). A delivery that is never settled comes back with
//! [`Delivery::redelivered`] set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{EnvelopeError, TaskEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish was not confirmed by the broker")]
    Nacked,

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("settling delivery failed: {0}")]
    Settle(String),

    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// One message handed to a consumer.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];

    /// Correlation id carried as transport metadata, if any.
    fn correlation_id(&self) -> Option<&str>;

    /// Whether the broker has handed this message out before.
    fn redelivered(&self) -> bool {
        false
    }

    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement without requeue (dead-letter).
    async fn reject(&self) -> Result<(), BrokerError>;
}

/// A stream of deliveries. Yields `None` once the underlying channel closes.
#[async_trait]
pub trait TaskConsumer: Send {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>>;
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Declare work queue, dead-letter exchange and dead-letter queue.
    ///
    /// Idempotent; safe to call on every start and before every publish.
    async fn ensure_topology(&self) -> Result<(), BrokerError>;

    /// Publish a persistent message to the work queue, tagged with the
    /// envelope's correlation id.
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    /// Start consuming the work queue, one unacknowledged message at a time.
    async fn consume(&self, consumer_tag: &str) -> Result<Box<dyn TaskConsumer>, BrokerError>;

    async fn is_healthy(&self) -> bool;
}

#[async_trait]
impl<B> TaskBroker for Arc<B>
where
    B: TaskBroker + ?Sized,
{
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        (**self).ensure_topology().await
    }

    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        (**self).publish(envelope).await
    }

    async fn consume(&self, consumer_tag: &str) -> Result<Box<dyn TaskConsumer>, BrokerError> {
        (**self).consume(consumer_tag).await
    }

    async fn is_healthy(&self) -> bool {
        (**self).is_healthy().await
    }
}
