//! In-memory task broker for tests/dev.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::{BrokerError, Delivery, TaskBroker, TaskConsumer};
use crate::envelope::{EnvelopeError, TaskEnvelope};

/// A message as it sits in one of the queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
}

impl QueuedMessage {
    pub fn envelope(&self) -> Result<TaskEnvelope, EnvelopeError> {
        TaskEnvelope::from_slice(&self.body)
    }
}

#[derive(Debug, Default)]
struct Queues {
    ready: VecDeque<QueuedMessage>,
    dead_letters: Vec<QueuedMessage>,
    published: usize,
    acked: usize,
    in_flight: usize,
    topology_declarations: usize,
}

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<Queues>,
    notify: Notify,
    fail_publish: AtomicBool,
    unhealthy: AtomicBool,
    closed: AtomicBool,
    consumers: AtomicUsize,
    publish_latency: Mutex<Option<Duration>>,
}

/// In-memory work queue with a dead-letter queue.
///
/// - No IO
/// - Rejected deliveries land in the dead-letter queue, mirroring the durable topology
/// - Publishing can be made to fail or stall, to exercise the gateway's error path
/// - Each consumer holds at most one unsettled delivery; one dropped without
///   being settled goes back to the front of the queue marked as redelivered
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Delay every publish by `latency`.
    pub fn set_publish_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.inner.publish_latency.lock() {
            *l = Some(latency);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Enqueue an arbitrary body, bypassing envelope serialization.
    pub fn publish_raw(&self, body: impl Into<Vec<u8>>, correlation_id: Option<&str>) {
        self.push(QueuedMessage {
            body: body.into(),
            correlation_id: correlation_id.map(str::to_string),
            redelivered: false,
        });
    }

    /// End all consumer streams once the ready queue drains.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for _ in 0..self.inner.consumers.load(Ordering::SeqCst).max(1) {
            self.inner.notify.notify_one();
        }
    }

    pub fn pending(&self) -> Vec<QueuedMessage> {
        self.with_queues(|q| q.ready.iter().cloned().collect())
    }

    pub fn dead_letters(&self) -> Vec<QueuedMessage> {
        self.with_queues(|q| q.dead_letters.clone())
    }

    pub fn published_count(&self) -> usize {
        self.with_queues(|q| q.published)
    }

    pub fn acked_count(&self) -> usize {
        self.with_queues(|q| q.acked)
    }

    pub fn in_flight(&self) -> usize {
        self.with_queues(|q| q.in_flight)
    }

    pub fn topology_declarations(&self) -> usize {
        self.with_queues(|q| q.topology_declarations)
    }

    /// Pop the next ready message as a delivery, without waiting.
    ///
    /// Not subject to any consumer's prefetch limit.
    pub fn try_next(&self) -> Option<Box<dyn Delivery>> {
        self.take_ready().map(|m| self.delivery(m, None))
    }

    fn with_queues<T>(&self, f: impl FnOnce(&mut Queues) -> T) -> T {
        // A poisoned lock only means a test panicked mid-update; the counters
        // are still usable.
        let mut guard = match self.inner.queues.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn push(&self, message: QueuedMessage) {
        self.with_queues(|q| {
            q.published += 1;
            q.ready.push_back(message);
        });
        self.inner.notify.notify_one();
    }

    fn take_ready(&self) -> Option<QueuedMessage> {
        self.with_queues(|q| {
            let m = q.ready.pop_front()?;
            q.in_flight += 1;
            Some(m)
        })
    }

    fn delivery(&self, message: QueuedMessage, prefetch: Option<Arc<Prefetch>>) -> Box<dyn Delivery> {
        Box::new(InMemoryDelivery {
            broker: self.clone(),
            message,
            settled: AtomicBool::new(false),
            prefetch,
        })
    }

    fn settle(&self, delivery: &InMemoryDelivery, outcome: Settle) -> Result<(), BrokerError> {
        if delivery.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Settle("delivery already settled".into()));
        }

        self.with_queues(|q| {
            q.in_flight = q.in_flight.saturating_sub(1);
            match outcome {
                Settle::Ack => q.acked += 1,
                Settle::Reject => q.dead_letters.push(delivery.message.clone()),
            }
        });
        delivery.free_prefetch();
        Ok(())
    }

    /// Return an unsettled message to the head of the queue.
    fn redeliver(&self, message: QueuedMessage) {
        self.with_queues(|q| {
            q.in_flight = q.in_flight.saturating_sub(1);
            q.ready.push_front(QueuedMessage {
                redelivered: true,
                ..message
            });
        });
        self.inner.notify.notify_one();
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    Reject,
}

/// Prefetch window of one: set while the consumer's last delivery is unsettled.
#[derive(Debug, Default)]
struct Prefetch {
    busy: AtomicBool,
    settled: Notify,
}

impl Prefetch {
    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.settled.notify_one();
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        self.with_queues(|q| q.topology_declarations += 1);
        Ok(())
    }

    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let latency = self.inner.publish_latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("in-memory broker unavailable".into()));
        }

        let body = envelope.to_vec()?;
        self.push(QueuedMessage {
            body,
            correlation_id: Some(envelope.correlation_id().to_string()),
            redelivered: false,
        });
        Ok(())
    }

    async fn consume(&self, _consumer_tag: &str) -> Result<Box<dyn TaskConsumer>, BrokerError> {
        self.inner.consumers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConsumer {
            broker: self.clone(),
            prefetch: Arc::new(Prefetch::default()),
        }))
    }

    async fn is_healthy(&self) -> bool {
        !self.inner.unhealthy.load(Ordering::SeqCst)
    }
}

struct InMemoryConsumer {
    broker: InMemoryBroker,
    prefetch: Arc<Prefetch>,
}

#[async_trait]
impl TaskConsumer for InMemoryConsumer {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>> {
        while self.prefetch.busy.load(Ordering::SeqCst) {
            self.prefetch.settled.notified().await;
        }

        loop {
            if let Some(m) = self.broker.take_ready() {
                self.prefetch.busy.store(true, Ordering::SeqCst);
                let prefetch = Some(self.prefetch.clone());
                return Some(Ok(self.broker.delivery(m, prefetch)));
            }
            if self.broker.inner.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.broker.inner.notify.notified().await;
        }
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.broker.inner.consumers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InMemoryDelivery {
    broker: InMemoryBroker,
    message: QueuedMessage,
    settled: AtomicBool,
    prefetch: Option<Arc<Prefetch>>,
}

impl InMemoryDelivery {
    fn free_prefetch(&self) {
        if let Some(prefetch) = &self.prefetch {
            prefetch.release();
        }
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.broker.redeliver(self.message.clone());
            self.free_prefetch();
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn correlation_id(&self) -> Option<&str> {
        self.message.correlation_id.as_deref()
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.settle(self, Settle::Ack)
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.broker.settle(self, Settle::Reject)
    }
}
