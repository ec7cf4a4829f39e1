//! Consume loop: pulls deliveries one at a time and reconnects on failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use parley_events::TaskBroker;

use super::executor::{TaskExecutor, WorkerStats};

/// Consume loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer tag reported to the broker; unique per process by default.
    pub consumer_tag: String,
    /// Pause before re-opening the consumer after the stream drops.
    pub reconnect_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_tag: format!("parley-worker-{}", uuid::Uuid::now_v7().simple()),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop taking new deliveries and wait for the in-flight one to settle.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct Worker {
    executor: Arc<TaskExecutor>,
    broker: Arc<dyn TaskBroker>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(executor: Arc<TaskExecutor>, broker: Arc<dyn TaskBroker>, config: WorkerConfig) -> Self {
        Self {
            executor,
            broker,
            config,
        }
    }

    /// Run on the current runtime until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkerHandle {
        let stats = self.executor.stats_handle();
        let token = shutdown.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        WorkerHandle {
            shutdown,
            join,
            stats,
        }
    }

    /// Consume until cancelled. A delivery that has started is always settled
    /// before the loop observes cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(consumer_tag = %self.config.consumer_tag, "worker started");

        while !shutdown.is_cancelled() {
            self.consume_until_dropped(&shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            warn!(
                delay_secs = self.config.reconnect_delay.as_secs_f64(),
                "consumer stopped; reconnecting"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        info!(stats = ?self.executor.stats(), "worker stopped");
    }

    async fn consume_until_dropped(&self, shutdown: &CancellationToken) {
        if let Err(e) = self.broker.ensure_topology().await {
            error!(error = %e, "failed to declare queue topology");
            return;
        }

        let mut consumer = match self.broker.consume(&self.config.consumer_tag).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to start consumer");
                return;
            }
        };

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return,
                next = consumer.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let outcome = self.executor.handle(delivery.as_ref()).await;
                    tracing::debug!(?outcome, "delivery settled");
                }
                Some(Err(e)) => {
                    error!(error = %e, "consumer stream failed");
                    return;
                }
                None => {
                    warn!("consumer stream closed by broker");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::{ConversationId, CorrelationId, TenantId};
    use parley_events::{InMemoryBroker, TaskEnvelope};

    use crate::external::{InMemoryReplySink, ProcessingError, ProcessingFunction};
    use crate::idempotency::{IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore};
    use crate::worker::executor::ExecutorConfig;

    struct Echo;

    #[async_trait]
    impl ProcessingFunction for Echo {
        async fn process(&self, task: &TaskEnvelope) -> Result<String, ProcessingError> {
            Ok(format!("echo: {}", task.content()))
        }
    }

    fn worker(broker: &InMemoryBroker, sink: Arc<InMemoryReplySink>) -> Worker {
        let broker: Arc<dyn TaskBroker> = Arc::new(broker.clone());
        let idempotency = IdempotencyService::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            IdempotencyConfig::default(),
        );
        let executor = TaskExecutor::new(
            Arc::new(Echo),
            sink,
            idempotency,
            broker.clone(),
            ExecutorConfig::default(),
        );
        Worker::new(
            Arc::new(executor),
            broker,
            WorkerConfig::default().with_reconnect_delay(Duration::from_millis(20)),
        )
    }

    fn task(id: &str) -> TaskEnvelope {
        TaskEnvelope::new(
            CorrelationId::new(id).unwrap(),
            TenantId::new(1),
            ConversationId::new(2),
            "ping",
        )
    }

    async fn wait_for(handle: &WorkerHandle, succeeded: u64) {
        for _ in 0..200 {
            if handle.stats().succeeded >= succeeded {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not reach {succeeded} successes: {:?}", handle.stats());
    }

    #[tokio::test]
    async fn processes_queued_tasks_until_shutdown() {
        let broker = InMemoryBroker::new();
        let sink = Arc::new(InMemoryReplySink::new());
        broker.publish(&task("1")).await.unwrap();
        broker.publish(&task("2")).await.unwrap();

        let handle = worker(&broker, sink.clone()).spawn(CancellationToken::new());
        wait_for(&handle, 2).await;

        // tasks arriving after start are picked up too
        broker.publish(&task("3")).await.unwrap();
        wait_for(&handle, 3).await;

        handle.shutdown().await;
        assert_eq!(sink.sent().len(), 3);
        assert_eq!(sink.sent()[0].text, "echo: ping");
        assert_eq!(broker.acked_count(), 3);
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn keeps_reconnecting_after_stream_closes() {
        let broker = InMemoryBroker::new();
        let handle = worker(&broker, Arc::new(InMemoryReplySink::new())).spawn(CancellationToken::new());

        broker.close();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!handle.is_finished());
        assert!(broker.topology_declarations() >= 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn external_token_stops_the_worker() {
        let broker = InMemoryBroker::new();
        let token = CancellationToken::new();
        let handle = worker(&broker, Arc::new(InMemoryReplySink::new())).spawn(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
