//! Per-delivery task handling: process, reply, then ack / retry / dead-letter.
//!
//! Retries are implemented as "republish with `attempt_count + 1`, then ack the
//! original" rather than a broker-level requeue, so the worker can hold the
//! task back for the backoff delay and carry the attempt count forward. If the
//! republish itself fails the original is dead-lettered, so a broker that keeps
//! refusing publishes cannot hold a task in an endless redelivery loop.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use parley_core::{CorrelationId, RetryDecision, RetryPolicy};
use parley_events::{Delivery, ResponseMode, TaskBroker, TaskEnvelope};

use crate::external::{ProcessingError, ProcessingFunction, ReplyError, ReplySink};
use crate::idempotency::IdempotencyService;

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed, reply handled, completion marker written, acked.
    Completed,
    /// Republished with the new attempt count and the original acked.
    Retried { attempt: u32 },
    /// Attempts exhausted, or the retry could not be republished; nacked
    /// into the dead-letter queue.
    DeadLettered { attempts: u32 },
    /// Body was not a valid envelope; nacked into the dead-letter queue.
    Malformed,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Reply(#[from] ReplyError),
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    /// Upper bound on one processing call; `None` waits indefinitely.
    pub processing_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            processing_timeout: Some(Duration::from_secs(120)),
        }
    }
}

pub struct TaskExecutor {
    processor: Arc<dyn ProcessingFunction>,
    reply_sink: Arc<dyn ReplySink>,
    idempotency: IdempotencyService,
    broker: Arc<dyn TaskBroker>,
    config: ExecutorConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl TaskExecutor {
    pub fn new(
        processor: Arc<dyn ProcessingFunction>,
        reply_sink: Arc<dyn ReplySink>,
        idempotency: IdempotencyService,
        broker: Arc<dyn TaskBroker>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            processor,
            reply_sink,
            idempotency,
            broker,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn stats_handle(&self) -> Arc<Mutex<WorkerStats>> {
        self.stats.clone()
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }

    /// Handle one delivery and settle it exactly once.
    #[instrument(skip_all, fields(correlation_id = delivery.correlation_id().unwrap_or("-")))]
    pub async fn handle(&self, delivery: &dyn Delivery) -> DeliveryOutcome {
        self.bump(|s| s.processed += 1);
        if delivery.redelivered() {
            info!("redelivered after an unsettled attempt");
        }

        let mut envelope = match TaskEnvelope::from_slice(delivery.body()) {
            Ok(env) => env,
            Err(e) => return self.dead_letter_malformed(delivery, e.to_string()).await,
        };

        let result = self.attempt(&envelope).await;

        match result {
            Ok(tag) => {
                self.complete(delivery, &envelope, tag).await;
                DeliveryOutcome::Completed
            }
            Err(e) => self.fail(delivery, &mut envelope, e).await,
        }
    }

    async fn attempt(&self, envelope: &TaskEnvelope) -> Result<&'static str, AttemptError> {
        let reply = self.run_processor(envelope).await?;

        let mode = envelope.response_mode();
        match mode.delivery() {
            Some(private) => {
                self.reply_sink
                    .deliver(envelope.tenant_id(), envelope.conversation_id(), &reply, private)
                    .await?;
            }
            None => {
                info!(mode = ?mode, "reply generated but not posted");
            }
        }

        Ok(result_tag(mode))
    }

    /// Call the processing function, mapping timeouts and panics to errors.
    async fn run_processor(&self, envelope: &TaskEnvelope) -> Result<String, ProcessingError> {
        let call = AssertUnwindSafe(self.processor.process(envelope)).catch_unwind();

        let outcome = match self.config.processing_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ProcessingError::Timeout(limit))?,
            None => call.await,
        };

        outcome.unwrap_or_else(|panic| Err(ProcessingError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn complete(&self, delivery: &dyn Delivery, envelope: &TaskEnvelope, tag: &str) {
        let id = envelope.correlation_id();
        if let Err(e) = self.idempotency.mark_processed(id, tag).await {
            warn!(correlation_id = %id, error = %e, "failed to write completion marker");
        }
        if let Err(e) = delivery.ack().await {
            warn!(correlation_id = %id, error = %e, "ack failed");
        }
        self.bump(|s| s.succeeded += 1);
        info!(correlation_id = %id, attempts = envelope.attempt_count() + 1, result = tag, "task completed");
    }

    async fn fail(
        &self,
        delivery: &dyn Delivery,
        envelope: &mut TaskEnvelope,
        cause: AttemptError,
    ) -> DeliveryOutcome {
        let id = envelope.correlation_id().clone();
        let attempt = envelope.attempt_count().saturating_add(1);

        match self.config.retry.decide(attempt) {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    correlation_id = %id,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %cause,
                    "attempt failed; retrying after backoff"
                );
                tokio::time::sleep(delay).await;

                envelope.record_failed_attempt();
                match self.broker.publish(envelope).await {
                    Ok(()) => {
                        if let Err(e) = delivery.ack().await {
                            warn!(correlation_id = %id, error = %e, "ack after republish failed");
                        }
                        self.bump(|s| s.retried += 1);
                        DeliveryOutcome::Retried { attempt }
                    }
                    Err(e) => {
                        error!(correlation_id = %id, attempt, error = %e, "republish failed; dead-lettering");
                        self.give_up(delivery, &id).await;
                        DeliveryOutcome::DeadLettered { attempts: attempt }
                    }
                }
            }
            RetryDecision::GiveUp { attempts } => {
                error!(correlation_id = %id, attempts, error = %cause, "attempts exhausted; dead-lettering");
                self.give_up(delivery, &id).await;
                DeliveryOutcome::DeadLettered { attempts }
            }
        }
    }

    async fn give_up(&self, delivery: &dyn Delivery, id: &CorrelationId) {
        if let Err(e) = delivery.reject().await {
            warn!(correlation_id = %id, error = %e, "reject failed");
        }
        self.release(id).await;
        self.bump(|s| s.dead_lettered += 1);
    }

    async fn dead_letter_malformed(&self, delivery: &dyn Delivery, reason: String) -> DeliveryOutcome {
        error!(error = %reason, "undecodable task; dead-lettering");
        if let Err(e) = delivery.reject().await {
            warn!(error = %e, "reject failed");
        }
        if let Some(id) = delivery.correlation_id().and_then(|s| CorrelationId::new(s).ok()) {
            self.release(&id).await;
        }
        self.bump(|s| s.malformed += 1);
        DeliveryOutcome::Malformed
    }

    async fn release(&self, id: &CorrelationId) {
        if let Err(e) = self.idempotency.release_lock(id).await {
            warn!(correlation_id = %id, error = %e, "lock release failed");
        }
    }
}

fn result_tag(mode: ResponseMode) -> &'static str {
    match mode {
        ResponseMode::AutoRespond => "replied",
        ResponseMode::AssistAgent => "private_note",
        ResponseMode::ManualTrigger | ResponseMode::Unknown => "generated",
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
