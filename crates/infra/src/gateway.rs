//! Ingestion gateway: filter, deduplicate and enqueue inbound events.
//!
//! Side effects happen in a fixed order: the processing lock is taken before
//! the envelope is published, and released again if publishing fails, so a
//! broker outage never leaves a lock behind that would block the platform's
//! next delivery of the same event.
//!
//! Topology declaration and publish share one enqueue deadline, so a stalled
//! broker costs a request at most that long however many broker calls it makes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use parley_core::{IngestionFilter, RawEvent};
use parley_events::{BrokerError, TaskBroker, TaskEnvelope};

use crate::idempotency::{IdempotencyService, LockAcquisition};

pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Accepted,
    Ignored,
    Duplicate,
    InProgress,
    Error,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
            Self::InProgress => "in_progress",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayResponse {
    pub status: GatewayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
}

impl GatewayResponse {
    fn new(status: GatewayStatus) -> Self {
        Self {
            status,
            reason: None,
            correlation_id: None,
            tenant_id: None,
            conversation_id: None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(GatewayStatus::Ignored)
        }
    }

    fn for_task(status: GatewayStatus, correlation_id: &str) -> Self {
        Self {
            correlation_id: Some(correlation_id.to_string()),
            ..Self::new(status)
        }
    }
}

/// Per-dependency readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub broker: bool,
    pub store: bool,
}

impl Readiness {
    pub fn ready(&self) -> bool {
        self.broker && self.store
    }
}

#[derive(Clone)]
pub struct Gateway {
    filter: IngestionFilter,
    idempotency: IdempotencyService,
    broker: Arc<dyn TaskBroker>,
    enqueue_timeout: Duration,
}

impl Gateway {
    pub fn new(
        filter: IngestionFilter,
        idempotency: IdempotencyService,
        broker: Arc<dyn TaskBroker>,
    ) -> Self {
        Self {
            filter,
            idempotency,
            broker,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn idempotency(&self) -> &IdempotencyService {
        &self.idempotency
    }

    #[instrument(
        skip_all,
        fields(event_id = tracing::field::Empty, status = tracing::field::Empty)
    )]
    pub async fn handle(&self, event: &RawEvent) -> GatewayResponse {
        let response = self.handle_inner(event).await;
        let span = tracing::Span::current();
        if let Some(id) = &response.correlation_id {
            span.record("event_id", id.as_str());
        }
        span.record("status", response.status.as_str());
        response
    }

    async fn handle_inner(&self, event: &RawEvent) -> GatewayResponse {
        let correlation_id = event.correlation_id();

        let decision = self.filter.decide(event);
        if !decision.accepted() {
            let reason = decision.reason();
            info!(reason = %reason, "event ignored");
            return GatewayResponse::ignored(reason);
        }

        let Some(correlation_id) = correlation_id else {
            warn!("accepted event carries no message id");
            return GatewayResponse::ignored("missing message id");
        };

        if self.idempotency.is_processed(&correlation_id).await {
            info!(correlation_id = %correlation_id, "already processed");
            return GatewayResponse::for_task(GatewayStatus::Duplicate, correlation_id.as_str());
        }

        let lock = self.idempotency.try_lock(&correlation_id).await;
        if lock == LockAcquisition::AlreadyHeld {
            info!(correlation_id = %correlation_id, "already in progress");
            return GatewayResponse::for_task(GatewayStatus::InProgress, correlation_id.as_str());
        }

        let envelope = TaskEnvelope::from_raw(event, correlation_id.clone());

        if let Err(e) = self.enqueue(&envelope).await {
            warn!(correlation_id = %correlation_id, error = %e, "enqueue failed; releasing lock");
            if let Err(release) = self.idempotency.release_lock(&correlation_id).await {
                warn!(correlation_id = %correlation_id, error = %release, "lock release failed");
            }
            return GatewayResponse {
                reason: Some("failed to enqueue task".into()),
                ..GatewayResponse::for_task(GatewayStatus::Error, correlation_id.as_str())
            };
        }

        info!(
            correlation_id = %correlation_id,
            tenant_id = %envelope.tenant_id(),
            conversation_id = %envelope.conversation_id(),
            lock = ?lock,
            "task enqueued"
        );

        GatewayResponse {
            tenant_id: Some(envelope.tenant_id().get()),
            conversation_id: Some(envelope.conversation_id().get()),
            ..GatewayResponse::for_task(GatewayStatus::Accepted, correlation_id.as_str())
        }
    }

    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let enqueue = async {
            self.broker.ensure_topology().await?;
            self.broker.publish(envelope).await
        };
        tokio::time::timeout(self.enqueue_timeout, enqueue)
            .await
            .map_err(|_| BrokerError::Timeout(self.enqueue_timeout))?
    }

    pub async fn readiness(&self) -> Readiness {
        let (broker, store) = tokio::join!(self.broker.is_healthy(), self.idempotency.is_healthy());
        Readiness { broker, store }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{IdempotencyConfig, InMemoryIdempotencyStore};
    use parley_events::InMemoryBroker;
    use serde_json::{json, Value};

    struct Harness {
        gateway: Gateway,
        broker: InMemoryBroker,
        store: InMemoryIdempotencyStore,
    }

    fn harness() -> Harness {
        let broker = InMemoryBroker::new();
        let store = InMemoryIdempotencyStore::new();
        let idempotency = IdempotencyService::new(Arc::new(store.clone()), IdempotencyConfig::default());
        let gateway = Gateway::new(IngestionFilter::default(), idempotency, Arc::new(broker.clone()));
        Harness {
            gateway,
            broker,
            store,
        }
    }

    fn body(id: Value) -> RawEvent {
        RawEvent::from_value(json!({
            "event": "message_created",
            "id": id,
            "message_type": 0,
            "private": false,
            "content": "hi",
            "agent_bot": { "agent_id": 1 },
            "account": { "id": 4 },
            "conversation": { "id": 8 }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_and_enqueues_fresh_event() {
        let h = harness();
        let resp = h.gateway.handle(&body(json!("42"))).await;

        assert_eq!(resp.status, GatewayStatus::Accepted);
        assert_eq!(resp.correlation_id.as_deref(), Some("42"));
        assert_eq!(resp.tenant_id, Some(4));
        assert_eq!(resp.conversation_id, Some(8));

        let pending = h.broker.pending();
        assert_eq!(pending.len(), 1);
        let env = pending[0].envelope().unwrap();
        assert_eq!(env.correlation_id().as_str(), "42");
        assert_eq!(env.attempt_count(), 0);
        assert_eq!(pending[0].correlation_id.as_deref(), Some("42"));
        assert_eq!(h.store.peek("parley:processed:lock:42").as_deref(), Some("processing"));
        assert!(h.broker.topology_declarations() >= 1);
    }

    #[tokio::test]
    async fn replay_before_completion_is_in_progress() {
        let h = harness();
        h.gateway.handle(&body(json!(42))).await;
        let again = h.gateway.handle(&body(json!(42))).await;

        assert_eq!(again.status, GatewayStatus::InProgress);
        assert_eq!(h.broker.published_count(), 1);
    }

    #[tokio::test]
    async fn replay_after_completion_is_duplicate() {
        let h = harness();
        h.gateway.handle(&body(json!("42"))).await;
        let id = parley_core::CorrelationId::new("42").unwrap();
        h.gateway.idempotency().mark_processed(&id, "replied").await.unwrap();

        let again = h.gateway.handle(&body(json!("42"))).await;
        assert_eq!(again.status, GatewayStatus::Duplicate);
        assert_eq!(h.broker.published_count(), 1);
    }

    #[tokio::test]
    async fn filtered_events_have_no_side_effects() {
        let h = harness();
        let mut ev = body(json!("1"));
        ev.private = Some(true);

        let resp = h.gateway.handle(&ev).await;
        assert_eq!(resp.status, GatewayStatus::Ignored);
        assert_eq!(resp.reason.as_deref(), Some("private message"));
        assert!(h.store.keys().is_empty());
        assert_eq!(h.broker.published_count(), 0);
    }

    #[tokio::test]
    async fn accepted_event_without_id_is_ignored() {
        let h = harness();
        let resp = h.gateway.handle(&body(Value::Null)).await;
        assert_eq!(resp.status, GatewayStatus::Ignored);
        assert_eq!(resp.reason.as_deref(), Some("missing message id"));
        assert!(h.store.keys().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_releases_lock() {
        let h = harness();
        h.broker.set_fail_publish(true);

        let resp = h.gateway.handle(&body(json!("42"))).await;
        assert_eq!(resp.status, GatewayStatus::Error);
        assert!(h.store.keys().is_empty());

        h.broker.set_fail_publish(false);
        let retry = h.gateway.handle(&body(json!("42"))).await;
        assert_eq!(retry.status, GatewayStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_broker_times_out_and_releases_lock() {
        let h = harness();
        h.broker.set_publish_latency(Duration::from_secs(60));
        let gateway = Arc::new(h.gateway);

        let started = tokio::time::Instant::now();
        let mut handles = Vec::new();
        for id in 1..=8 {
            let g = gateway.clone();
            handles.push(tokio::spawn(async move {
                let resp = g.handle(&body(json!(id))).await;
                (resp, started.elapsed())
            }));
        }

        for handle in handles {
            let (resp, elapsed) = handle.await.unwrap();
            assert_eq!(resp.status, GatewayStatus::Error);
            assert_eq!(resp.reason.as_deref(), Some("failed to enqueue task"));
            assert!(elapsed >= DEFAULT_ENQUEUE_TIMEOUT);
            assert!(elapsed < DEFAULT_ENQUEUE_TIMEOUT * 2, "took {elapsed:?}");
        }
        assert!(h.store.keys().is_empty());
        assert_eq!(h.broker.published_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_still_accepts() {
        let h = harness();
        h.store.set_failing(true);

        let resp = h.gateway.handle(&body(json!("42"))).await;
        assert_eq!(resp.status, GatewayStatus::Accepted);
        assert_eq!(h.broker.published_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_deliveries_enqueue_once() {
        let h = harness();
        let gateway = Arc::new(h.gateway);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let g = gateway.clone();
            handles.push(tokio::spawn(async move { g.handle(&body(json!("77"))).await.status }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                GatewayStatus::Accepted => accepted += 1,
                GatewayStatus::InProgress | GatewayStatus::Duplicate => {}
                other => panic!("unexpected status {other:?}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(h.broker.published_count(), 1);
    }

    #[tokio::test]
    async fn readiness_reports_each_dependency() {
        let h = harness();
        assert!(h.gateway.readiness().await.ready());

        h.store.set_failing(true);
        let r = h.gateway.readiness().await;
        assert_eq!(r, Readiness { broker: true, store: false });
        assert!(!r.ready());
    }

    #[test]
    fn response_omits_absent_fields() {
        let v = serde_json::to_value(GatewayResponse::ignored("private message")).unwrap();
        assert_eq!(v, json!({ "status": "ignored", "reason": "private message" }));
    }
}
