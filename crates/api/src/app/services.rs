use std::sync::Arc;

use anyhow::Context;

use parley_core::IngestionFilter;
use parley_infra::broker::AmqpBroker;
use parley_infra::idempotency::RedisIdempotencyStore;
use parley_infra::{Gateway, IdempotencyConfig, IdempotencyService, Settings};

pub const SERVICE_NAME: &str = "parley-gateway";

/// Everything request handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub gateway: Gateway,
    pub service_name: &'static str,
    pub version: &'static str,
}

impl AppServices {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            service_name: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Wire the gateway against Redis and RabbitMQ. Connections are opened lazily,
/// so this succeeds even when both are down; `/ready` reports their state.
pub fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store = RedisIdempotencyStore::new(settings.store.redis_url())
        .context("invalid idempotency store settings")?;
    let idempotency = IdempotencyService::new(Arc::new(store), IdempotencyConfig::from(&settings.store));

    let broker = AmqpBroker::new(
        settings.broker.amqp_url(),
        settings.broker.topology.clone(),
        settings.broker.timeout,
    );

    let filter = IngestionFilter::default().with_bot_sender_types(settings.bot_sender_types.clone());

    let gateway = Gateway::new(filter, idempotency, Arc::new(broker))
        .with_enqueue_timeout(settings.broker.timeout);

    Ok(AppServices::new(gateway))
}
