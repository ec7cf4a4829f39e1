use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use parley_infra::broker::AmqpBroker;
use parley_infra::external::{ChatCompletionProcessor, ChatwootReplySink};
use parley_infra::idempotency::RedisIdempotencyStore;
use parley_infra::worker::ExecutorConfig;
use parley_infra::{IdempotencyConfig, IdempotencyService, Settings, TaskExecutor, Worker, WorkerConfig};

const SERVICE_NAME: &str = "parley-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment alone is enough.
    let _ = dotenvy::dotenv();
    parley_observability::init(SERVICE_NAME);

    let settings = Settings::from_env().context("invalid configuration")?;

    let broker = Arc::new(AmqpBroker::new(
        settings.broker.amqp_url(),
        settings.broker.topology.clone(),
        settings.broker.timeout,
    ));
    let store = RedisIdempotencyStore::new(settings.store.redis_url())
        .context("invalid idempotency store settings")?;
    let idempotency = IdempotencyService::new(Arc::new(store), IdempotencyConfig::from(&settings.store));

    let processor = ChatCompletionProcessor::new(&settings.llm, settings.processing_timeout)
        .context("failed to build completion client")?;
    let reply_sink = ChatwootReplySink::new(&settings.chatwoot.base_url, settings.chatwoot.api_token.clone())
        .context("failed to build reply client")?;

    let executor = TaskExecutor::new(
        Arc::new(processor),
        Arc::new(reply_sink),
        idempotency,
        broker.clone(),
        ExecutorConfig {
            retry: settings.retry,
            processing_timeout: Some(settings.processing_timeout),
        },
    );

    let worker = Worker::new(
        Arc::new(executor),
        broker,
        WorkerConfig::default().with_reconnect_delay(settings.broker.reconnect_delay),
    );

    info!(
        queue = %settings.broker.topology.work_queue,
        max_attempts = settings.retry.max_attempts,
        "worker starting"
    );

    let handle = worker.spawn(CancellationToken::new());
    shutdown_signal().await;

    info!("draining in-flight task");
    handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
