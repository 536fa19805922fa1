use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::{Config, CurrencyRegistry};
use crate::store::PgEventStore;
use crate::stream::consumer::StreamConsumer;
use crate::stream::producer::StreamProducer;
use crate::stream::RedisStreamBus;
use crate::watcher::ChainEventWatcher;

/// Backoff before re-opening the log subscription after a fatal
/// subscription-transport error.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);
/// How long in-flight HTTP requests get to drain before exit proceeds.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wire the pipeline, run watcher/consumer/API as independent tasks, and
/// sequence shutdown once a stop signal arrives.
///
/// Shutdown order matters: the consumer finishes its in-flight batch and
/// stops pulling first, then the producer goes quiet, then the HTTP listener
/// drains within a bounded grace period.
pub async fn run(config: Config, pool: PgPool) -> eyre::Result<()> {
    let bus = Arc::new(RedisStreamBus::connect(&config.redis.url).await?);
    tracing::info!("Connected to Redis");

    let registry = CurrencyRegistry::from_config(&config.currencies);
    let store = Arc::new(PgEventStore::new(pool, registry));

    let producer = Arc::new(StreamProducer::new(
        bus.clone(),
        config.redis.stream.clone(),
    ));

    let shutdown = CancellationToken::new();

    let consumer = Arc::new(
        StreamConsumer::new(
            bus.clone(),
            store.clone(),
            &config.redis,
            shutdown.child_token(),
        )
        .await?,
    );

    let watcher = ChainEventWatcher::new(&config.chain, producer.clone())?;

    // Consumer read loop
    let consumer_task = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    // Watcher subscription loop. A subscription-transport failure is fatal to
    // the watcher itself; the restart policy lives here.
    let watcher_shutdown = shutdown.clone();
    let watcher_task = tokio::spawn(async move {
        loop {
            match watcher.subscribe(watcher_shutdown.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Log subscription failed, resubscribing");
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                        _ = watcher_shutdown.cancelled() => break,
                    }
                }
            }
        }
    });

    // Read API
    let server_task = if config.server.enabled {
        let store = (*store).clone();
        let host = config.server.host.clone();
        let port = config.server.port;
        let server_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(store, &host, port, server_shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        }))
    } else {
        None
    };

    tracing::info!("Bridge relay running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping...");

    // 1. Consumer first: finish the in-flight batch, stop pulling.
    consumer.stop();
    if let Err(e) = consumer_task.await {
        tracing::warn!(error = %e, "Consumer task ended abnormally");
    }

    // 2. Producer flips to no-op so late watcher publishes are dropped.
    producer.stop();

    // 3. Cancel the watcher subscription and drain the HTTP listener.
    shutdown.cancel();

    if let Some(task) = server_task {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "HTTP server did not drain within the grace period, exiting anyway"
            );
        }
    }

    if let Err(e) = watcher_task.await {
        tracing::warn!(error = %e, "Watcher task ended abnormally");
    }

    tracing::info!("Bridge relay stopped gracefully");
    Ok(())
}
