//! Consume telemetry notifications and keep each card's realtime view in Redis.
use std::sync::Arc;

use card_common::cache::{CardCache, RedisClient};
use card_common::database::get_pool_with_settings;
use card_common::health::HealthRegistry;
use card_common::metrics::{serve, setup_metrics_routes, status_router};
use card_common::store::{PgTelemetryStore, PgTopologyStore};
use card_consumer::config::Config;
use card_consumer::consumer::CardConsumer;
use card_consumer::stats::{report_stats, AtomicStats, StatsCollector};
use card_consumer::stream::RedisEventStream;
use card_engine::fusion::FusionEngine;
use envconfig::Envconfig;
use eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting card consumer...");

    let config = Config::init_from_env()?;
    let consumer_name = config.consumer_name();
    info!(
        stream = config.stream_key.as_str(),
        group = config.consumer_group.as_str(),
        consumer = consumer_name,
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    let pool =
        get_pool_with_settings(&config.database.database_url, config.database.pool_settings())
            .await?;
    let topology = Arc::new(PgTopologyStore::new(pool.clone()));
    let telemetry = Arc::new(PgTelemetryStore::new(pool));

    let cache_client = RedisClient::with_timeouts(
        config.cache.redis_url.clone(),
        Some(config.cache.redis_response_timeout.0),
        Some(config.cache.redis_connection_timeout.0),
    )
    .await?;
    let cache = CardCache::new(
        Arc::new(cache_client),
        config.cache.realtime_ttl.0,
        config.cache.view_ttl.0,
    );

    // Blocking reads hold the connection for up to the block timeout, so streams get their
    // own connection without a response timeout.
    let stream_client = RedisClient::with_timeouts(
        config.cache.redis_url.clone(),
        None,
        Some(config.cache.redis_connection_timeout.0),
    )
    .await?;
    let stream = Arc::new(RedisEventStream::new(
        stream_client.connection(),
        config.stream_key.as_str().to_owned(),
        config.consumer_group.as_str().to_owned(),
        consumer_name,
    ));

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness =
        liveness.register("consumer".to_string(), config.liveness_deadline());

    let stats: Arc<dyn StatsCollector> = Arc::new(AtomicStats::new());
    let consumer = CardConsumer::new(
        stream,
        topology.clone(),
        FusionEngine::new(topology, telemetry),
        cache,
        stats.clone(),
        config.backoff.policy(),
        config.consumer_settings(),
        consumer_liveness,
    );

    let cancel = CancellationToken::new();

    let router = setup_metrics_routes(status_router("card consumer", liveness))?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move { serve(router, &bind).await });

    let reporter = tokio::spawn(report_stats(
        stats,
        config.stats_report_interval.0,
        cancel.clone(),
    ));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    tokio::select! {
        _ = consumer.run(cancel.clone()) => {}
        res = http_server => {
            error!("http server exited");
            if let Ok(Err(e)) = res {
                error!("server failed with: {}", e)
            }
            cancel.cancel();
        }
    }

    if let Err(e) = reporter.await {
        error!("stats reporter failed: {}", e);
    }

    info!("Card consumer shut down");
    Ok(())
}
