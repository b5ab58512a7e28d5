//! Periodically re-derive every unit's cards and republish the card views.
use std::sync::Arc;

use card_common::cache::{CardCache, RedisClient};
use card_common::database::get_pool_with_settings;
use card_common::health::HealthRegistry;
use card_common::metrics::{serve, setup_metrics_routes, status_router};
use card_common::store::PgTopologyStore;
use card_engine::topology::TopologyEngine;
use card_engine::view::ViewAssembler;
use card_refresher::config::Config;
use card_refresher::refresher::{refresh_loop, Refresher};
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
    info!("Starting card refresher...");

    let config = Config::init_from_env()?;

    let pool =
        get_pool_with_settings(&config.database.database_url, config.database.pool_settings())
            .await?;
    let store = Arc::new(PgTopologyStore::new(pool));

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

    let refresher = Refresher::new(
        store.clone(),
        TopologyEngine::new(store.clone(), config.thresholds()),
        ViewAssembler::new(store, cache),
    );

    let liveness = HealthRegistry::new("liveness");
    let refresher_liveness =
        liveness.register("refresher".to_string(), config.liveness_deadline());

    let cancel = CancellationToken::new();
    let mut refresher_loop = tokio::spawn(refresh_loop(
        refresher,
        refresher_liveness,
        config.refresh_interval.0,
        cancel.clone(),
    ));

    let router = setup_metrics_routes(status_router("card refresher", liveness))?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move { serve(router, &bind).await });

    let shutdown = tokio::select! {
        res = &mut refresher_loop => {
            error!("refresher loop exited");
            if let Err(e) = res {
                error!("refresher failed with: {}", e)
            }
            false
        }
        res = http_server => {
            error!("http server exited");
            if let Ok(Err(e)) = res {
                error!("server failed with: {}", e)
            }
            true
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            true
        }
    };

    if shutdown {
        // Let an in-flight refresh finish.
        cancel.cancel();
        if let Err(e) = refresher_loop.await {
            error!("refresher failed with: {}", e);
        }
    }

    info!("exiting");
    Ok(())
}
