pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod languages;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod sandbox;
pub mod store;
pub mod worker;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;

use crate::engine::{
    aggregator::ResultAggregator,
    api::routes,
    catalog::LanguageCatalog,
    config::EngineConfig,
    languages::PluginRegistry,
    metrics::MetricsRegistry,
    queue::SubmissionQueue,
    sandbox::Sandbox,
    store::{InMemorySubmissionStore, SubmissionStore},
    worker::{WorkerContext, spawn_worker_pool},
};

pub async fn run() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    init_tracing(&config);

    let catalog = Arc::new(
        LanguageCatalog::standard(&config.toolchains).context("language catalog init failed")?,
    );
    let plugins = Arc::new(PluginRegistry::from_catalog(&catalog));
    let sandbox = Arc::new(Sandbox::from_config(&config).context("sandbox init failed")?);
    let store: Arc<dyn SubmissionStore> =
        Arc::new(InMemorySubmissionStore::new(config.persistence_path.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
    let queue = SubmissionQueue::new(config.queue_capacity, metrics.clone());
    tracing::info!(languages = catalog.len(), "language catalog loaded");

    let ctx = Arc::new(WorkerContext {
        plugins,
        sandbox,
        store: store.clone(),
        aggregator: Arc::new(ResultAggregator::new(store.clone(), metrics.clone())),
        metrics: metrics.clone(),
        limits: config.limits.clone(),
    });
    spawn_worker_pool(config.worker_count.max(1), queue.clone(), ctx);

    let app: Router = routes(catalog, store, queue, config.limits.clone(), metrics);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind listener")?;
    let local = listener
        .local_addr()
        .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
    tracing::info!(bind = %local, workers = config.worker_count.max(1), "submission engine ready");
    axum::serve(listener, app).await.context("engine server error")?;
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .init();
}
