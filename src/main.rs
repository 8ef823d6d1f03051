//! Insight Kernel - reporting backend for the learning platform.
//!
//! Pulls metrics from the five upstream services on a daily schedule,
//! normalizes them into canonical snapshots, caches them in the snapshot
//! store (Redis or in-memory), and serves dashboard charts, combined
//! analytics and executive reports computed from the latest snapshot per
//! service.

mod charts;
mod config;
mod fetch;
mod http;
mod ingest;
mod models;
mod report;
mod resolver;
mod scheduler;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::fetch::HttpMetricsSource;
use crate::http::AppState;
use crate::ingest::Ingestor;
use crate::store::SnapshotStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // fine if no .env exists

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load_config().await;

    // Snapshot store: constructed once, injected everywhere. Starts degraded
    // rather than refusing to boot when Redis is configured but unreachable.
    let store = Arc::new(SnapshotStore::connect(&cfg.store).await);
    info!(target: "kernel", mode = store.mode(), "snapshot store initialized");

    let source = Arc::new(
        HttpMetricsSource::new(cfg.services.clone()).context("failed to build metrics fetcher")?,
    );
    let ingestor = Arc::new(Ingestor::new(store.clone(), source));

    scheduler::spawn_collection_loop(ingestor.clone(), cfg.collection.interval_hours);

    let app_state = AppState {
        store: store.clone(),
        ingestor,
        started_at: Instant::now(),
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http.port));
    info!(target: "kernel", "listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let served = axum::serve(listener, app).await;
    store.shutdown().await;
    served.context("server error")?;
    Ok(())
}
