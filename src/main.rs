mod api;
mod broadcast;
mod clock;
mod config;
mod db;
mod detector;
mod error;
mod ingest;
mod matching;
mod monitor;
mod normalizer;
mod odds;
mod state;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::broadcast::{Broadcaster, RelayClient};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::{DbWriter, OddsStore};
use crate::detector::ChangeTracker;
use crate::error::Result;
use crate::ingest::{FeedFetcher, Ingestor};
use crate::monitor::{FiredWarningSet, MonitorHandle, MonitorSettings, TrendMonitor};
use crate::state::{MatchCache, WarningCache};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = OddsStore::connect(&cfg.db_path, cfg.db_min_connections, cfg.db_max_connections).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared state ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let cache = Arc::new(MatchCache::new());
    let warnings = Arc::new(WarningCache::new());
    let fired = Arc::new(FiredWarningSet::new());
    let tracker = Arc::new(ChangeTracker::new());

    let settings = MonitorSettings {
        enabled: cfg.monitor_enabled,
        point_monitor_enabled: cfg.point_monitor_enabled,
        ..Default::default()
    };
    let monitor_handle = Arc::new(MonitorHandle::new(settings, cfg.source_ids()));

    // --- Channels ---
    let (batch_tx, batch_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (payload_tx, payload_rx) = broadcast::channel();

    // --- Spawn tasks ---

    // Persistence writer
    let writer = DbWriter::new(store.clone(), batch_rx, Arc::clone(&tracker), Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // Ingestor (fetch -> reconcile -> cache + writer)
    let fetcher = FeedFetcher::new(Arc::clone(&latency))?;
    let ingestor = Ingestor::new(
        cfg.clone(),
        fetcher,
        store.clone(),
        Arc::clone(&cache),
        batch_tx,
        Arc::clone(&health),
    );
    tokio::spawn(async move { ingestor.run().await });

    // Trend monitor
    let monitor = TrendMonitor::new(
        store.clone(),
        Arc::clone(&monitor_handle),
        Arc::clone(&warnings),
        fired,
        Arc::clone(&health),
        cfg.index_source,
    );
    tokio::spawn(async move { monitor.run().await });

    // Broadcaster
    let broadcaster = Broadcaster::new(Arc::clone(&cache), payload_tx);
    tokio::spawn(async move { broadcaster.run().await });

    // Optional external relay
    match cfg.broadcast_relay_url.clone() {
        Some(url) => {
            let relay = RelayClient::new(url, payload_rx.clone(), Arc::clone(&health));
            tokio::spawn(async move { relay.run().await });
        }
        None => warn!("BROADCAST_RELAY_URL not set: payloads are served on /ws only"),
    }

    // HTTP API server
    let api_state = ApiState {
        store,
        cache,
        warnings,
        monitor: monitor_handle,
        health,
        latency,
        payload_rx,
        sources: cfg.source_ids(),
        canonical_source: cfg.canonical_source,
        index_source: cfg.index_source,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
