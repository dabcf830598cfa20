//! Zonewatch - Multi-Camera Zone-Occupancy Monitor
//!
//! Main entry point for the monitor service.

use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zonewatch::{
    analysis::AnalysisPipeline,
    db,
    detector::DetectorEngine,
    event_log::EventLogService,
    occupancy::OccupancyTracker,
    realtime_hub::RealtimeHub,
    scheduler::RoundRobinScheduler,
    snapshot_client::SnapshotClient,
    state::{AppConfig, AppState},
    web_api,
    zone_store::ZoneStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zonewatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting zonewatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        snapshot_base_url = %config.snapshot_base_url,
        detector_base_url = %config.detector_base_url,
        "Configuration loaded"
    );

    // Open the embedded row store
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    db::init_schema(&pool).await?;
    tracing::info!("Row store connected");

    // Initialize components
    let realtime = Arc::new(RealtimeHub::new());
    let zones = Arc::new(ZoneStore::new(pool.clone()).await?);
    tracing::info!("ZoneStore initialized");

    let detector = Arc::new(DetectorEngine::new(
        config.detector_base_url.clone(),
        realtime.clone(),
    ));
    let occupancy = Arc::new(OccupancyTracker::new());
    let event_log = Arc::new(EventLogService::new(pool.clone(), realtime.clone()));
    let snapshots = Arc::new(SnapshotClient::new(config.snapshot_base_url.clone()));

    let analysis = Arc::new(AnalysisPipeline::new(
        detector.clone(),
        occupancy.clone(),
        event_log.clone(),
        realtime.clone(),
    ));

    let scheduler = Arc::new(RoundRobinScheduler::new(
        zones.clone(),
        snapshots.clone(),
        analysis.clone(),
        config.background_alpha,
    ));
    tracing::info!("RoundRobinScheduler initialized (stopped)");

    // Create application state
    let state = AppState {
        pool,
        config,
        zones,
        detector,
        occupancy,
        event_log,
        analysis,
        snapshots,
        scheduler,
        realtime,
    };

    // Create router
    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
