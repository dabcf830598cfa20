//! Application state
//!
//! Holds all shared components and state

use crate::analysis::AnalysisPipeline;
use crate::detector::DetectorEngine;
use crate::event_log::EventLogService;
use crate::occupancy::OccupancyTracker;
use crate::realtime_hub::RealtimeHub;
use crate::scheduler::RoundRobinScheduler;
use crate::snapshot_client::SnapshotClient;
use crate::zone_store::ZoneStore;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL (embedded SQLite store)
    pub database_url: String,
    /// Snapshot source base URL
    pub snapshot_base_url: String,
    /// External object-detector base URL
    pub detector_base_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Running-mean coefficient for background maintenance (0 disables)
    pub background_alpha: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://zonewatch.db?mode=rwc".to_string()),
            snapshot_base_url: std::env::var("SNAPSHOT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:1984".to_string()),
            detector_base_url: std::env::var("EXTERNAL_DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3620),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            background_alpha: std::env::var("BACKGROUND_ALPHA")
                .ok()
                .and_then(|a| a.parse().ok())
                .unwrap_or(0.1),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// Zone and background store
    pub zones: Arc<ZoneStore>,
    /// Detector engine (mode selector + variants)
    pub detector: Arc<DetectorEngine>,
    /// Occupancy state and session tracking
    pub occupancy: Arc<OccupancyTracker>,
    /// Event log persistence
    pub event_log: Arc<EventLogService>,
    /// Per-zone analysis pipeline
    pub analysis: Arc<AnalysisPipeline>,
    /// Snapshot source adapter
    pub snapshots: Arc<SnapshotClient>,
    /// Round-robin scheduler
    pub scheduler: Arc<RoundRobinScheduler>,
    /// RealtimeHub (WebSocket fan-out)
    pub realtime: Arc<RealtimeHub>,
}
