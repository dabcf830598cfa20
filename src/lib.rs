//! Zonewatch - Multi-Camera Zone-Occupancy Monitor
//!
//! ## Architecture
//!
//! 1. Imaging - grayscale primitives for background subtraction
//! 2. ZoneStore - SSoT for zones and per-camera backgrounds
//! 3. DetectorEngine - blob / external detector variants + mode selector
//! 4. OccupancyTracker - per-zone counts and dwell sessions
//! 5. EventLogService - entry/exit/occupancy_change records
//! 6. AnalysisPipeline - the shared per-zone detection flow
//! 7. RoundRobinScheduler - camera polling
//! 8. Renderer - annotated frame overlays
//! 9. RealtimeHub - WebSocket distribution
//! 10. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - SSoT: ZoneStore is the single source of truth for zone config
//! - One-way flow: scheduler -> detector -> occupancy -> event log -> hub

pub mod analysis;
pub mod db;
pub mod detector;
pub mod error;
pub mod event_log;
pub mod imaging;
pub mod occupancy;
pub mod realtime_hub;
pub mod renderer;
pub mod scheduler;
pub mod snapshot_client;
pub mod state;
pub mod web_api;
pub mod zone_store;

pub use error::{Error, Result};
pub use state::AppState;
