//! AnalysisPipeline - Shared Per-Zone Detection Flow
//!
//! One path for both the scheduler and the admin API:
//! detector -> occupancy update -> event logging -> fan-out.
//!
//! Persistence failures are surfaced to API callers but only logged on the
//! scheduler path, which must keep ticking.

use crate::detector::{DetectOptions, Detection, DetectionMode, DetectorEngine};
use crate::error::Result;
use crate::event_log::EventLogService;
use crate::imaging::GrayPlane;
use crate::occupancy::OccupancyTracker;
use crate::realtime_hub::{HubMessage, OccupancyUpdateMessage, RealtimeHub};
use crate::zone_store::Zone;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Result of analyzing one zone, as reported to API callers
#[derive(Debug, Clone, Serialize)]
pub struct ZoneAnalysis {
    pub zone_id: String,
    pub zone_name: String,
    pub count: u32,
    pub blobs: Vec<Detection>,
    pub alarm: bool,
    pub mode: DetectionMode,
    pub inference_ms: u64,
}

/// AnalysisPipeline instance
pub struct AnalysisPipeline {
    detector: Arc<DetectorEngine>,
    occupancy: Arc<OccupancyTracker>,
    event_log: Arc<EventLogService>,
    hub: Arc<RealtimeHub>,
}

impl AnalysisPipeline {
    /// Create new AnalysisPipeline
    pub fn new(
        detector: Arc<DetectorEngine>,
        occupancy: Arc<OccupancyTracker>,
        event_log: Arc<EventLogService>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            detector,
            occupancy,
            event_log,
            hub,
        }
    }

    /// Run detection for one zone, publish the occupancy write, and log any
    /// resulting event.
    ///
    /// `surface_persist_errors` decides whether an event-row write failure
    /// propagates (API calls) or is swallowed after logging (scheduler).
    pub async fn analyze_zone(
        &self,
        zone: &Zone,
        frame_jpeg: &[u8],
        frame_gray: &GrayPlane,
        background: Option<&GrayPlane>,
        surface_persist_errors: bool,
    ) -> Result<ZoneAnalysis> {
        let opts = DetectOptions::from_zone(zone);
        let result = self
            .detector
            .analyze(frame_jpeg, frame_gray, background, &zone.polygon, &opts)
            .await?;

        let now = Utc::now();
        let (entry, draft) = self
            .occupancy
            .record(zone, result.count, result.detections.clone(), now)
            .await;

        if let Some(draft) = draft {
            match self.event_log.append(draft).await {
                Ok(_) => {}
                Err(e) if surface_persist_errors => return Err(e),
                Err(e) => {
                    tracing::error!(
                        zone_id = %zone.id,
                        error = %e,
                        "Event persist failed, continuing"
                    );
                }
            }
        }

        self.hub
            .broadcast(HubMessage::OccupancyUpdate(OccupancyUpdateMessage {
                zone_id: entry.zone_id.clone(),
                zone_name: entry.zone_name.clone(),
                camera_id: entry.camera_id.clone(),
                count: entry.count,
                alarm: entry.alarm,
                timestamp: entry.last_updated,
            }))
            .await;

        Ok(ZoneAnalysis {
            zone_id: entry.zone_id,
            zone_name: entry.zone_name,
            count: entry.count,
            blobs: entry.blobs,
            alarm: entry.alarm,
            mode: result.mode,
            inference_ms: result.inference_ms,
        })
    }
}
