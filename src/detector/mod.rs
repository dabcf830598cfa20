//! DetectorEngine - Pluggable Zone Detection
//!
//! ## Responsibilities
//!
//! - Normalized detection results across variants
//! - Blob variant: background subtraction over the imaging primitives
//! - External variant: object-detector service call with post-filtering
//! - Process-wide mode selection with availability probing
//!
//! The external variant falls back to blob detection on any transport or
//! parse failure; the result then reports the effective mode (`blob`).

mod blob;
mod external;

pub use blob::BlobDetector;
pub use external::ExternalDetectorClient;

use crate::error::{Error, Result};
use crate::imaging::{BoundingBox, GrayPlane, Vertex};
use crate::realtime_hub::{HubMessage, ModeChangedMessage, RealtimeHub};
use crate::zone_store::Zone;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default confidence threshold for external detections
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Detection variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    Blob,
    ExternalYolo,
    ExternalSsd,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Blob => "blob",
            DetectionMode::ExternalYolo => "external-yolo",
            DetectionMode::ExternalSsd => "external-ssd",
        }
    }

    /// Model tag sent to the external detector service.
    pub fn model_tag(&self) -> Option<&'static str> {
        match self {
            DetectionMode::Blob => None,
            DetectionMode::ExternalYolo => Some("yolo"),
            DetectionMode::ExternalSsd => Some("ssd"),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DetectionMode::Blob => "Background subtraction",
            DetectionMode::ExternalYolo => "External detector (YOLO)",
            DetectionMode::ExternalSsd => "External detector (SSD)",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DetectionMode::Blob => {
                "Difference against a per-camera background with blob extraction"
            }
            DetectionMode::ExternalYolo => "Object classes from the external YOLO model",
            DetectionMode::ExternalSsd => "Object classes from the external SSD model",
        }
    }

    pub fn all() -> [DetectionMode; 3] {
        [
            DetectionMode::Blob,
            DetectionMode::ExternalYolo,
            DetectionMode::ExternalSsd,
        ]
    }
}

impl FromStr for DetectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(DetectionMode::Blob),
            "external-yolo" => Ok(DetectionMode::ExternalYolo),
            "external-ssd" => Ok(DetectionMode::ExternalSsd),
            other => Err(Error::Validation(format!("unknown detection mode: {}", other))),
        }
    }
}

/// Per-call detection options, derived from the zone's thresholds
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub min_area: u32,
    pub max_area: u32,
    pub confidence_threshold: f32,
    /// When set, external detections outside this class list are dropped
    pub allowed_classes: Option<Vec<String>>,
}

impl DetectOptions {
    pub fn from_zone(zone: &Zone) -> Self {
        Self {
            min_area: zone.min_area,
            max_area: zone.max_area,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            allowed_classes: None,
        }
    }
}

/// A generic object observation from any detector variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Blob detections carry their centroid; external ones do not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid: Option<(u32, u32)>,
    /// Blob detections carry their pixel area; external ones do not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<u32>,
}

/// Normalized result of one analyze call
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub count: u32,
    pub inference_ms: u64,
    pub mode: DetectionMode,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>, inference_ms: u64, mode: DetectionMode) -> Self {
        let count = detections.len() as u32;
        Self {
            detections,
            count,
            inference_ms,
            mode,
        }
    }
}

/// DetectorEngine instance
pub struct DetectorEngine {
    external: ExternalDetectorClient,
    mode: RwLock<DetectionMode>,
    hub: Arc<RealtimeHub>,
}

impl DetectorEngine {
    /// Create new DetectorEngine starting in blob mode
    pub fn new(detector_base_url: String, hub: Arc<RealtimeHub>) -> Self {
        Self {
            external: ExternalDetectorClient::new(detector_base_url),
            mode: RwLock::new(DetectionMode::Blob),
            hub,
        }
    }

    /// Currently selected mode
    pub async fn current_mode(&self) -> DetectionMode {
        *self.mode.read().await
    }

    /// Probe the external detector's availability (bounded to ~2 seconds).
    pub async fn external_available(&self) -> bool {
        self.external.status().await
    }

    /// Switch the active mode.
    ///
    /// A non-blob mode requires the external service to answer its status
    /// probe; otherwise the switch fails with `BackendUnavailable`.
    pub async fn set_mode(&self, mode: DetectionMode) -> Result<DetectionMode> {
        if mode != DetectionMode::Blob && !self.external.status().await {
            return Err(Error::BackendUnavailable(format!(
                "external detector is unreachable, cannot switch to {}",
                mode.as_str()
            )));
        }

        {
            let mut current = self.mode.write().await;
            *current = mode;
        }

        tracing::info!(mode = %mode.as_str(), "Detection mode changed");
        self.hub
            .broadcast(HubMessage::ModeChanged(ModeChangedMessage {
                mode: mode.as_str().to_string(),
            }))
            .await;

        Ok(mode)
    }

    /// Run the active variant over one zone polygon.
    ///
    /// `frame_jpeg` feeds the external variant, `frame_gray` (already
    /// decoded once per frame) feeds the blob variant.
    pub async fn analyze(
        &self,
        frame_jpeg: &[u8],
        frame_gray: &GrayPlane,
        background: Option<&GrayPlane>,
        polygon: &[Vertex],
        opts: &DetectOptions,
    ) -> Result<DetectionResult> {
        let mode = self.current_mode().await;
        match mode {
            DetectionMode::Blob => BlobDetector::analyze(frame_gray, background, polygon, opts),
            DetectionMode::ExternalYolo | DetectionMode::ExternalSsd => {
                match self
                    .external
                    .analyze(frame_jpeg, mode, polygon, opts)
                    .await
                {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        tracing::warn!(
                            requested_mode = %mode.as_str(),
                            error = %e,
                            "External detector failed, falling back to blob detection"
                        );
                        BlobDetector::analyze(frame_gray, None, polygon, opts)
                    }
                }
            }
        }
    }
}
