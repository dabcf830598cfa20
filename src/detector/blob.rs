//! Blob detector variant
//!
//! Background-subtraction pipeline: threshold, morphological cleanup,
//! polygon masking, connected components with area gating.

use super::{DetectOptions, Detection, DetectionMode, DetectionResult};
use crate::error::Result;
use crate::imaging::{
    self, GrayPlane, Vertex, DEFAULT_DIFF_THRESHOLD, DEFAULT_MORPH_PASSES,
};
use std::time::Instant;

/// Class label assigned to blob detections
const BLOB_LABEL: &str = "object";

/// Stateless blob detector
pub struct BlobDetector;

impl BlobDetector {
    /// Analyze one zone polygon against a frame.
    ///
    /// With a background plane the frame is differenced against it; without
    /// one the frame's own mean luma serves as a degraded reference.
    pub fn analyze(
        frame: &GrayPlane,
        background: Option<&GrayPlane>,
        polygon: &[Vertex],
        opts: &DetectOptions,
    ) -> Result<DetectionResult> {
        let started = Instant::now();

        let bin = match background {
            Some(bg) => imaging::abs_diff_threshold(frame, bg, DEFAULT_DIFF_THRESHOLD)?,
            None => imaging::mean_diff_threshold(frame, DEFAULT_DIFF_THRESHOLD),
        };
        let cleaned = imaging::morph_clean(&bin, DEFAULT_MORPH_PASSES);
        let mask = imaging::polygon_mask(polygon, frame.width, frame.height);
        let gated = imaging::apply_mask(&cleaned, &mask)?;
        let blobs = imaging::connected_components(&gated, opts.min_area, opts.max_area);

        let detections = blobs
            .into_iter()
            .map(|b| Detection {
                label: BLOB_LABEL.to_string(),
                confidence: 1.0,
                bbox: b.bbox,
                centroid: Some(b.centroid),
                area: Some(b.area),
            })
            .collect();

        Ok(DetectionResult::new(
            detections,
            started.elapsed().as_millis() as u64,
            DetectionMode::Blob,
        ))
    }
}
