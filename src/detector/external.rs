//! External detector variant
//!
//! Adapter for the external object-detector service. Responses are
//! normalized (either `detections` or `objects`, bounding boxes as arrays
//! or objects), then post-filtered by polygon containment, class allow-list,
//! and confidence.

use super::{DetectOptions, Detection, DetectionMode, DetectionResult};
use crate::error::{Error, Result};
use crate::imaging::{point_in_polygon, BoundingBox, Vertex};
use base64::Engine;
use std::time::{Duration, Instant};

/// Availability probe timeout
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// Analyze call timeout
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(10);

/// One detection as reported by the service, before filtering
#[derive(Debug, Clone, PartialEq)]
struct RawDetection {
    label: String,
    confidence: f32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl RawDetection {
    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn to_detection(&self) -> Detection {
        Detection {
            label: self.label.clone(),
            confidence: self.confidence,
            bbox: BoundingBox {
                x: self.x.max(0.0) as u32,
                y: self.y.max(0.0) as u32,
                width: self.width.max(0.0) as u32,
                height: self.height.max(0.0) as u32,
            },
            centroid: None,
            area: None,
        }
    }
}

/// External detector service client
pub struct ExternalDetectorClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExternalDetectorClient {
    /// Create new client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ANALYZE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }

    /// Probe `GET /status`; any failure reads as unavailable.
    pub async fn status(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        let resp = match self
            .client
            .get(&url)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "External detector status probe failed");
                return false;
            }
        };
        if !resp.status().is_success() {
            return false;
        }
        match resp.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("available")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Send a frame to the service and post-filter its detections.
    pub async fn analyze(
        &self,
        frame_jpeg: &[u8],
        mode: DetectionMode,
        polygon: &[Vertex],
        opts: &DetectOptions,
    ) -> Result<DetectionResult> {
        let model = mode
            .model_tag()
            .ok_or_else(|| Error::Internal("blob mode has no external model".to_string()))?;
        let started = Instant::now();

        let payload = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(frame_jpeg),
            "model": model,
        });

        let url = format!("{}/analyze/base64", self.base_url);
        let resp = self.client.post(&url).json(&payload).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "external detector returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let (raw, server_ms) = parse_response(&body)?;
        let detections = post_filter(raw, polygon, opts);

        let inference_ms = server_ms.unwrap_or_else(|| started.elapsed().as_millis() as u64);
        Ok(DetectionResult::new(detections, inference_ms, mode))
    }
}

/// Normalize a service response into raw detections.
///
/// Accepts the detection list under `detections` or `objects`, and bounding
/// boxes as `[x, y, w, h]` arrays or `{x, y, width, height}` objects.
/// Entries missing a usable label or bbox are dropped.
fn parse_response(body: &serde_json::Value) -> Result<(Vec<RawDetection>, Option<u64>)> {
    if let Some(err) = body.get("error").and_then(|e| e.as_str()) {
        return Err(Error::Internal(format!("external detector error: {}", err)));
    }

    let list = body
        .get("detections")
        .or_else(|| body.get("objects"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            Error::Internal("external detector response has no detection list".to_string())
        })?;

    let raw = list.iter().filter_map(parse_detection).collect();
    let server_ms = body.get("inference_ms").and_then(|v| v.as_u64());
    Ok((raw, server_ms))
}

fn parse_detection(item: &serde_json::Value) -> Option<RawDetection> {
    let label = item.get("label")?.as_str()?.to_string();
    let confidence = item
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;

    let bbox = item.get("bbox")?;
    let (x, y, width, height) = if let Some(arr) = bbox.as_array() {
        if arr.len() != 4 {
            return None;
        }
        (
            arr[0].as_f64()?,
            arr[1].as_f64()?,
            arr[2].as_f64()?,
            arr[3].as_f64()?,
        )
    } else {
        (
            bbox.get("x")?.as_f64()?,
            bbox.get("y")?.as_f64()?,
            bbox.get("width")?.as_f64()?,
            bbox.get("height")?.as_f64()?,
        )
    };

    Some(RawDetection {
        label,
        confidence,
        x,
        y,
        width,
        height,
    })
}

/// Apply the filter chain: polygon containment of the box center, class
/// allow-list, then confidence threshold.
fn post_filter(
    raw: Vec<RawDetection>,
    polygon: &[Vertex],
    opts: &DetectOptions,
) -> Vec<Detection> {
    let allowed: Option<Vec<String>> = opts
        .allowed_classes
        .as_ref()
        .map(|classes| classes.iter().map(|c| c.to_lowercase()).collect());

    raw.into_iter()
        .filter(|d| point_in_polygon(d.center(), polygon))
        .filter(|d| match &allowed {
            Some(classes) => classes.contains(&d.label.to_lowercase()),
            None => true,
        })
        .filter(|d| d.confidence >= opts.confidence_threshold)
        .map(|d| d.to_detection())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts() -> DetectOptions {
        DetectOptions {
            min_area: 0,
            max_area: u32::MAX,
            confidence_threshold: 0.5,
            allowed_classes: None,
        }
    }

    fn frame_polygon() -> Vec<Vertex> {
        vec![(0.0, 0.0), (640.0, 0.0), (640.0, 480.0), (0.0, 480.0)]
    }

    #[test]
    fn parses_detections_with_array_bboxes() {
        let body = json!({
            "detections": [
                {"label": "car", "confidence": 0.9, "bbox": [10, 20, 40, 30]}
            ],
            "inference_ms": 42
        });
        let (raw, ms) = parse_response(&body).unwrap();
        assert_eq!(ms, Some(42));
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].label, "car");
        assert_eq!(raw[0].center(), (30.0, 35.0));
    }

    #[test]
    fn parses_objects_with_struct_bboxes() {
        let body = json!({
            "objects": [
                {"label": "truck", "confidence": 0.7,
                 "bbox": {"x": 100.0, "y": 50.0, "width": 60.0, "height": 40.0}}
            ]
        });
        let (raw, ms) = parse_response(&body).unwrap();
        assert_eq!(ms, None);
        assert_eq!(raw[0].width, 60.0);
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let body = json!({
            "detections": [
                {"label": "car", "confidence": 0.9, "bbox": [10, 20, 40, 30]},
                {"confidence": 0.9, "bbox": [1, 2, 3, 4]},
                {"label": "bus", "confidence": 0.8, "bbox": [1, 2, 3]}
            ]
        });
        let (raw, _) = parse_response(&body).unwrap();
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn error_field_fails_the_parse() {
        let body = json!({"error": "model not loaded"});
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn missing_detection_list_fails_the_parse() {
        assert!(parse_response(&json!({"status": "ok"})).is_err());
    }

    #[test]
    fn filter_drops_centers_outside_polygon() {
        let raw = vec![
            RawDetection {
                label: "car".into(),
                confidence: 0.9,
                x: 10.0,
                y: 10.0,
                width: 20.0,
                height: 20.0,
            },
            RawDetection {
                label: "car".into(),
                confidence: 0.9,
                x: 700.0,
                y: 10.0,
                width: 20.0,
                height: 20.0,
            },
        ];
        let kept = post_filter(raw, &frame_polygon(), &opts());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox.x, 10);
    }

    #[test]
    fn filter_applies_allow_list_case_insensitively() {
        let raw = vec![
            RawDetection {
                label: "Car".into(),
                confidence: 0.9,
                x: 10.0,
                y: 10.0,
                width: 20.0,
                height: 20.0,
            },
            RawDetection {
                label: "person".into(),
                confidence: 0.9,
                x: 50.0,
                y: 50.0,
                width: 20.0,
                height: 20.0,
            },
        ];
        let mut o = opts();
        o.allowed_classes = Some(vec!["car".to_string()]);
        let kept = post_filter(raw, &frame_polygon(), &o);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "Car");
    }

    #[test]
    fn filter_drops_low_confidence() {
        let raw = vec![
            RawDetection {
                label: "car".into(),
                confidence: 0.4,
                x: 10.0,
                y: 10.0,
                width: 20.0,
                height: 20.0,
            },
            RawDetection {
                label: "car".into(),
                confidence: 0.6,
                x: 50.0,
                y: 50.0,
                width: 20.0,
                height: 20.0,
            },
        ];
        let kept = post_filter(raw, &frame_polygon(), &opts());
        assert_eq!(kept.len(), 1);
        assert!(kept[0].confidence >= 0.5);
    }
}
