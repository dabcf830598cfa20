//! Zone store types

use crate::error::{Error, Result};
use crate::imaging::Vertex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default minimum blob area in pixels squared
pub const DEFAULT_MIN_AREA: u32 = 500;
/// Default maximum blob area in pixels squared
pub const DEFAULT_MAX_AREA: u32 = 50_000;
/// Default alarm threshold (occupancy count)
pub const DEFAULT_ALARM_THRESHOLD: u32 = 1;

/// A named polygonal region on one camera's image plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub camera_id: Option<String>,
    /// Ordered vertices in image pixel space, at least three
    pub polygon: Vec<Vertex>,
    pub min_area: u32,
    pub max_area: u32,
    pub alarm_threshold: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Zone creation payload
#[derive(Debug, Clone, Deserialize)]
pub struct CreateZoneRequest {
    pub name: String,
    pub camera_id: Option<String>,
    pub polygon: Vec<Vertex>,
    pub min_area: Option<u32>,
    pub max_area: Option<u32>,
    pub alarm_threshold: Option<u32>,
}

/// Partial zone update payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateZoneRequest {
    pub name: Option<String>,
    pub camera_id: Option<String>,
    pub polygon: Option<Vec<Vertex>>,
    pub min_area: Option<u32>,
    pub max_area: Option<u32>,
    pub alarm_threshold: Option<u32>,
}

/// Shoelace area of a polygon, in pixels squared.
fn polygon_area(polygon: &[Vertex]) -> f64 {
    let n = polygon.len();
    let mut twice_area = 0.0;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[(i + 1) % n];
        twice_area += xi * yj - xj * yi;
    }
    (twice_area / 2.0).abs()
}

/// Validate a polygon for zone use: at least three finite vertices and a
/// non-degenerate area.
pub fn validate_polygon(polygon: &[Vertex]) -> Result<()> {
    if polygon.len() < 3 {
        return Err(Error::Validation(format!(
            "zone polygon needs at least 3 vertices, got {}",
            polygon.len()
        )));
    }
    if polygon
        .iter()
        .any(|&(x, y)| !x.is_finite() || !y.is_finite())
    {
        return Err(Error::Validation(
            "zone polygon has non-numeric coordinates".to_string(),
        ));
    }
    if polygon_area(polygon) <= 0.0 {
        return Err(Error::Validation(
            "zone polygon is degenerate (zero area)".to_string(),
        ));
    }
    Ok(())
}

/// Validate area bounds and alarm threshold.
pub fn validate_thresholds(min_area: u32, max_area: u32, alarm_threshold: u32) -> Result<()> {
    if min_area > max_area {
        return Err(Error::Validation(format!(
            "min_area {} exceeds max_area {}",
            min_area, max_area
        )));
    }
    if alarm_threshold < 1 {
        return Err(Error::Validation(
            "alarm_threshold must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_polygon() {
        assert!(validate_polygon(&[(0.0, 0.0), (1.0, 1.0)]).is_err());
    }

    #[test]
    fn rejects_nan_coordinates() {
        assert!(validate_polygon(&[(0.0, 0.0), (1.0, f64::NAN), (2.0, 0.0)]).is_err());
    }

    #[test]
    fn rejects_collinear_polygon() {
        assert!(validate_polygon(&[(0.0, 0.0), (5.0, 5.0), (10.0, 10.0)]).is_err());
    }

    #[test]
    fn accepts_triangle() {
        assert!(validate_polygon(&[(0.0, 0.0), (10.0, 0.0), (5.0, 8.0)]).is_ok());
    }

    #[test]
    fn rejects_inverted_area_bounds() {
        assert!(validate_thresholds(100, 50, 1).is_err());
        assert!(validate_thresholds(50, 100, 0).is_err());
        assert!(validate_thresholds(50, 100, 1).is_ok());
    }
}
