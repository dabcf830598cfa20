//! ZoneStore - Single Source of Truth for Zones and Backgrounds
//!
//! ## Responsibilities
//!
//! - Zone CRUD with polygon validation
//! - Per-camera background blob persistence (upsert, opaque PNG planes)
//! - In-memory cache for the scheduler's and renderer's frequent reads
//!
//! Deleting a zone cascades to its event rows; the caller clears the
//! in-memory occupancy entry.

mod repository;
mod types;

pub use repository::ZoneRepository;
pub use types::*;

use crate::error::{Error, Result};
use crate::imaging::{self, GrayPlane};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// ZoneStore instance
pub struct ZoneStore {
    repo: ZoneRepository,
    /// In-memory cache for frequent reads
    cache: Arc<RwLock<Vec<Zone>>>,
}

impl ZoneStore {
    /// Create new ZoneStore with an initial cache load
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let repo = ZoneRepository::new(pool);
        let store = Self {
            repo,
            cache: Arc::new(RwLock::new(Vec::new())),
        };
        store.refresh_cache().await?;
        Ok(store)
    }

    /// Reload the zone cache from the row store.
    pub async fn refresh_cache(&self) -> Result<()> {
        let zones = self.repo.list().await?;
        let mut cache = self.cache.write().await;
        tracing::debug!(zone_count = zones.len(), "Zone cache refreshed");
        *cache = zones;
        Ok(())
    }

    /// Create a zone, assigning an opaque id and defaulting thresholds.
    pub async fn create(&self, req: CreateZoneRequest) -> Result<Zone> {
        validate_polygon(&req.polygon)?;
        let min_area = req.min_area.unwrap_or(DEFAULT_MIN_AREA);
        let max_area = req.max_area.unwrap_or(DEFAULT_MAX_AREA);
        let alarm_threshold = req.alarm_threshold.unwrap_or(DEFAULT_ALARM_THRESHOLD);
        validate_thresholds(min_area, max_area, alarm_threshold)?;

        let now = Utc::now();
        let zone = Zone {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            camera_id: req.camera_id,
            polygon: req.polygon,
            min_area,
            max_area,
            alarm_threshold,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(&zone).await?;
        self.refresh_cache().await?;

        tracing::info!(zone_id = %zone.id, zone_name = %zone.name, "Zone created");
        Ok(zone)
    }

    /// Get a zone by id.
    pub async fn get(&self, id: &str) -> Result<Option<Zone>> {
        self.repo.get(id).await
    }

    /// All zones sorted by creation time descending.
    pub async fn list(&self) -> Result<Vec<Zone>> {
        self.repo.list().await
    }

    /// Apply a partial patch; untouched fields keep their values.
    pub async fn update(&self, id: &str, patch: UpdateZoneRequest) -> Result<Zone> {
        let mut zone = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("zone {}", id)))?;

        if let Some(name) = patch.name {
            zone.name = name;
        }
        if let Some(camera_id) = patch.camera_id {
            zone.camera_id = Some(camera_id);
        }
        if let Some(polygon) = patch.polygon {
            validate_polygon(&polygon)?;
            zone.polygon = polygon;
        }
        if let Some(min_area) = patch.min_area {
            zone.min_area = min_area;
        }
        if let Some(max_area) = patch.max_area {
            zone.max_area = max_area;
        }
        if let Some(alarm_threshold) = patch.alarm_threshold {
            zone.alarm_threshold = alarm_threshold;
        }
        validate_thresholds(zone.min_area, zone.max_area, zone.alarm_threshold)?;
        zone.updated_at = Utc::now();

        self.repo.update(&zone).await?;
        self.refresh_cache().await?;
        Ok(zone)
    }

    /// Delete a zone and its event rows. Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.repo.delete(id).await?;
        if removed {
            self.refresh_cache().await?;
            tracing::info!(zone_id = %id, "Zone deleted");
        }
        Ok(removed)
    }

    /// Zones assigned to exactly this camera (scheduler ticks).
    pub async fn zones_for_camera(&self, camera_id: &str) -> Vec<Zone> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|z| z.camera_id.as_deref() == Some(camera_id))
            .cloned()
            .collect()
    }

    /// Zones for this camera plus unassigned zones, which apply to all
    /// cameras (renderer and manual analysis).
    pub async fn zones_for_camera_with_unassigned(&self, camera_id: &str) -> Vec<Zone> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|z| {
                z.camera_id.is_none() || z.camera_id.as_deref() == Some(camera_id)
            })
            .cloned()
            .collect()
    }

    /// Cached zones (fast read).
    pub async fn cached_zones(&self) -> Vec<Zone> {
        self.cache.read().await.clone()
    }

    /// Store a camera's background plane (upsert, replaced atomically).
    pub async fn save_background(&self, camera_id: &str, plane: &GrayPlane) -> Result<()> {
        let blob = imaging::encode_gray_png(plane)?;
        self.repo.save_background(camera_id, &blob).await?;
        tracing::debug!(
            camera_id = %camera_id,
            width = plane.width,
            height = plane.height,
            "Background saved"
        );
        Ok(())
    }

    /// Load a camera's background plane, if one has been captured.
    pub async fn get_background(&self, camera_id: &str) -> Result<Option<GrayPlane>> {
        match self.repo.get_background(camera_id).await? {
            Some(blob) => {
                let plane = imaging::to_gray(&blob)
                    .map_err(|e| Error::Internal(format!("stored background unreadable: {}", e)))?;
                Ok(Some(plane))
            }
            None => Ok(None),
        }
    }
}
