//! Zone store repository
//!
//! Database access layer for zones and per-camera background blobs.

use super::types::*;
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// Zone SELECT columns
const ZONE_COLUMNS: &str =
    "id, name, camera_id, polygon, min_area, max_area, alarm_threshold, created_at, updated_at";

/// Repository for zone and background rows
#[derive(Clone)]
pub struct ZoneRepository {
    pool: SqlitePool,
}

impl ZoneRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_zone(row: &sqlx::sqlite::SqliteRow) -> Result<Zone> {
        let polygon_json: String = row.get("polygon");
        let polygon = serde_json::from_str(&polygon_json)?;
        Ok(Zone {
            id: row.get("id"),
            name: row.get("name"),
            camera_id: row.get("camera_id"),
            polygon,
            min_area: row.get::<i64, _>("min_area") as u32,
            max_area: row.get::<i64, _>("max_area") as u32,
            alarm_threshold: row.get::<i64, _>("alarm_threshold") as u32,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Insert a zone row.
    pub async fn insert(&self, zone: &Zone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zones (id, name, camera_id, polygon, min_area, max_area,
                               alarm_threshold, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(&zone.camera_id)
        .bind(serde_json::to_string(&zone.polygon)?)
        .bind(zone.min_area as i64)
        .bind(zone.max_area as i64)
        .bind(zone.alarm_threshold as i64)
        .bind(zone.created_at)
        .bind(zone.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a zone by id.
    pub async fn get(&self, id: &str) -> Result<Option<Zone>> {
        let query = format!("SELECT {} FROM zones WHERE id = ?", ZONE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_zone).transpose()
    }

    /// All zones, newest first.
    pub async fn list(&self) -> Result<Vec<Zone>> {
        let query = format!(
            "SELECT {} FROM zones ORDER BY created_at DESC",
            ZONE_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_zone).collect()
    }

    /// Overwrite the patched fields of a zone row.
    pub async fn update(&self, zone: &Zone) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE zones
            SET name = ?, camera_id = ?, polygon = ?, min_area = ?, max_area = ?,
                alarm_threshold = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&zone.name)
        .bind(&zone.camera_id)
        .bind(serde_json::to_string(&zone.polygon)?)
        .bind(zone.min_area as i64)
        .bind(zone.max_area as i64)
        .bind(zone.alarm_threshold as i64)
        .bind(zone.updated_at)
        .bind(&zone.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("zone {}", zone.id)));
        }
        Ok(())
    }

    /// Delete a zone row; event rows for the zone go first so referential
    /// integrity holds. Returns whether a zone row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM events WHERE zone_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM zones WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert a background blob for a camera.
    pub async fn save_background(&self, camera_id: &str, blob: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO background_frames (camera_id, blob, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(camera_id) DO UPDATE SET blob = excluded.blob,
                                                 updated_at = excluded.updated_at
            "#,
        )
        .bind(camera_id)
        .bind(blob)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a camera's background blob.
    pub async fn get_background(&self, camera_id: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT blob FROM background_frames WHERE camera_id = ?")
            .bind(camera_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("blob")))
    }
}
