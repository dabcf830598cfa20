//! Embedded row store schema
//!
//! The store is a single SQLite file; tables are created at startup so a
//! fresh deployment needs no external migration step.

use crate::error::Result;
use sqlx::SqlitePool;

/// Create tables and indices if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS zones (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            camera_id       TEXT,
            polygon         TEXT NOT NULL,
            min_area        INTEGER NOT NULL,
            max_area        INTEGER NOT NULL,
            alarm_threshold INTEGER NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS background_frames (
            camera_id  TEXT PRIMARY KEY,
            blob       BLOB NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            zone_id          TEXT NOT NULL,
            zone_name        TEXT NOT NULL,
            camera_id        TEXT,
            kind             TEXT NOT NULL,
            count_before     INTEGER NOT NULL,
            count_after      INTEGER NOT NULL,
            duration_seconds INTEGER,
            entry_time       TEXT,
            exit_time        TEXT,
            timestamp        TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_zone_id ON events(zone_id)")
        .execute(pool)
        .await?;

    tracing::info!("Row store schema ready");

    Ok(())
}
