//! Event log repository
//!
//! Append-only persistence for occupancy events, indexed by timestamp and
//! zone id.

use super::{EventDraft, EventQuery, ParkingEvent, ZoneStats};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

const EVENT_COLUMNS: &str = "id, zone_id, zone_name, camera_id, kind, count_before, \
                             count_after, duration_seconds, entry_time, exit_time, timestamp";

/// Repository for event rows
#[derive(Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<ParkingEvent> {
        let kind: String = row.get("kind");
        Ok(ParkingEvent {
            id: row.get("id"),
            zone_id: row.get("zone_id"),
            zone_name: row.get("zone_name"),
            camera_id: row.get("camera_id"),
            kind: kind.parse()?,
            count_before: row.get::<i64, _>("count_before") as u32,
            count_after: row.get::<i64, _>("count_after") as u32,
            duration_seconds: row.get("duration_seconds"),
            entry_time: row.get("entry_time"),
            exit_time: row.get("exit_time"),
            timestamp: row.get("timestamp"),
        })
    }

    /// Append one event; the assigned row id comes back on the record.
    pub async fn insert(&self, draft: &EventDraft) -> Result<ParkingEvent> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (zone_id, zone_name, camera_id, kind, count_before,
                                count_after, duration_seconds, entry_time, exit_time, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.zone_id)
        .bind(&draft.zone_name)
        .bind(&draft.camera_id)
        .bind(draft.kind.as_str())
        .bind(draft.count_before as i64)
        .bind(draft.count_after as i64)
        .bind(draft.duration_seconds)
        .bind(draft.entry_time)
        .bind(draft.exit_time)
        .bind(draft.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(ParkingEvent {
            id: result.last_insert_rowid(),
            zone_id: draft.zone_id.clone(),
            zone_name: draft.zone_name.clone(),
            camera_id: draft.camera_id.clone(),
            kind: draft.kind,
            count_before: draft.count_before,
            count_after: draft.count_after,
            duration_seconds: draft.duration_seconds,
            entry_time: draft.entry_time,
            exit_time: draft.exit_time,
            timestamp: draft.timestamp,
        })
    }

    fn filter_clauses(query: &EventQuery) -> String {
        let mut sql = String::from(" WHERE 1=1");
        if query.zone_id.is_some() {
            sql.push_str(" AND zone_id = ?");
        }
        if query.camera_id.is_some() {
            sql.push_str(" AND camera_id = ?");
        }
        if query.event_type.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if query.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if query.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql
    }

    fn bind_filters<'q>(
        mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        query: &'q EventQuery,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        if let Some(zone_id) = &query.zone_id {
            q = q.bind(zone_id);
        }
        if let Some(camera_id) = &query.camera_id {
            q = q.bind(camera_id);
        }
        if let Some(kind) = &query.event_type {
            q = q.bind(kind.as_str());
        }
        if let Some(since) = &query.since {
            q = q.bind(since);
        }
        if let Some(until) = &query.until {
            q = q.bind(until);
        }
        q
    }

    /// Filtered page of events, newest first, plus the unpaged total.
    pub async fn query(&self, query: &EventQuery) -> Result<(Vec<ParkingEvent>, i64)> {
        let filters = Self::filter_clauses(query);

        let count_sql = format!("SELECT COUNT(*) AS total FROM events{}", filters);
        let total: i64 = Self::bind_filters(sqlx::query(&count_sql), query)
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let page_sql = format!(
            "SELECT {} FROM events{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            EVENT_COLUMNS, filters
        );
        let rows = Self::bind_filters(sqlx::query(&page_sql), query)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;

        let events = rows.iter().map(Self::row_to_event).collect::<Result<_>>()?;
        Ok((events, total))
    }

    /// Last N events for one zone.
    pub async fn history(&self, zone_id: &str, limit: i64) -> Result<Vec<ParkingEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE zone_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            EVENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(zone_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    /// Entry/exit totals and average completed-session duration.
    pub async fn totals(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64, Option<f64>)> {
        let mut sql = String::from(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN kind = 'entry' THEN 1 ELSE 0 END), 0) AS entries,
                COALESCE(SUM(CASE WHEN kind = 'exit' THEN 1 ELSE 0 END), 0) AS exits,
                AVG(CASE WHEN kind = 'exit' THEN duration_seconds END) AS avg_duration
            FROM events
            "#,
        );
        if since.is_some() {
            sql.push_str(" WHERE timestamp >= ?");
        }
        let mut q = sqlx::query(&sql);
        if let Some(since) = &since {
            q = q.bind(since);
        }
        let row = q.fetch_one(&self.pool).await?;
        Ok((
            row.get("entries"),
            row.get("exits"),
            row.get("avg_duration"),
        ))
    }

    /// Per-zone entry/exit breakdown.
    pub async fn totals_by_zone(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ZoneStats>> {
        let mut sql = String::from(
            r#"
            SELECT
                zone_id,
                zone_name,
                COALESCE(SUM(CASE WHEN kind = 'entry' THEN 1 ELSE 0 END), 0) AS entries,
                COALESCE(SUM(CASE WHEN kind = 'exit' THEN 1 ELSE 0 END), 0) AS exits,
                AVG(CASE WHEN kind = 'exit' THEN duration_seconds END) AS avg_duration
            FROM events
            "#,
        );
        if since.is_some() {
            sql.push_str(" WHERE timestamp >= ?");
        }
        sql.push_str(" GROUP BY zone_id, zone_name ORDER BY zone_name");

        let mut q = sqlx::query(&sql);
        if let Some(since) = &since {
            q = q.bind(since);
        }
        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| ZoneStats {
                zone_id: row.get("zone_id"),
                zone_name: row.get("zone_name"),
                entries: row.get("entries"),
                exits: row.get("exits"),
                avg_duration_seconds: row.get("avg_duration"),
            })
            .collect())
    }
}
