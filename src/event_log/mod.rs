//! EventLogService - Entry/Exit Event Records
//!
//! ## Responsibilities
//!
//! - Persist occupancy-transition events (append-only)
//! - Event queries with filters and pagination
//! - Aggregate statistics for the dashboard
//!
//! Drafting (which transition produces which kind) lives with the
//! occupancy tracker; this service owns the rows once appended.

mod repository;

pub use repository::EventRepository;

use crate::error::{Error, Result};
use crate::realtime_hub::{HubMessage, ParkingEventMessage, RealtimeHub};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

/// Event kinds produced by the occupancy state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Entry,
    Exit,
    OccupancyChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entry => "entry",
            EventKind::Exit => "exit",
            EventKind::OccupancyChange => "occupancy_change",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entry" => Ok(EventKind::Entry),
            "exit" => Ok(EventKind::Exit),
            "occupancy_change" => Ok(EventKind::OccupancyChange),
            other => Err(Error::Validation(format!("unknown event type: {}", other))),
        }
    }
}

/// Event as drafted by the occupancy tracker, before it has a row id
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub zone_id: String,
    pub zone_name: String,
    pub camera_id: Option<String>,
    pub kind: EventKind,
    pub count_before: u32,
    pub count_after: u32,
    pub duration_seconds: Option<i64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingEvent {
    pub id: i64,
    pub zone_id: String,
    pub zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    pub kind: EventKind,
    pub count_before: u32,
    pub count_after: u32,
    pub duration_seconds: Option<i64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Event listing filters
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub limit: i64,
    pub offset: i64,
    pub zone_id: Option<String>,
    pub camera_id: Option<String>,
    pub event_type: Option<EventKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            zone_id: None,
            camera_id: None,
            event_type: None,
            since: None,
            until: None,
        }
    }
}

/// Per-zone statistics row
#[derive(Debug, Clone, Serialize)]
pub struct ZoneStats {
    pub zone_id: String,
    pub zone_name: String,
    pub entries: i64,
    pub exits: i64,
    pub avg_duration_seconds: Option<f64>,
}

/// Aggregate statistics response
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total_entries: i64,
    pub total_exits: i64,
    pub current_occupied: usize,
    pub avg_duration_seconds: Option<f64>,
    pub by_zone: Vec<ZoneStats>,
}

/// EventLogService instance
pub struct EventLogService {
    repo: EventRepository,
    hub: Arc<RealtimeHub>,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(pool: SqlitePool, hub: Arc<RealtimeHub>) -> Self {
        Self {
            repo: EventRepository::new(pool),
            hub,
        }
    }

    /// Append a drafted event and fan it out.
    pub async fn append(&self, draft: EventDraft) -> Result<ParkingEvent> {
        let event = self.repo.insert(&draft).await?;

        tracing::info!(
            event_id = event.id,
            zone_id = %event.zone_id,
            kind = %event.kind.as_str(),
            count_before = event.count_before,
            count_after = event.count_after,
            duration_seconds = ?event.duration_seconds,
            "Event logged"
        );

        self.hub
            .broadcast(HubMessage::ParkingEvent(ParkingEventMessage {
                event: event.clone(),
            }))
            .await;

        Ok(event)
    }

    /// Filtered event page plus the unpaged total.
    pub async fn query(&self, query: &EventQuery) -> Result<(Vec<ParkingEvent>, i64)> {
        self.repo.query(query).await
    }

    /// Last N events for one zone.
    pub async fn history(&self, zone_id: &str, limit: i64) -> Result<Vec<ParkingEvent>> {
        self.repo.history(zone_id, limit).await
    }

    /// Aggregate statistics; `current_occupied` comes from the live session
    /// map, not the log.
    pub async fn stats(
        &self,
        since: Option<DateTime<Utc>>,
        current_occupied: usize,
    ) -> Result<EventStats> {
        let (total_entries, total_exits, avg_duration_seconds) = self.repo.totals(since).await?;
        let by_zone = self.repo.totals_by_zone(since).await?;

        Ok(EventStats {
            total_entries,
            total_exits,
            current_occupied,
            avg_duration_seconds,
            by_zone,
        })
    }
}
