//! OccupancyTracker - Per-Zone Counts and Dwell Sessions
//!
//! ## Responsibilities
//!
//! - Process-wide occupancy map: zone id -> count, detections, timestamp
//! - Per-zone session state for dwell-time attribution
//! - The count-transition state machine that drafts entry/exit events
//!
//! Every write captures the previous count, updates the entry, and mutates
//! the session map in one locked section, so any observer sees a consistent
//! `(prev, new)` pair and event kinds follow the transitions exactly.

use crate::detector::Detection;
use crate::event_log::{EventDraft, EventKind};
use crate::zone_store::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Current occupancy of one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyEntry {
    pub zone_id: String,
    pub zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    pub count: u32,
    pub blobs: Vec<Detection>,
    pub alarm: bool,
    pub last_updated: DateTime<Utc>,
}

/// Open dwell session for an occupied zone
#[derive(Debug, Clone)]
pub struct ZoneSession {
    pub entry_time: DateTime<Utc>,
    pub count_at_entry: u32,
}

#[derive(Default)]
struct TrackerState {
    entries: HashMap<String, OccupancyEntry>,
    sessions: HashMap<String, ZoneSession>,
}

/// OccupancyTracker instance
pub struct OccupancyTracker {
    state: Mutex<TrackerState>,
}

impl OccupancyTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Record a new count for a zone.
    ///
    /// Returns the updated entry and, when the count transitioned, the
    /// drafted event for the logger. Sessions open on 0 -> positive and
    /// close on positive -> 0; an exit without a session (fresh process)
    /// drafts with `duration_seconds = None`.
    pub async fn record(
        &self,
        zone: &Zone,
        count: u32,
        blobs: Vec<Detection>,
        now: DateTime<Utc>,
    ) -> (OccupancyEntry, Option<EventDraft>) {
        let mut state = self.state.lock().await;

        let prev_count = state.entries.get(&zone.id).map(|e| e.count).unwrap_or(0);

        let entry = OccupancyEntry {
            zone_id: zone.id.clone(),
            zone_name: zone.name.clone(),
            camera_id: zone.camera_id.clone(),
            count,
            blobs,
            alarm: count >= zone.alarm_threshold,
            last_updated: now,
        };
        state.entries.insert(zone.id.clone(), entry.clone());

        let draft = if prev_count == 0 && count > 0 {
            state.sessions.insert(
                zone.id.clone(),
                ZoneSession {
                    entry_time: now,
                    count_at_entry: count,
                },
            );
            Some(EventDraft {
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                camera_id: zone.camera_id.clone(),
                kind: EventKind::Entry,
                count_before: prev_count,
                count_after: count,
                duration_seconds: None,
                entry_time: Some(now),
                exit_time: None,
                timestamp: now,
            })
        } else if prev_count > 0 && count == 0 {
            let session = state.sessions.remove(&zone.id);
            let entry_time = session.as_ref().map(|s| s.entry_time);
            let duration_seconds =
                entry_time.map(|t| (now - t).num_seconds());
            Some(EventDraft {
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                camera_id: zone.camera_id.clone(),
                kind: EventKind::Exit,
                count_before: prev_count,
                count_after: count,
                duration_seconds,
                entry_time,
                exit_time: Some(now),
                timestamp: now,
            })
        } else if prev_count != count {
            Some(EventDraft {
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                camera_id: zone.camera_id.clone(),
                kind: EventKind::OccupancyChange,
                count_before: prev_count,
                count_after: count,
                duration_seconds: None,
                entry_time: None,
                exit_time: None,
                timestamp: now,
            })
        } else {
            None
        };

        (entry, draft)
    }

    /// Current entry for one zone.
    pub async fn get(&self, zone_id: &str) -> Option<OccupancyEntry> {
        self.state.lock().await.entries.get(zone_id).cloned()
    }

    /// Snapshot of all entries, for `/occupancy` and the initial state.
    pub async fn snapshot(&self) -> Vec<OccupancyEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.zone_name.cmp(&b.zone_name));
        entries
    }

    /// Number of zones with an open session (currently occupied).
    pub async fn occupied_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Drop all state for a deleted zone.
    pub async fn remove_zone(&self, zone_id: &str) {
        let mut state = self.state.lock().await;
        state.entries.remove(zone_id);
        state.sessions.remove(zone_id);
    }
}

impl Default for OccupancyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn zone(id: &str, alarm_threshold: u32) -> Zone {
        let now = Utc::now();
        Zone {
            id: id.to_string(),
            name: format!("zone {}", id),
            camera_id: Some("cam-1".to_string()),
            polygon: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
            min_area: 100,
            max_area: 10_000,
            alarm_threshold,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn entry_then_exit_attributes_dwell_time() {
        let tracker = OccupancyTracker::new();
        let z = zone("z1", 1);
        let t0 = Utc::now();

        let (_, d) = tracker.record(&z, 0, vec![], t0).await;
        assert!(d.is_none());

        let (_, d) = tracker.record(&z, 2, vec![], t0 + Duration::seconds(5)).await;
        let entry = d.unwrap();
        assert_eq!(entry.kind, EventKind::Entry);
        assert_eq!((entry.count_before, entry.count_after), (0, 2));
        assert_eq!(entry.entry_time, Some(t0 + Duration::seconds(5)));
        assert_eq!(entry.duration_seconds, None);

        let (_, d) = tracker.record(&z, 2, vec![], t0 + Duration::seconds(10)).await;
        assert!(d.is_none());

        let (_, d) = tracker.record(&z, 0, vec![], t0 + Duration::seconds(20)).await;
        let exit = d.unwrap();
        assert_eq!(exit.kind, EventKind::Exit);
        assert_eq!((exit.count_before, exit.count_after), (2, 0));
        assert_eq!(exit.entry_time, Some(t0 + Duration::seconds(5)));
        assert_eq!(exit.exit_time, Some(t0 + Duration::seconds(20)));
        assert_eq!(exit.duration_seconds, Some(15));
        assert_eq!(tracker.occupied_count().await, 0);
    }

    #[tokio::test]
    async fn occupancy_change_between_positive_counts() {
        let tracker = OccupancyTracker::new();
        let z = zone("z1", 1);
        let now = Utc::now();

        let kinds: Vec<_> = {
            let mut drafts = Vec::new();
            for count in [1u32, 3, 3, 0] {
                let (_, d) = tracker.record(&z, count, vec![], now).await;
                drafts.push(d.map(|d| d.kind));
            }
            drafts
        };

        assert_eq!(
            kinds,
            vec![
                Some(EventKind::Entry),
                Some(EventKind::OccupancyChange),
                None,
                Some(EventKind::Exit)
            ]
        );
    }

    #[tokio::test]
    async fn exit_without_session_has_no_duration() {
        let tracker = OccupancyTracker::new();
        let z = zone("z1", 1);
        let now = Utc::now();

        // Simulate a restart: force a positive entry without going through 0
        {
            let mut state = tracker.state.lock().await;
            state.entries.insert(
                z.id.clone(),
                OccupancyEntry {
                    zone_id: z.id.clone(),
                    zone_name: z.name.clone(),
                    camera_id: z.camera_id.clone(),
                    count: 2,
                    blobs: vec![],
                    alarm: true,
                    last_updated: now,
                },
            );
        }

        let (_, d) = tracker.record(&z, 0, vec![], now).await;
        let exit = d.unwrap();
        assert_eq!(exit.kind, EventKind::Exit);
        assert_eq!(exit.duration_seconds, None);
        assert_eq!(exit.entry_time, None);
    }

    #[tokio::test]
    async fn alarm_follows_threshold() {
        let tracker = OccupancyTracker::new();
        let z = zone("z1", 3);
        let now = Utc::now();

        let (entry, _) = tracker.record(&z, 2, vec![], now).await;
        assert!(!entry.alarm);
        let (entry, _) = tracker.record(&z, 3, vec![], now).await;
        assert!(entry.alarm);
    }

    #[tokio::test]
    async fn remove_zone_clears_entry_and_session() {
        let tracker = OccupancyTracker::new();
        let z = zone("z1", 1);
        let now = Utc::now();

        tracker.record(&z, 2, vec![], now).await;
        assert_eq!(tracker.occupied_count().await, 1);

        tracker.remove_zone(&z.id).await;
        assert!(tracker.get(&z.id).await.is_none());
        assert_eq!(tracker.occupied_count().await, 0);
    }
}
