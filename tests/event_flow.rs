//! End-to-end tests for the occupancy -> event log -> stats flow against a
//! real (in-memory) row store.

use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use zonewatch::db;
use zonewatch::event_log::{EventKind, EventLogService, EventQuery};
use zonewatch::occupancy::OccupancyTracker;
use zonewatch::realtime_hub::RealtimeHub;
use zonewatch::zone_store::{CreateZoneRequest, ZoneStore};

async fn store() -> SqlitePool {
    // One connection: each :memory: connection is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&pool).await.unwrap();
    pool
}

fn zone_request(name: &str, camera_id: Option<&str>) -> CreateZoneRequest {
    CreateZoneRequest {
        name: name.to_string(),
        camera_id: camera_id.map(str::to_string),
        polygon: vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
        min_area: Some(100),
        max_area: Some(10_000),
        alarm_threshold: Some(1),
    }
}

#[tokio::test]
async fn entry_exit_sequence_produces_events_and_stats() {
    let pool = store().await;
    let hub = Arc::new(RealtimeHub::new());
    let zones = ZoneStore::new(pool.clone()).await.unwrap();
    let tracker = OccupancyTracker::new();
    let log = EventLogService::new(pool.clone(), hub);

    let zone = zones.create(zone_request("dock", Some("cam-1"))).await.unwrap();
    let t0 = Utc::now();

    // Counts 0 -> 2 -> 2 -> 0 at t0, t0+5s, t0+10s, t0+20s
    let steps = [
        (0u32, t0),
        (2, t0 + Duration::seconds(5)),
        (2, t0 + Duration::seconds(10)),
        (0, t0 + Duration::seconds(20)),
    ];
    for (count, at) in steps {
        let (_, draft) = tracker.record(&zone, count, vec![], at).await;
        if let Some(draft) = draft {
            log.append(draft).await.unwrap();
        }
    }

    let (events, total) = log.query(&EventQuery::default()).await.unwrap();
    assert_eq!(total, 2);

    // Newest first: exit, then entry
    let exit = &events[0];
    assert_eq!(exit.kind, EventKind::Exit);
    assert_eq!((exit.count_before, exit.count_after), (2, 0));
    assert_eq!(exit.duration_seconds, Some(15));
    assert_eq!(exit.entry_time, Some(t0 + Duration::seconds(5)));
    assert_eq!(exit.exit_time, Some(t0 + Duration::seconds(20)));

    let entry = &events[1];
    assert_eq!(entry.kind, EventKind::Entry);
    assert_eq!((entry.count_before, entry.count_after), (0, 2));
    assert_eq!(entry.duration_seconds, None);

    let stats = log.stats(None, tracker.occupied_count().await).await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_exits, 1);
    assert_eq!(stats.avg_duration_seconds, Some(15.0));
    assert_eq!(stats.current_occupied, 0);
}

#[tokio::test]
async fn occupancy_change_kinds_follow_the_state_machine() {
    let pool = store().await;
    let hub = Arc::new(RealtimeHub::new());
    let zones = ZoneStore::new(pool.clone()).await.unwrap();
    let tracker = OccupancyTracker::new();
    let log = EventLogService::new(pool.clone(), hub);

    let zone = zones.create(zone_request("lot", None)).await.unwrap();
    let now = Utc::now();

    // Counts 0 -> 1 -> 3 -> 3 -> 0
    for count in [0u32, 1, 3, 3, 0] {
        let (_, draft) = tracker.record(&zone, count, vec![], now).await;
        if let Some(draft) = draft {
            log.append(draft).await.unwrap();
        }
    }

    let (events, total) = log.query(&EventQuery::default()).await.unwrap();
    assert_eq!(total, 3);
    let kinds: Vec<_> = events.iter().rev().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Entry, EventKind::OccupancyChange, EventKind::Exit]
    );
}

#[tokio::test]
async fn event_filters_apply_to_queries() {
    let pool = store().await;
    let hub = Arc::new(RealtimeHub::new());
    let zones = ZoneStore::new(pool.clone()).await.unwrap();
    let tracker = OccupancyTracker::new();
    let log = EventLogService::new(pool.clone(), hub);

    let a = zones.create(zone_request("a", Some("cam-1"))).await.unwrap();
    let b = zones.create(zone_request("b", Some("cam-2"))).await.unwrap();
    let now = Utc::now();

    for zone in [&a, &b] {
        for count in [1u32, 0] {
            let (_, draft) = tracker.record(zone, count, vec![], now).await;
            if let Some(draft) = draft {
                log.append(draft).await.unwrap();
            }
        }
    }

    let by_zone = EventQuery {
        zone_id: Some(a.id.clone()),
        ..Default::default()
    };
    let (events, total) = log.query(&by_zone).await.unwrap();
    assert_eq!(total, 2);
    assert!(events.iter().all(|e| e.zone_id == a.id));

    let exits_only = EventQuery {
        event_type: Some(EventKind::Exit),
        ..Default::default()
    };
    let (events, total) = log.query(&exits_only).await.unwrap();
    assert_eq!(total, 2);
    assert!(events.iter().all(|e| e.kind == EventKind::Exit));

    let since_future = EventQuery {
        since: Some(now + Duration::seconds(60)),
        ..Default::default()
    };
    let (_, total) = log.query(&since_future).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn zone_delete_cascades_to_events_and_stats() {
    let pool = store().await;
    let hub = Arc::new(RealtimeHub::new());
    let zones = ZoneStore::new(pool.clone()).await.unwrap();
    let tracker = OccupancyTracker::new();
    let log = EventLogService::new(pool.clone(), hub);

    let keep = zones.create(zone_request("keep", None)).await.unwrap();
    let doomed = zones.create(zone_request("drop", None)).await.unwrap();
    let now = Utc::now();

    for zone in [&keep, &doomed] {
        for count in [2u32, 0] {
            let (_, draft) = tracker.record(zone, count, vec![], now).await;
            if let Some(draft) = draft {
                log.append(draft).await.unwrap();
            }
        }
    }

    assert!(zones.delete(&doomed.id).await.unwrap());
    tracker.remove_zone(&doomed.id).await;

    let (events, total) = log.query(&EventQuery::default()).await.unwrap();
    assert_eq!(total, 2);
    assert!(events.iter().all(|e| e.zone_id == keep.id));

    let stats = log.stats(None, tracker.occupied_count().await).await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_exits, 1);
    assert!(stats.by_zone.iter().all(|z| z.zone_id == keep.id));

    // Deleting again reports nothing removed
    assert!(!zones.delete(&doomed.id).await.unwrap());
}

#[tokio::test]
async fn zone_updates_touch_updated_at_and_validate() {
    let pool = store().await;
    let zones = ZoneStore::new(pool.clone()).await.unwrap();

    let zone = zones.create(zone_request("dock", None)).await.unwrap();

    let patch = zonewatch::zone_store::UpdateZoneRequest {
        name: Some("dock east".to_string()),
        ..Default::default()
    };
    let updated = zones.update(&zone.id, patch).await.unwrap();
    assert_eq!(updated.name, "dock east");
    assert!(updated.updated_at >= zone.updated_at);
    assert_eq!(updated.polygon, zone.polygon);

    let bad_patch = zonewatch::zone_store::UpdateZoneRequest {
        polygon: Some(vec![(0.0, 0.0), (1.0, 1.0)]),
        ..Default::default()
    };
    assert!(zones.update(&zone.id, bad_patch).await.is_err());

    assert!(zones
        .update("missing", zonewatch::zone_store::UpdateZoneRequest::default())
        .await
        .is_err());
}

#[tokio::test]
async fn state_survives_reopen_but_sessions_do_not() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("zonewatch.db").display()
    );

    let zone_id;
    {
        let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
        db::init_schema(&pool).await.unwrap();

        let hub = Arc::new(RealtimeHub::new());
        let zones = ZoneStore::new(pool.clone()).await.unwrap();
        let tracker = OccupancyTracker::new();
        let log = EventLogService::new(pool.clone(), hub);

        let zone = zones.create(zone_request("dock", Some("cam-1"))).await.unwrap();
        zone_id = zone.id.clone();

        // Zone becomes occupied; the session lives only in memory
        let (_, draft) = tracker.record(&zone, 2, vec![], Utc::now()).await;
        log.append(draft.unwrap()).await.unwrap();

        pool.close().await;
    }

    // Process restart: fresh pool, fresh tracker, sessions are gone
    let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
    db::init_schema(&pool).await.unwrap();

    let hub = Arc::new(RealtimeHub::new());
    let zones = ZoneStore::new(pool.clone()).await.unwrap();
    let tracker = OccupancyTracker::new();
    let log = EventLogService::new(pool.clone(), hub);

    let zone = zones.get(&zone_id).await.unwrap().unwrap();
    assert_eq!(zone.name, "dock");

    // The tracker never saw the entry, so this 0-count write is the first
    // it knows of the zone: no transition, no event
    let (_, draft) = tracker.record(&zone, 0, vec![], Utc::now()).await;
    assert!(draft.is_none());

    // Re-occupy: the pre-restart entry row is still on disk
    let (_, draft) = tracker.record(&zone, 1, vec![], Utc::now()).await;
    log.append(draft.unwrap()).await.unwrap();

    let filters = EventQuery {
        zone_id: Some(zone_id.clone()),
        ..Default::default()
    };
    let (_, total) = log.query(&filters).await.unwrap();
    assert_eq!(total, 2);

    let stats = log.stats(None, tracker.occupied_count().await).await.unwrap();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_exits, 0);
    assert_eq!(stats.avg_duration_seconds, None);
}

#[tokio::test]
async fn listing_is_newest_first() {
    let pool = store().await;
    let zones = ZoneStore::new(pool.clone()).await.unwrap();

    let first = zones.create(zone_request("first", None)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = zones.create(zone_request("second", None)).await.unwrap();

    let listed = zones.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);
}
